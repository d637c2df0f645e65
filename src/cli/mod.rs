use clap::Parser;
use std::time::Duration;

use crate::rag::RetrievalSettings;

/// Environment variable holding the upstream LLM key. Also the name reported
/// to clients when the key is missing.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chat LLM Provider Args ---
    /// Type of OpenAI-compatible provider (openai, groq, xai, deepseek, ollama)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the provider API (e.g., https://api.openai.com/v1)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let the provider pick one
    pub chat_base_url: Option<String>,

    /// API key for the provider
    #[arg(long, env = "OPENAI_API_KEY")]
    pub chat_api_key: Option<String>,

    /// Model name for chat completion (e.g., gpt-4.1-mini, llama3)
    #[arg(long, env = "CHAT_MODEL")]
    pub chat_model: Option<String>,

    // --- Embedding Provider Args ---
    /// Base URL for the embeddings API. Defaults to the chat provider's.
    #[arg(long, env = "EMBEDDING_BASE_URL")]
    pub embedding_base_url: Option<String>,

    /// API key for the embeddings API. Defaults to the chat key.
    #[arg(long, env = "EMBEDDING_API_KEY")]
    pub embedding_api_key: Option<String>,

    /// Model name for text embedding (e.g., text-embedding-3-small)
    #[arg(long, env = "EMBEDDING_MODEL")] // No default, rely on the client default
    pub embedding_model: Option<String>,

    // --- Vector Store Args ---
    /// Documentation index used to ground replies (none, memory, qdrant)
    #[arg(long, env = "VECTOR_TYPE", default_value = "none")]
    pub vector_type: String,

    /// Qdrant endpoint (gRPC).
    #[arg(long, env = "VECTOR_HOST", default_value = "http://127.0.0.1:6334")]
    pub vector_host: String,

    /// API key for Qdrant.
    #[arg(long, env = "VECTOR_SECRET")]
    pub vector_secret: Option<String>,

    /// Vector dimension size
    #[arg(long, env = "VECTOR_DIMENSION", default_value = "1536")]
    pub dimension: usize,

    /// Collection holding parent objects (classes, types).
    #[arg(long, env = "VECTOR_PARENT_COLLECTION", default_value = "objects")]
    pub parent_collection: String,

    /// Collection holding object attributes (methods, properties, events).
    #[arg(long, env = "VECTOR_ATTR_COLLECTION", default_value = "object_attrs")]
    pub attr_collection: String,

    #[arg(long, env = "RAG_TOP_K_PARENTS", default_value = "5")]
    pub top_k_parents: usize,

    #[arg(long, env = "RAG_TOP_K_ATTRS", default_value = "8")]
    pub top_k_attrs: usize,

    /// Attribute candidates fetched before keeping the best per attribute.
    #[arg(long, env = "RAG_TOP_K_RAW_ATTRS", default_value = "50")]
    pub top_k_raw_attrs: usize,

    /// Minimum score for the fallback search used when no parent matches.
    #[arg(long, env = "RAG_MIN_SCORE")]
    pub min_score: Option<f32>,

    // --- Relay Args ---
    /// How /api/chat answers by default (raw, delta, json, webhook)
    #[arg(long, env = "RELAY_MODE", default_value = "delta")]
    pub relay_mode: String,

    /// Workflow webhook receiving `{query, sessionId}` in webhook mode.
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Seconds before an upstream call is abandoned. For streams this bounds
    /// connecting and each read. 0 disables the limit.
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    // --- History Store Args ---
    /// Conversation store type (memory, redis, supabase, none)
    #[arg(long, env = "HISTORY_TYPE", default_value = "memory")]
    pub history_type: String,

    /// Redis endpoint for the redis history store.
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "history:")]
    pub history_redis_prefix: String,

    /// Supabase project URL (e.g., https://xyz.supabase.co)
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Supabase anon or service key.
    #[arg(long, env = "SUPABASE_KEY")]
    pub supabase_key: Option<String>,

    // --- General App Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional API key required on every /api request. Also the HMAC secret
    /// for `ts`/`sig` signed requests.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Global request limit per second. 0 disables limiting.
    #[arg(long, env = "RATE_LIMIT", default_value = "10")]
    pub rate_limit_per_second: u32,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            parent_collection: self.parent_collection.clone(),
            attr_collection: self.attr_collection.clone(),
            top_k_parents: self.top_k_parents,
            top_k_attrs: self.top_k_attrs,
            top_k_raw_attrs: self.top_k_raw_attrs,
            min_score: self.min_score,
        }
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        (self.request_timeout > 0).then(|| Duration::from_secs(self.request_timeout))
    }
}
