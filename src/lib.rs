pub mod cli;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod rag;
pub mod relay;
pub mod render;
pub mod server;

use cli::Args;
use history::initialize_history_store;
use llm::chat::new_client;
use llm::chat::webhook::WebhookClient;
use llm::embedding;
use llm::{ LlmConfig, LlmType };
use log::{ info, warn };
use rag::{ create_vector_index, Retriever };
use server::{ AppState, RelayMode, Server };
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let llm_type: LlmType = args.chat_llm_type.parse()?;
    let mode: RelayMode = args.relay_mode.parse()?;

    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", llm_type);
    info!(
        "Chat Base URL: {}",
        args.chat_base_url.as_deref().unwrap_or(llm_type.default_base_url())
    );
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("(provider default)"));
    info!("Relay Mode: {}", mode);
    info!("Webhook Configured: {}", args.webhook_url.is_some());
    info!("Vector Store Type: {}", args.vector_type);
    if args.vector_type.eq_ignore_ascii_case("qdrant") {
        info!("Vector Store Host: {}", args.vector_host);
    }
    info!("History Store Type: {}", args.history_type);
    if args.history_type.eq_ignore_ascii_case("redis") {
        info!("History Store Host: {}", args.history_host);
    }
    info!("Request Timeout (s): {}", args.request_timeout);
    info!("Rate Limit (req/s): {}", args.rate_limit_per_second);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let config = LlmConfig {
        llm_type,
        api_key: args.chat_api_key.clone(),
        completion_model: args.chat_model.clone(),
        embedding_model: args.embedding_model.clone(),
        base_url: args.chat_base_url.clone(),
        timeout: args.upstream_timeout(),
    };
    // A missing key is reported per request rather than failing startup.
    let chat = match new_client(&config) {
        Ok(client) => {
            info!("Chat client ready: {} at {}", client.get_model(), client.get_base_url());
            Some(client)
        }
        Err(e) => {
            warn!("Chat client unavailable: {}", e);
            None
        }
    };

    let webhook = match args.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => Some(Arc::new(WebhookClient::new(url.to_string(), args.upstream_timeout())?)),
        None => None,
    };
    let history = initialize_history_store(&args)?;

    let retriever = match create_vector_index(&args).await? {
        Some(index) => {
            let embedding_config = LlmConfig {
                api_key: args.embedding_api_key.clone().or_else(|| config.api_key.clone()),
                base_url: args.embedding_base_url.clone().or_else(|| config.base_url.clone()),
                ..config.clone()
            };
            match embedding::new_client(&embedding_config) {
                Ok(embedder) => Some(Arc::new(Retriever::new(embedder, index, args.retrieval_settings()))),
                Err(e) => {
                    warn!("Retrieval disabled, embedding client unavailable: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    let state = AppState::new(chat, mode)
        .with_webhook(webhook)
        .with_history(history)
        .with_retriever(retriever)
        .with_api_key(args.server_api_key.clone())
        .with_rate_limit(args.rate_limit_per_second);

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, state, args);
    server.run().await?;

    Ok(())
}
