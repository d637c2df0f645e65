mod memory;
mod redis;
mod supabase;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ title_from_message, Conversation, Message, Role, DEFAULT_TITLE };

pub use self::memory::MemoryHistoryStore;
pub use self::redis::RedisHistoryStore;
pub use self::supabase::SupabaseHistoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Backend {
        status: u16,
        body: String,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Conversation and message rows, owned by a user.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str
    ) -> Result<Conversation, StoreError>;

    async fn get_conversation(&self, id: &str) -> Result<Conversation, StoreError>;

    /// Most recently updated first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError>;

    /// Bumps `updated_at`, and replaces the title when one is given.
    async fn update_conversation(
        &self,
        id: &str,
        title: Option<&str>
    ) -> Result<Conversation, StoreError>;

    /// Removes the conversation together with its messages.
    async fn delete_conversation(&self, id: &str) -> Result<(), StoreError>;

    async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str
    ) -> Result<Message, StoreError>;

    /// Oldest first.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;
}

/// Appends a message and keeps the owning conversation current: the first
/// user message names a conversation still carrying the default title, and
/// every message bumps `updated_at`.
pub async fn record_message(
    store: &dyn HistoryStore,
    conversation_id: &str,
    role: Role,
    content: &str
) -> Result<Message, StoreError> {
    let conversation = store.get_conversation(conversation_id).await?;
    let message = store.add_message(conversation_id, role, content).await?;

    let title = (role == Role::User && conversation.title == DEFAULT_TITLE)
        .then(|| title_from_message(content))
        .filter(|t| !t.trim().is_empty());
    store.update_conversation(conversation_id, title.as_deref()).await?;

    Ok(message)
}

pub fn create_history_store(
    args: &Args
) -> Result<Option<Arc<dyn HistoryStore>>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "none" => Ok(None),
        "memory" => Ok(Some(Arc::new(MemoryHistoryStore::new()))),
        "redis" => {
            let store = RedisHistoryStore::new(&args.history_host, &args.history_redis_prefix)?;
            Ok(Some(Arc::new(store)))
        }
        "supabase" => {
            let url = args.supabase_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or("SUPABASE_URL is required when HISTORY_TYPE=supabase")?;
            let key = args.supabase_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or("SUPABASE_KEY is required when HISTORY_TYPE=supabase")?;
            let store = SupabaseHistoryStore::new(url, key)?;
            Ok(Some(Arc::new(store)))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_history_store(
    args: &Args
) -> Result<Option<Arc<dyn HistoryStore>>, Box<dyn Error + Send + Sync>> {
    info!("Chat history will be stored in: {}", args.history_type);
    create_history_store(args)
}
