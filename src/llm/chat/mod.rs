pub mod openai;
pub mod webhook;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use super::LlmConfig;
use self::openai::OpenAIChatClient;
use crate::cli::API_KEY_ENV;
use crate::error::RelayError;
use crate::models::chat::ChatMessage;

/// Raw upstream response body, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Buffered, non-streaming completion.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse, RelayError>;

    /// Opens a streaming completion and returns the upstream
    /// `text/event-stream` body. Fails before any byte is produced when the
    /// upstream answers with a non-success status.
    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<ByteStream, RelayError>;

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> String;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, RelayError> {
    let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());
    if config.llm_type.requires_api_key() && api_key.is_none() {
        return Err(RelayError::MissingCredential(API_KEY_ENV));
    }

    let client = OpenAIChatClient::new(
        config.llm_type,
        api_key,
        config.completion_model.clone(),
        config.base_url.clone(),
        config.timeout,
    )?;
    Ok(Arc::new(client))
}
