pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;

use super::LlmConfig;
use self::openai::OpenAIEmbeddingClient;
use crate::cli::API_KEY_ENV;
use crate::error::RelayError;

/// `text-embedding-3-small` output size.
pub const DEFAULT_DIMENSION: usize = 1536;

#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RelayError>;

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, RelayError> {
        let embedding = self
            .embed_batch(&[text.to_string()]).await?
            .pop()
            .ok_or_else(|| RelayError::Internal("Embedding request returned no vectors".to_string()))?;
        Ok(EmbeddingResponse { embedding })
    }
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn EmbeddingClient>, RelayError> {
    let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());
    if config.llm_type.requires_api_key() && api_key.is_none() {
        return Err(RelayError::MissingCredential(API_KEY_ENV));
    }

    let client = OpenAIEmbeddingClient::new(
        config.llm_type,
        api_key,
        config.embedding_model.clone(),
        config.base_url.clone(),
        config.timeout,
    )?;
    Ok(Arc::new(client))
}
