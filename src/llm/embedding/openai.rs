use async_trait::async_trait;
use log::debug;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use std::time::Duration;

use super::EmbeddingClient;
use crate::error::RelayError;
use crate::llm::LlmType;

const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Client for any OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIEmbeddingClient {
    http: HttpClient,
    llm_type: LlmType,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

impl OpenAIEmbeddingClient {
    pub fn new(
        llm_type: LlmType,
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, RelayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| RelayError::Internal(format!("Invalid API key format: {}", e)))?
            );
        }

        let mut builder = HttpClient::builder().default_headers(headers);
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }

        Ok(Self {
            http: builder.build()?,
            llm_type,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| llm_type.default_base_url().to_string()),
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RelayError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let resp = self.http
            .post(url)
            .json(&EmbeddingRequest { model: &self.model, input: texts })
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Upstream {
                provider: self.llm_type.label().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let mut data = resp.json::<OpenAIEmbeddingResponse>().await?.data;
        if data.len() != texts.len() {
            return Err(
                RelayError::Internal(
                    format!("Expected {} embeddings, got {}", texts.len(), data.len())
                )
            );
        }
        data.sort_by_key(|d| d.index);
        debug!("Embedded {} texts with {}", texts.len(), self.model);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}
