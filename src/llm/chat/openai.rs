use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, Response, header::{ HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use std::time::Duration;

use super::{ ByteStream, ChatClient, CompletionResponse };
use crate::error::RelayError;
use crate::llm::LlmType;
use crate::models::chat::ChatMessage;

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAIChatClient {
    http: HttpClient,
    llm_type: LlmType,
    model: String,
    base_url: String,
    timeout: Option<Duration>,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIChatClient {
    pub fn new(
        llm_type: LlmType,
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, RelayError> {
        let chat_model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_url = base_url.unwrap_or_else(|| llm_type.default_base_url().to_string());
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
        // A streamed body may legitimately outlive any total deadline, so
        // only connecting and each read are bounded on the client.
        if let Some(limit) = timeout {
            builder = builder.connect_timeout(limit).read_timeout(limit);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            llm_type,
            model: chat_model,
            base_url: api_url,
            timeout,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<Response, RelayError> {
        let req = OpenAIChatRequest {
            model: &self.model,
            messages,
            stream,
        };
        let mut builder = self.http.post(self.completions_url()).json(&req);
        if stream {
            builder = builder.header(ACCEPT, "text/event-stream");
        } else if let Some(limit) = self.timeout {
            builder = builder.timeout(limit);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Upstream {
                provider: self.llm_type.label().to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse, RelayError> {
        let resp = self.send(messages, false).await?.json::<OpenAIResponse>().await?;

        let content = resp.choices
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Internal(format!("No response from {} API", self.llm_type)))?
            .message.content
            .unwrap_or_default();

        debug!("{} completion returned {} chars", self.llm_type, content.len());
        Ok(CompletionResponse { response: content })
    }

    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<ByteStream, RelayError> {
        info!("Opening {} stream (model {}, {} messages)", self.llm_type, self.model, messages.len());
        let resp = self.send(messages, true).await?;
        Ok(Box::pin(resp.bytes_stream().map(|chunk| chunk.map_err(RelayError::from))))
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> String {
        self.base_url.clone()
    }
}
