use axum::body::{ Body, Bytes };
use axum::extract::{ Query, State };
use axum::http::{ header, HeaderMap, Response as HttpResponse };
use axum::response::{ IntoResponse, Response };
use axum::Json;
use log::{ debug, info, warn };
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::{ parse_body, user_id, AppState, RelayMode };
use crate::cli::API_KEY_ENV;
use crate::error::RelayError;
use crate::history::{ record_message, HistoryStore, StoreError };
use crate::models::chat::{ ChatMessage, Message, Role };
use crate::rag::Retriever;
use crate::relay::{ spawn_relay, StreamMode };
use crate::render::render as render_blocks;

/// `/api/chat` body. Either the chat transcript or a single webhook-style
/// query is accepted.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub query: Option<String>,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    /// Messages to send upstream; a bare query becomes one user message.
    fn transcript(&self) -> Result<Vec<ChatMessage>, RelayError> {
        if !self.messages.is_empty() {
            return Ok(self.messages.clone());
        }
        match self.query.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => Ok(vec![ChatMessage::user(query)]),
            _ => Err(RelayError::BadRequest("messages or query is required".to_string())),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct ChatParams {
    pub mode: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct RenderRequest {
    pub content: String,
}

/// Conversation a chat turn is persisted into.
#[derive(Clone)]
struct Persistence {
    store: Arc<dyn HistoryStore>,
    user_id: String,
    conversation_id: String,
}

impl Persistence {
    async fn record(&self, role: Role, content: &str) {
        match self.record_owned(role, content).await {
            Ok(message) => debug!("Persisted {} message {}", role, message.id),
            Err(e) => {
                warn!(
                    "Failed to persist {} message for conversation {}: {}",
                    role,
                    self.conversation_id,
                    e
                );
            }
        }
    }

    async fn record_owned(&self, role: Role, content: &str) -> Result<Message, StoreError> {
        let conversation = self.store.get_conversation(&self.conversation_id).await?;
        if conversation.user_id != self.user_id {
            return Err(StoreError::NotFound(self.conversation_id.clone()));
        }
        record_message(self.store.as_ref(), &self.conversation_id, role, content).await
    }
}

pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ChatParams>,
    body: Bytes
) -> Result<Response, RelayError> {
    let request: ChatRequest = parse_body(&body)?;
    let mode = match params.mode.as_deref() {
        Some(mode) => mode.parse::<RelayMode>().map_err(RelayError::BadRequest)?,
        None => state.mode,
    };
    let messages = request.transcript()?;

    let persistence = match (&state.history, &request.conversation_id) {
        (Some(store), Some(conversation_id)) =>
            Some(Persistence {
                store: store.clone(),
                user_id: user_id(&headers),
                conversation_id: conversation_id.clone(),
            }),
        _ => None,
    };

    if let Some(persistence) = &persistence {
        if let Some(last) = messages.iter().rev().find(|m| m.role == Role::User) {
            persistence.record(Role::User, &last.content).await;
        }
    }

    let messages = match (&state.retriever, mode) {
        (Some(retriever), RelayMode::Raw | RelayMode::Delta | RelayMode::Json) =>
            with_context(retriever, messages).await,
        _ => messages,
    };

    info!("Chat request ({} messages, mode {})", messages.len(), mode);

    match mode {
        RelayMode::Raw | RelayMode::Delta => {
            let client = state.chat.clone().ok_or(RelayError::MissingCredential(API_KEY_ENV))?;
            let upstream = client.open_stream(&messages).await?;
            let stream_mode = if mode == RelayMode::Raw { StreamMode::Raw } else { StreamMode::Delta };
            let handle = spawn_relay(stream_mode, upstream);

            if let Some(persistence) = persistence {
                let transcript = handle.transcript;
                tokio::spawn(async move {
                    match transcript.await {
                        Ok(reply) if !reply.is_empty() => {
                            persistence.record(Role::Assistant, &reply).await;
                        }
                        Ok(_) => {}
                        Err(_) => debug!("Stream ended early, assistant reply not persisted"),
                    }
                });
            }

            event_stream(handle.body)
        }
        RelayMode::Json => {
            let client = state.chat.clone().ok_or(RelayError::MissingCredential(API_KEY_ENV))?;
            let reply = client.complete(&messages).await?.response;
            if let Some(persistence) = &persistence {
                persistence.record(Role::Assistant, &reply).await;
            }
            Ok(Json(json!({ "message": ChatMessage::assistant(reply) })).into_response())
        }
        RelayMode::Webhook => {
            let webhook = state.webhook.clone().ok_or(RelayError::MissingCredential("WEBHOOK_URL"))?;
            let query = match request.query.as_deref().filter(|q| !q.trim().is_empty()) {
                Some(query) => query.to_string(),
                None =>
                    messages
                        .iter()
                        .rev()
                        .find(|m| m.role == Role::User)
                        .map(|m| m.content.clone())
                        .ok_or_else(|| RelayError::BadRequest("no user message found".to_string()))?,
            };
            let session_id = request.session_id
                .clone()
                .or_else(|| request.conversation_id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            let reply = webhook.ask(&query, &session_id).await?;
            if let Some(persistence) = &persistence {
                persistence.record(Role::Assistant, &reply).await;
            }
            Ok(
                Json(
                    json!({
                        "message": ChatMessage::assistant(reply),
                        "sessionId": session_id,
                    })
                ).into_response()
            )
        }
    }
}

/// Prepends a system message with documentation found for the latest user
/// turn. Retrieval failures only cost the context, never the reply.
async fn with_context(retriever: &Retriever, mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let query = match messages.iter().rev().find(|m| m.role == Role::User) {
        Some(last) if !last.content.trim().is_empty() => last.content.clone(),
        _ => {
            return messages;
        }
    };

    match retriever.retrieve(&query).await {
        Ok(retrieval) => {
            if let Some(context) = retrieval.to_context() {
                messages.insert(0, ChatMessage::system(context));
            }
        }
        Err(e) => warn!("Retrieval failed, answering without context: {}", e),
    }
    messages
}

fn event_stream(
    body: ReceiverStream<Result<Bytes, RelayError>>
) -> Result<Response, RelayError> {
    HttpResponse::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body))
        .map_err(|e| RelayError::Internal(format!("Failed to build stream response: {}", e)))
}

pub async fn render(body: Bytes) -> Result<Response, RelayError> {
    let request: RenderRequest = parse_body(&body)?;
    Ok(Json(json!({ "blocks": render_blocks(&request.content) })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::embedding::EmbeddingClient;
    use crate::rag::retriever::Document;
    use crate::rag::{ MemoryVectorIndex, RetrievalSettings, CLASS_NAME, PROPERTY_NAME };
    use async_trait::async_trait;

    struct FlatEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingClient for FlatEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RelayError> {
            if self.fail {
                return Err(RelayError::Internal("embedding backend down".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Seeded through a working embedder, queried through one that may fail.
    async fn retriever(fail: bool) -> Retriever {
        let index = Arc::new(MemoryVectorIndex::new());
        let seeder = Retriever::new(
            Arc::new(FlatEmbedder { fail: false }),
            index.clone(),
            RetrievalSettings::default()
        );
        let attr = Document {
            id: "Application.activeDocument".into(),
            text: "The active document.".into(),
            metadata: [
                (CLASS_NAME.to_string(), "Application".to_string()),
                (PROPERTY_NAME.to_string(), "activeDocument".to_string()),
            ].into(),
        };
        seeder.index_documents("object_attrs", vec![attr]).await.unwrap();
        Retriever::new(Arc::new(FlatEmbedder { fail }), index, RetrievalSettings::default())
    }

    #[tokio::test]
    async fn context_is_prepended_as_system_message() {
        let retriever = retriever(false).await;
        let messages = vec![ChatMessage::user("first"), ChatMessage::assistant("ok"), ChatMessage::user("active doc?")];

        let grounded = with_context(&retriever, messages.clone()).await;
        assert_eq!(grounded.len(), 4);
        assert_eq!(grounded[0].role, Role::System);
        assert!(grounded[0].content.contains("Application.activeDocument"));
        assert_eq!(&grounded[1..], &messages[..]);
    }

    #[tokio::test]
    async fn retrieval_failure_leaves_messages_alone() {
        let retriever = retriever(true).await;
        let messages = vec![ChatMessage::user("hi")];
        assert_eq!(with_context(&retriever, messages.clone()).await, messages);
    }

    #[test]
    fn query_becomes_single_user_message() {
        let request: ChatRequest = serde_json::from_str(r#"{"query":"hi","sessionId":"s1"}"#).unwrap();
        assert_eq!(request.session_id.as_deref(), Some("s1"));
        assert_eq!(request.transcript().unwrap(), vec![ChatMessage::user("hi")]);
    }

    #[test]
    fn messages_take_precedence_over_query() {
        let request: ChatRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"a"},{"role":"assistant","content":"b"}],"query":"ignored","conversationId":"c1"}"#
        ).unwrap();
        assert_eq!(request.conversation_id.as_deref(), Some("c1"));
        assert_eq!(request.transcript().unwrap().len(), 2);
    }

    #[test]
    fn empty_request_is_rejected() {
        let request = ChatRequest::default();
        assert!(matches!(request.transcript(), Err(RelayError::BadRequest(_))));
        let request: ChatRequest = serde_json::from_str(r#"{"query":"   "}"#).unwrap();
        assert!(matches!(request.transcript(), Err(RelayError::BadRequest(_))));
    }
}
