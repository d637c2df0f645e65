//! Conversation and message routes backing the chat sidebar.
//!
//! Every route is scoped to the caller from `X-User-Id`; a conversation owned
//! by someone else is reported as missing.

use axum::body::Bytes;
use axum::extract::{ Path, State };
use axum::http::{ HeaderMap, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::Json;
use chrono::{ DateTime, Utc };
use log::info;
use serde::{ Deserialize, Serialize };
use serde_json::json;
use std::sync::Arc;

use super::{ parse_body, user_id, AppState };
use crate::error::RelayError;
use crate::history::{ record_message, HistoryStore };
use crate::models::chat::{ format_relative, Conversation, Role, DEFAULT_TITLE };

#[derive(Deserialize, Debug, Default)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct RenameConversationRequest {
    pub title: String,
}

#[derive(Deserialize, Debug)]
pub struct AppendMessageRequest {
    pub role: Role,
    pub content: String,
}

#[derive(Serialize, Debug)]
pub struct ConversationResponse {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub relative_time: String,
}

impl ConversationResponse {
    fn new(conversation: Conversation, now: DateTime<Utc>) -> Self {
        let relative_time = format_relative(conversation.updated_at, now);
        Self { conversation, relative_time }
    }
}

fn history(state: &AppState) -> Result<&Arc<dyn HistoryStore>, RelayError> {
    state.history.as_ref().ok_or(RelayError::Unavailable("history store"))
}

async fn owned_conversation(
    store: &dyn HistoryStore,
    user_id: &str,
    id: &str
) -> Result<Conversation, RelayError> {
    let conversation = store.get_conversation(id).await?;
    if conversation.user_id != user_id {
        return Err(RelayError::NotFound(id.to_string()));
    }
    Ok(conversation)
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap
) -> Result<Json<serde_json::Value>, RelayError> {
    let store = history(&state)?;
    let now = Utc::now();
    let conversations: Vec<ConversationResponse> = store
        .list_conversations(&user_id(&headers)).await?
        .into_iter()
        .map(|c| ConversationResponse::new(c, now))
        .collect();
    Ok(Json(json!({ "conversations": conversations })))
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes
) -> Result<Response, RelayError> {
    let store = history(&state)?;
    let request: CreateConversationRequest = if body.is_empty() {
        CreateConversationRequest::default()
    } else {
        parse_body(&body)?
    };
    let title = request.title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE);

    let owner = user_id(&headers);
    let conversation = store.create_conversation(&owner, title).await?;
    info!("Created conversation {} for {}", conversation.id, owner);
    Ok((StatusCode::CREATED, Json(ConversationResponse::new(conversation, Utc::now()))).into_response())
}

pub async fn rename(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes
) -> Result<Json<ConversationResponse>, RelayError> {
    let store = history(&state)?;
    let request: RenameConversationRequest = parse_body(&body)?;
    let title = request.title.trim();
    if title.is_empty() {
        return Err(RelayError::BadRequest("title must not be empty".to_string()));
    }

    owned_conversation(store.as_ref(), &user_id(&headers), &id).await?;
    let conversation = store.update_conversation(&id, Some(title)).await?;
    Ok(Json(ConversationResponse::new(conversation, Utc::now())))
}

pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>
) -> Result<StatusCode, RelayError> {
    let store = history(&state)?;
    owned_conversation(store.as_ref(), &user_id(&headers), &id).await?;
    store.delete_conversation(&id).await?;
    info!("Deleted conversation {}", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>
) -> Result<Json<serde_json::Value>, RelayError> {
    let store = history(&state)?;
    owned_conversation(store.as_ref(), &user_id(&headers), &id).await?;
    let messages = store.list_messages(&id).await?;
    Ok(Json(json!({ "messages": messages })))
}

pub async fn append(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes
) -> Result<Response, RelayError> {
    let store = history(&state)?;
    let request: AppendMessageRequest = parse_body(&body)?;
    if request.role == Role::System {
        return Err(RelayError::BadRequest("only user and assistant messages are stored".to_string()));
    }
    owned_conversation(store.as_ref(), &user_id(&headers), &id).await?;
    let message = record_message(store.as_ref(), &id, request.role, &request.content).await?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}
