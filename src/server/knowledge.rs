//! Routes for feeding and querying the documentation index.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use log::info;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{ parse_body, AppState };
use crate::error::RelayError;
use crate::rag::retriever::Document;
use crate::rag::{ Retrieval, Retriever };

#[derive(Deserialize, Debug)]
pub struct IndexRequest {
    pub collection: String,
    pub documents: Vec<Document>,
}

#[derive(Deserialize, Debug)]
pub struct RetrieveRequest {
    pub query: String,
}

fn retriever(state: &AppState) -> Result<&Arc<Retriever>, RelayError> {
    state.retriever.as_ref().ok_or(RelayError::Unavailable("retrieval index"))
}

pub async fn index(
    State(state): State<AppState>,
    body: Bytes
) -> Result<Json<serde_json::Value>, RelayError> {
    let retriever = retriever(&state)?;
    let request: IndexRequest = parse_body(&body)?;
    let indexed = retriever.index_documents(&request.collection, request.documents).await?;
    info!("Indexed {} documents into '{}'", indexed, request.collection);
    Ok(Json(json!({ "indexed": indexed })))
}

pub async fn retrieve(
    State(state): State<AppState>,
    body: Bytes
) -> Result<Json<Retrieval>, RelayError> {
    let retriever = retriever(&state)?;
    let request: RetrieveRequest = parse_body(&body)?;
    let query = request.query.trim();
    if query.is_empty() {
        return Err(RelayError::BadRequest("query must not be empty".to_string()));
    }
    Ok(Json(retriever.retrieve(query).await?))
}
