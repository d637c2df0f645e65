use axum::http::StatusCode;
use axum::response::{ IntoResponse, Response };
use axum::Json;
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::history::StoreError;

/// Every failure a request can end in. Rendered to the caller as
/// `{"error": "<message>"}` with the status from [`RelayError::status`].
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Missing {0}")]
    MissingCredential(&'static str),

    #[error("{provider} error {status}: {body}")]
    Upstream {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("vector index error: {0}")]
    Index(String),

    #[error("{0}")]
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RelayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_message_names_provider_and_status() {
        let err = RelayError::Upstream {
            provider: "OpenAI".into(),
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "OpenAI error 500: boom");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn missing_credential_is_server_error() {
        let err = RelayError::MissingCredential("OPENAI_API_KEY");
        assert_eq!(err.to_string(), "Missing OPENAI_API_KEY");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let err = RelayError::from(StoreError::NotFound("abc".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unconfigured_backend_is_unavailable() {
        let err = RelayError::Unavailable("history store");
        assert_eq!(err.to_string(), "history store is not configured");
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
