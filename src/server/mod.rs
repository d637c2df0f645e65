pub mod api;
pub mod auth;
pub mod conversations;
pub mod knowledge;

use axum::http::HeaderMap;
use axum::routing::{ get, patch, post };
use axum::{ middleware, Json, Router };
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };
use log::{ error, info, warn };
use serde::de::DeserializeOwned;
use serde_json::{ json, Value as JsonValue };
use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };

use crate::cli::Args;
use crate::error::RelayError;
use crate::history::HistoryStore;
use crate::llm::chat::ChatClient;
use crate::llm::chat::webhook::WebhookClient;
use crate::rag::Retriever;

pub const USER_HEADER: &str = "X-User-Id";
pub const DEFAULT_USER: &str = "anonymous";

pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// How `/api/chat` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Upstream SSE bytes, unchanged.
    Raw,
    /// `text-delta` frames ending in `[DONE]`.
    Delta,
    /// One buffered `{message}` JSON body.
    Json,
    /// Buffered reply from the workflow webhook.
    Webhook,
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayMode::Raw => "raw",
            RelayMode::Delta => "delta",
            RelayMode::Json => "json",
            RelayMode::Webhook => "webhook",
        };
        f.write_str(name)
    }
}

impl FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(RelayMode::Raw),
            "delta" => Ok(RelayMode::Delta),
            "json" => Ok(RelayMode::Json),
            "webhook" => Ok(RelayMode::Webhook),
            _ => Err(format!("Invalid relay mode: '{}'", s)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    /// `None` when no usable provider key was configured.
    pub chat: Option<Arc<dyn ChatClient>>,
    pub webhook: Option<Arc<WebhookClient>>,
    pub history: Option<Arc<dyn HistoryStore>>,
    /// Grounds stream and json replies in the documentation index.
    pub retriever: Option<Arc<Retriever>>,
    pub mode: RelayMode,
    pub api_key: Option<String>,
    pub limiter: Option<Arc<Limiter>>,
}

impl AppState {
    pub fn new(chat: Option<Arc<dyn ChatClient>>, mode: RelayMode) -> Self {
        Self {
            chat,
            webhook: None,
            history: None,
            retriever: None,
            mode,
            api_key: None,
            limiter: None,
        }
    }

    pub fn with_webhook(mut self, webhook: Option<Arc<WebhookClient>>) -> Self {
        self.webhook = webhook;
        self
    }

    pub fn with_history(mut self, history: Option<Arc<dyn HistoryStore>>) -> Self {
        self.history = history;
        self
    }

    pub fn with_retriever(mut self, retriever: Option<Arc<Retriever>>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    /// `0` leaves requests unlimited.
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = NonZeroU32::new(per_second).map(|n|
            Arc::new(RateLimiter::direct(Quota::per_second(n)))
        );
        self
    }
}

/// Caller identity as forwarded by the hosting frontend.
pub fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string()
}

/// JSON body parsing that reports failures as `{error}` with 400.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, RelayError> {
    serde_json::from_slice(body)
        .map_err(|e| RelayError::BadRequest(format!("Invalid request body: {}", e)))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api = Router::new()
        .route("/chat", post(api::chat))
        .route("/render", post(api::render))
        .route("/knowledge", post(knowledge::index))
        .route("/retrieve", post(knowledge::retrieve))
        .route("/conversations", get(conversations::list).post(conversations::create))
        .route(
            "/conversations/{id}",
            patch(conversations::rename).delete(conversations::remove)
        )
        .route(
            "/conversations/{id}/messages",
            get(conversations::messages).post(conversations::append)
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::guard));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: AppState, args: Args) -> Self {
        if state.api_key.is_some() {
            info!("Server configured with API Key authentication.");
        } else {
            warn!("Server configured WITHOUT API Key authentication. Requests are open.");
        }
        Self { addr, state, args }
    }

    pub async fn run(self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr: SocketAddr = self.addr.parse()?;
        let app = router(self.state);

        if self.args.enable_tls {
            let (cert_path, key_path) = match (&self.args.tls_cert_path, &self.args.tls_key_path) {
                (Some(cert), Some(key)) => (cert, key),
                (Some(_), None) | (None, Some(_)) => {
                    error!(
                        "Both --tls-cert-path and --tls-key-path must be provided to enable TLS."
                    );
                    return Err("Missing TLS certificate or key path".into());
                }
                (None, None) => {
                    error!("--enable-tls was set but no certificate/key paths provided.");
                    return Err("TLS enabled without cert/key".into());
                }
            };
            info!(
                "TLS enabled. Loading certificate from '{}' and key from '{}'",
                cert_path,
                key_path
            );
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                cert_path,
                key_path
            ).await?;

            info!("HTTPS server listening on: https://{}", addr);
            axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
        } else {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("HTTP server listening on: http://{}", addr);
            axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
        }

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received, draining connections");
}
