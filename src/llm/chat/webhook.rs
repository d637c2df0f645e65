use log::info;
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::error::RelayError;

const REPLY_KEYS: [&str; 4] = ["output", "text", "response", "message"];

/// Forwards a single query to a third-party workflow webhook.
pub struct WebhookClient {
    http: HttpClient,
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookRequest<'a> {
    query: &'a str,
    session_id: &'a str,
}

impl WebhookClient {
    pub fn new(url: String, timeout: Option<Duration>) -> Result<Self, RelayError> {
        let mut builder = HttpClient::builder();
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }
        Ok(Self {
            http: builder.build()?,
            url,
        })
    }

    pub async fn ask(&self, query: &str, session_id: &str) -> Result<String, RelayError> {
        info!("Forwarding query for session {} to workflow webhook", session_id);
        let resp = self.http
            .post(&self.url)
            .json(&WebhookRequest { query, session_id })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RelayError::Upstream {
                provider: "Webhook".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(
            serde_json::from_str::<JsonValue>(&body)
                .ok()
                .and_then(|value| extract_reply(&value))
                .unwrap_or(body)
        )
    }
}

/// Reply text from a webhook JSON body: the first known key holding a
/// string, looking into the first element when the body is an array.
pub fn extract_reply(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Array(items) => items.first().and_then(extract_reply),
        JsonValue::Object(map) =>
            REPLY_KEYS.iter()
                .filter_map(|key| map.get(*key))
                .find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}
