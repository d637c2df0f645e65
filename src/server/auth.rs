//! Request guard for `/api`: global rate limit, then either a shared API key
//! or an HMAC-SHA256 signature over a unix timestamp.

use axum::extract::{ Request, State };
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use hmac::{ Hmac, Mac };
use log::{ debug, warn };
use sha2::Sha256;
use std::collections::HashMap;
use url::form_urlencoded;

use super::AppState;
use crate::error::RelayError;

type HmacSha256 = Hmac<Sha256>;

const API_KEY_HEADER: &str = "X-API-Key";
const TS_HEADER: &str = "X-Api-Ts";
const SIG_HEADER: &str = "X-Api-Sign";
const MAX_CLOCK_SKEW_SECS: i64 = 300;

pub async fn guard(
    State(state): State<AppState>,
    request: Request,
    next: Next
) -> Result<Response, RelayError> {
    if let Some(limiter) = &state.limiter {
        if limiter.check().is_err() {
            warn!("Global rate limit exceeded for {}", request.uri().path());
            return Err(RelayError::RateLimited);
        }
    }

    if let Some(secret) = state.api_key.as_deref() {
        let query = request.uri().query().unwrap_or("");
        if let Err(e) = authorize(secret, request.headers(), query, Utc::now().timestamp()) {
            warn!("Rejected {} {}: {}", request.method(), request.uri().path(), e);
            return Err(e);
        }
    }

    Ok(next.run(request).await)
}

/// Hex HMAC-SHA256 of `ts` keyed with `secret`, as clients are expected to
/// send it in `sig`.
pub fn signature(secret: &str, ts: &str) -> Result<String, RelayError> {
    let mut mac = keyed(secret)?;
    mac.update(ts.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn keyed(secret: &str) -> Result<HmacSha256, RelayError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e|
        RelayError::Internal(format!("Invalid HMAC key: {}", e))
    )
}

/// Compares two keys without short-circuiting on the first differing byte.
/// Both sides are reduced to fixed-size MACs first, so the key length is not
/// observable either.
fn keys_match(secret: &str, provided: &str) -> Result<bool, RelayError> {
    let mut expected = keyed(secret)?;
    expected.update(secret.as_bytes());
    let expected = expected.finalize().into_bytes();

    let mut mac = keyed(secret)?;
    mac.update(provided.as_bytes());
    Ok(mac.verify_slice(&expected).is_ok())
}

/// Accepts the request when it carries the key itself (`X-API-Key` header or
/// `api_key` query) or a fresh `ts`/`sig` pair signed with it.
pub fn authorize(
    secret: &str,
    headers: &HeaderMap,
    query: &str,
    now: i64
) -> Result<(), RelayError> {
    let params: HashMap<String, String> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let provided_key = header(API_KEY_HEADER).or_else(|| params.get("api_key").map(String::as_str));
    if let Some(key) = provided_key {
        if keys_match(secret, key)? {
            return Ok(());
        }
    }

    let ts = params
        .get("ts")
        .map(String::as_str)
        .or_else(|| header(TS_HEADER));
    let sig = params
        .get("sig")
        .map(String::as_str)
        .or_else(|| header(SIG_HEADER));

    let (ts, sig) = match (ts, sig) {
        (Some(ts), Some(sig)) => (ts, sig),
        _ if provided_key.is_some() => {
            return Err(RelayError::Unauthorized("bad API key".to_string()));
        }
        _ => {
            return Err(RelayError::Unauthorized("missing API key or ts/sig".to_string()));
        }
    };

    let ts_secs: i64 = ts
        .parse()
        .map_err(|_| RelayError::Unauthorized("invalid timestamp".to_string()))?;
    if (now - ts_secs).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(RelayError::Unauthorized("timestamp out of range".to_string()));
    }

    let sig_bytes = hex::decode(sig).map_err(|_| RelayError::Unauthorized("bad signature".to_string()))?;
    let mut mac = keyed(secret)?;
    mac.update(ts.as_bytes());
    mac.verify_slice(&sig_bytes).map_err(|_|
        RelayError::Unauthorized("bad signature".to_string())
    )?;

    debug!("Signed request accepted (ts={})", ts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "s3cret";
    const NOW: i64 = 1_700_000_000;

    fn unauthorized(result: Result<(), RelayError>) -> String {
        match result {
            Err(RelayError::Unauthorized(reason)) => reason,
            _ => panic!("Expected Unauthorized"),
        }
    }

    #[test]
    fn api_key_in_header_or_query() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static(SECRET));
        assert!(authorize(SECRET, &headers, "", NOW).is_ok());
        assert!(authorize(SECRET, &HeaderMap::new(), "api_key=s3cret", NOW).is_ok());
    }

    #[test]
    fn wrong_or_missing_key_is_rejected() {
        assert_eq!(unauthorized(authorize(SECRET, &HeaderMap::new(), "api_key=nope", NOW)), "bad API key");
        assert_eq!(
            unauthorized(authorize(SECRET, &HeaderMap::new(), "", NOW)),
            "missing API key or ts/sig"
        );
    }

    #[test]
    fn key_comparison_is_exact() {
        assert!(keys_match(SECRET, "s3cret").unwrap());
        assert!(!keys_match(SECRET, "s3cre").unwrap());
        assert!(!keys_match(SECRET, "s3cret ").unwrap());
        assert!(!keys_match(SECRET, "S3CRET").unwrap());
        assert!(!keys_match(SECRET, "").unwrap());
    }

    #[test]
    fn signed_timestamp_within_window() {
        let ts = (NOW - 120).to_string();
        let sig = signature(SECRET, &ts).unwrap();
        let query = format!("ts={}&sig={}", ts, sig);
        assert!(authorize(SECRET, &HeaderMap::new(), &query, NOW).is_ok());
    }

    #[test]
    fn signed_headers_are_accepted() {
        let ts = NOW.to_string();
        let mut headers = HeaderMap::new();
        headers.insert(TS_HEADER, HeaderValue::from_str(&ts).unwrap());
        headers.insert(SIG_HEADER, HeaderValue::from_str(&signature(SECRET, &ts).unwrap()).unwrap());
        assert!(authorize(SECRET, &headers, "", NOW).is_ok());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let ts = (NOW - 301).to_string();
        let query = format!("ts={}&sig={}", ts, signature(SECRET, &ts).unwrap());
        assert_eq!(unauthorized(authorize(SECRET, &HeaderMap::new(), &query, NOW)), "timestamp out of range");
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let ts = NOW.to_string();
        let sig = signature("other-secret", &ts).unwrap();
        let query = format!("ts={}&sig={}", ts, sig);
        assert_eq!(unauthorized(authorize(SECRET, &HeaderMap::new(), &query, NOW)), "bad signature");
        let query = format!("ts={}&sig=not-hex", ts);
        assert_eq!(unauthorized(authorize(SECRET, &HeaderMap::new(), &query, NOW)), "bad signature");
    }
}
