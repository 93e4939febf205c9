//! HTTP client construction, headers, and response classification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER,
};
use serde::Deserialize;

use crate::api::Scope;
use crate::auth::AccessToken;
use crate::error::{ErrorDetails, PpcError};

pub const CLIENT_ID_HEADER: &str = "Amazon-Advertising-API-ClientId";
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const RATE_LIMIT_HEADER: &str = "x-amzn-RateLimit-Limit";
pub const REQUEST_ID_HEADER: &str = "x-amzn-RequestId";

/// Build the reqwest client used for API and token calls.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, PpcError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .user_agent(concat!("amazon-ppc/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| PpcError::Configuration(format!("failed to build HTTP client: {err}")))
}

/// Headers carried by every resource call.
pub fn request_headers(
    token: &AccessToken,
    client_id: &str,
    scope: &Scope,
    idempotency_key: Option<&str>,
) -> Result<HeaderMap, PpcError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    let mut bearer = HeaderValue::from_str(&token.bearer()).map_err(|_| {
        PpcError::InvalidArgument("access token is not a valid header value".to_string())
    })?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);
    insert_header(&mut headers, CLIENT_ID_HEADER, client_id)?;
    insert_header(&mut headers, scope.header_name(), scope.id())?;
    if let Some(key) = idempotency_key {
        insert_header(&mut headers, IDEMPOTENCY_KEY_HEADER, key)?;
    }
    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), PpcError> {
    let header = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| PpcError::InvalidArgument(format!("invalid header name {name}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| PpcError::InvalidArgument(format!("invalid value for header {name}")))?;
    headers.insert(header, value);
    Ok(())
}

/// Coarse outcome of an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx, including 207 multi-status.
    Success,
    Unauthorized,
    RateLimited,
    Server,
    Client,
}

pub fn classify(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 | 403 => StatusClass::Unauthorized,
        429 => StatusClass::RateLimited,
        500..=599 => StatusClass::Server,
        _ => StatusClass::Client,
    }
}

/// `Retry-After` as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<f64>() {
        return (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}

/// Requests per second advertised by the provider after throttling.
pub fn parse_rate_limit_hint(headers: &HeaderMap) -> Option<f64> {
    headers
        .get(RATE_LIMIT_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|rate| rate.is_finite() && *rate > 0.0)
}

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .or_else(|| headers.get("x-amz-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEntry {
    code: Option<String>,
    message: Option<String>,
    index: Option<usize>,
}

/// Decoded error answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub message: String,
    pub details: ErrorDetails,
    /// Offending item within the call, when the provider names one.
    pub item_index: Option<usize>,
}

/// Extract code, message and item index from an error body.
///
/// Non-JSON bodies are kept verbatim (truncated) as the message.
pub fn parse_error_body(body: &str, request_id: Option<String>) -> ErrorBody {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let first = parsed.errors.first();
    let code = parsed
        .code
        .or_else(|| first.and_then(|entry| entry.code.clone()));
    let message = parsed
        .message
        .or(parsed.details)
        .or_else(|| first.and_then(|entry| entry.message.clone()))
        .unwrap_or_else(|| truncate(body.trim(), 512));
    ErrorBody {
        message,
        details: ErrorDetails { code, request_id },
        item_index: first.and_then(|entry| entry.index),
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
