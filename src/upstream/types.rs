//! Upstream response and error types.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::resilience::retries::{is_retryable_status, Retryable};

/// Errors produced while fetching one upstream.
///
/// `Clone` so that coalesced callers can all observe the same failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// The request (or a fan-out slot) exceeded its deadline.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Connection refused/reset or name resolution failed.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The upstream answered with a non-2xx status.
    #[error("HTTP {status}")]
    HttpStatus { status: u16 },

    /// The body was not valid JSON or did not fit the shape rule.
    #[error("Invalid JSON response: {0}")]
    InvalidBody(String),

    /// The circuit is open and nothing is cached for the upstream.
    #[error("Circuit breaker OPEN for {0}")]
    CircuitOpen(String),

    /// Any other transport failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl Retryable for UpstreamError {
    fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Connect(_) => true,
            UpstreamError::HttpStatus { status } => is_retryable_status(*status),
            UpstreamError::CircuitOpen(_) => false,
            UpstreamError::InvalidBody(_) | UpstreamError::Transport(_) => true,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout(e.to_string())
        } else if e.is_connect() {
            UpstreamError::Connect(e.to_string())
        } else if e.is_decode() {
            UpstreamError::InvalidBody(e.to_string())
        } else if let Some(status) = e.status() {
            UpstreamError::HttpStatus {
                status: status.as_u16(),
            }
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// One upstream's answer as handed to aggregation.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResponse {
    /// Upstream name.
    pub source: String,
    /// Shaped payload.
    pub data: Value,
    /// When the payload was fetched, in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Served from the response cache (or the strategy fallback cache).
    pub from_cache: bool,
    /// Age of the cached payload in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age: Option<u64>,
    /// Served past its TTL because the live path failed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(UpstreamError::Timeout("t".into()).is_retryable());
        assert!(UpstreamError::Connect("reset".into()).is_retryable());
        assert!(UpstreamError::HttpStatus { status: 503 }.is_retryable());
        assert!(UpstreamError::HttpStatus { status: 429 }.is_retryable());
        assert!(!UpstreamError::HttpStatus { status: 404 }.is_retryable());
        assert!(UpstreamError::InvalidBody("x".into()).is_retryable());
        assert!(!UpstreamError::CircuitOpen("a".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(UpstreamError::HttpStatus { status: 502 }.to_string(), "HTTP 502");
        assert_eq!(
            UpstreamError::CircuitOpen("cat-facts".into()).to_string(),
            "Circuit breaker OPEN for cat-facts"
        );
    }

    #[test]
    fn test_response_serialization_skips_empty_fields() {
        let response = UpstreamResponse {
            source: "a".into(),
            data: serde_json::json!({"k": 1}),
            timestamp: 10,
            from_cache: false,
            cache_age: None,
            stale: false,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"source": "a", "data": {"k": 1}, "timestamp": 10, "fromCache": false})
        );
    }
}
