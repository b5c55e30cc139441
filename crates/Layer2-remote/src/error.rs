//! Remote tier error types
//!
//! `RemoteError` carries HTTP-level detail for retry decisions and converts
//! into `sessioncache_foundation::Error` at the crate boundary.

use crate::retry::{RetryClassification, RetryableError};
use sessioncache_foundation::Error as FoundationError;
use thiserror::Error;

/// Errors from the conversation-history service
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    /// Rate limit exceeded (429)
    #[error(
        "Rate limit exceeded{}",
        .retry_after_ms.map(|ms| format!(", retry after {}ms", ms)).unwrap_or_default()
    )]
    RateLimited { retry_after_ms: Option<u64> },

    /// Server error (5xx)
    #[error("Server error: {0}")]
    Server(String),

    /// Connection failed, DNS, reset
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Conversation does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credentials rejected (401/403)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Any other 4xx
    #[error("Client error {status}: {message}")]
    Client { status: u16, message: String },

    /// Body could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Remote tier not configured
    #[error("Remote not configured: {0}")]
    NotConfigured(String),
}

impl RetryableError for RemoteError {
    fn classify(&self) -> RetryClassification {
        match self {
            RemoteError::RateLimited { retry_after_ms } => RetryClassification::RateLimited {
                retry_after_ms: *retry_after_ms,
            },

            RemoteError::Server(_) | RemoteError::Network(_) | RemoteError::Timeout(_) => {
                RetryClassification::Retry
            }

            RemoteError::NotFound(_)
            | RemoteError::Authentication(_)
            | RemoteError::Client { .. }
            | RemoteError::InvalidResponse(_)
            | RemoteError::NotConfigured(_) => RetryClassification::NoRetry,
        }
    }
}

impl RemoteError {
    /// Create from HTTP status code and body
    pub fn from_http_status(status: u16, body: &str, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 | 403 => RemoteError::Authentication(body.to_string()),
            404 => RemoteError::NotFound(body.to_string()),
            408 => RemoteError::Timeout(body.to_string()),
            429 => RemoteError::RateLimited {
                retry_after_ms: retry_after_secs.map(|secs| secs * 1000),
            },
            500..=599 => RemoteError::Server(format!("HTTP {}: {}", status, body)),
            _ => RemoteError::Client {
                status,
                message: body.to_string(),
            },
        }
    }

    /// Classify a transport failure from reqwest
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout(err.to_string())
        } else if err.is_decode() {
            RemoteError::InvalidResponse(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

// ============================================================================
// sessioncache_foundation::Error conversion
// ============================================================================

impl From<RemoteError> for FoundationError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::RateLimited { retry_after_ms } => FoundationError::RateLimited(
                retry_after_ms
                    .map(|ms| format!("Retry after {}ms", ms))
                    .unwrap_or_else(|| "Rate limited".to_string()),
            ),
            RemoteError::Timeout(msg) => FoundationError::Timeout(msg),
            RemoteError::NotFound(msg) => FoundationError::NotFound(msg),
            RemoteError::NotConfigured(msg) => FoundationError::Config(msg),
            RemoteError::InvalidResponse(msg) => {
                FoundationError::Serialization(format!("Invalid response: {}", msg))
            }
            other => FoundationError::Remote(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            RemoteError::from_http_status(429, "", Some(2)),
            RemoteError::RateLimited {
                retry_after_ms: Some(2000)
            }
        ));
        assert!(RemoteError::from_http_status(404, "missing", None).is_not_found());
        assert_eq!(
            RemoteError::from_http_status(503, "down", None).classify(),
            RetryClassification::Retry
        );
        assert_eq!(
            RemoteError::from_http_status(400, "bad", None).classify(),
            RetryClassification::NoRetry
        );
    }

    #[test]
    fn test_foundation_conversion() {
        let err: FoundationError = RemoteError::Server("boom".into()).into();
        assert!(matches!(err, FoundationError::Remote(_)));

        let err: FoundationError = RemoteError::NotFound("c1".into()).into();
        assert!(matches!(err, FoundationError::NotFound(_)));
    }
}
