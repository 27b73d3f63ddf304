//! Error types for the query cache.
//!
//! Only [`TransportError`] ever reaches consumers, and only as the message on
//! an entry in `Error` status. [`ParseError`] is recovered where it happens and
//! [`CacheError`] covers programmer errors and a stopped runtime.

use thiserror::Error;

/// Connection-level failure. Terminal for the connection that raised it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Unexpected response status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Stream failed: {0}")]
    Remote(String),

    #[error("Stream closed by remote")]
    Closed,

    #[error("SSE line exceeds {limit} bytes ({pending} buffered)")]
    LineTooLong { limit: usize, pending: usize },
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// A single inbound payload that could not be decoded into an item.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to decode stream payload: {reason}")]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors returned by the cache components and the query facade.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Query runtime has shut down")]
    Shutdown,
}

impl CacheError {
    pub(crate) fn violation(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
