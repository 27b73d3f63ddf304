//! Error types for the TUI.

use crate::config::ConfigError;
use postfeed_cache::{CacheError, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum TuiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}
