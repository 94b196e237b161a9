//! Typed errors for otter-dl
//!
//! Argument and not-found errors are returned synchronously from engine
//! calls; transfer errors never are — they surface as `Cancelled` events
//! with the reason in logs.

use serde::{Serialize, ser::Serializer};
use thiserror::Error;

/// Main error type for the download engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Path argument failed validation
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// URL argument failed validation
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No record exists for the given path
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration rejected at engine construction
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Store (de)serialization or commit error
    #[error("Store error: {0}")]
    Store(String),

    /// Filesystem error during a transfer
    #[error("File error: {0}")]
    File(String),

    /// HTTP-level transfer error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Engine is shutting down
    #[error("Engine is shutting down")]
    Shutdown,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

// Bridge replies carry errors as their display string.
impl Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
