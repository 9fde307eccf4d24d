//! Error types for bidwise.

use thiserror::Error;

/// Result type alias using bidwise's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for bidwise operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File record not found
    #[error("File record not found: {0}")]
    FileNotFound(uuid::Uuid),

    /// An active queue item already exists for the file
    #[error("Analysis already queued for file {0}")]
    AlreadyQueued(uuid::Uuid),

    /// Object store read or write failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Analysis service call failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Operation exceeded its time budget
    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Request(format!("request timed out: {}", e))
        } else {
            Error::Request(e.to_string())
        }
    }
}
