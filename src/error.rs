//! Error types for keen-client

use thiserror::Error;

/// Main error type for the keen-client library
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed event or collection name, rejected before persistence
    #[error("validation error: {0}")]
    Validation(String),

    /// Database error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The store file was corrupt and has been re-initialized
    #[error("store corruption: {0}")]
    Corruption(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/API error
    #[error("network error: {0}")]
    Network(#[from] crate::net::NetworkError),
}

/// Result type alias for keen-client
pub type Result<T> = std::result::Result<T, Error>;
