//! Error types for ci-events-core

use thiserror::Error;

/// Main error type for the ci-events-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport failure that is not an HTTP status
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for ci-events-core
pub type Result<T> = std::result::Result<T, Error>;
