//! Error types for curato.

use thiserror::Error;

/// Result type alias using curato's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for curato operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Post not found
    #[error("Post not found: {0}")]
    PostNotFound(uuid::Uuid),

    /// Category not found
    #[error("Category not found: {0}")]
    CategoryNotFound(uuid::Uuid),

    /// Metadata extraction failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Geocoding lookup failed
    #[error("Geocoding error: {0}")]
    Geocoding(String),

    /// Graph store operation failed
    #[error("Graph error: {0}")]
    Graph(String),

    /// Background run / job registry error
    #[error("Job error: {0}")]
    Job(String),

    /// State-integrity violation (e.g. second outstanding cleanup backup).
    /// Fatal to the single operation; never silently repaired.
    #[error("State integrity error: {0}")]
    State(String),

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
        Error::Request(e.to_string())
    }
}
