//! Common error types for host stores

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in host stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Object or patch has an invalid shape
    #[error("Invalid object {id}: {message}")]
    InvalidObject { id: String, message: String },

    /// Operation not supported by this store
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (snapshots)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound(_) => 404,
            StoreError::InvalidObject { .. } => 400,
            StoreError::NotSupported(_) => 501,
            StoreError::Serialization(_) => 400,
            StoreError::Io(_) => 500,
            StoreError::Internal(_) => 500,
        }
    }
}
