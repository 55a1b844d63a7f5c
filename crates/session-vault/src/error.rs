//! Storage error types.

use thiserror::Error;

/// Storage error type.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying I/O failure (file backend)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using StorageError.
pub type StorageResult<T> = Result<T, StorageError>;
