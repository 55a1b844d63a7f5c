//! Handshake error types.

use thiserror::Error;

/// QR handshake error type.
///
/// Network failures never appear here: the RPC client converts them to
/// sentinel values before they reach the controller. These errors cover the
/// controller's own terminal outcomes and its storage boundary.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The creation endpoint failed or returned no session id
    #[error("Failed to generate QR session")]
    SessionCreateFailed,

    /// The credential exchange was rejected or failed
    #[error("QR login failed: {0}")]
    ExchangeFailed(String),

    /// Invalid transition in the handshake FSM
    #[error("Invalid handshake transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error while materializing the session
    #[error("Storage error: {0}")]
    Storage(#[from] session_vault::StorageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using LinkError.
pub type LinkResult<T> = Result<T, LinkError>;
