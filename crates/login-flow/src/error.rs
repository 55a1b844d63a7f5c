use crate::LoginMode;
use thiserror::Error;

/// Errors surfaced by the login orchestrator.
#[derive(Debug, Error)]
pub enum FlowError {
    /// An operation belonging to one login mode was invoked while another
    /// mode was selected.
    #[error("operation requires {required:?} mode, current mode is {current:?}")]
    ModeMismatch {
        required: LoginMode,
        current: LoginMode,
    },

    /// The QR handshake failed.
    #[error(transparent)]
    Link(#[from] link_engine::LinkError),

    /// The OTP provider rejected a request or verification.
    #[error("OTP failed: {0}")]
    Otp(String),
}

/// Result alias for login flow operations.
pub type FlowResult<T> = Result<T, FlowError>;
