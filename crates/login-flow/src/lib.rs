//! Login orchestration.
//!
//! Sits on top of `link-engine`: picks between the phone OTP flow and the
//! QR cross-device flow, keeps the QR handshake scoped to its mode, and
//! publishes sign-in/sign-out events on the shared bus.

mod error;
mod orchestrator;
mod otp;

pub use error::{FlowError, FlowResult};
pub use orchestrator::LoginOrchestrator;
pub use otp::{OtpAuthenticator, VerifiedLogin};

use serde::{Deserialize, Serialize};

/// The login method currently offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMode {
    /// Phone number plus one-time code.
    Phone,
    /// Scan a QR code with an already signed-in device.
    Qr,
}
