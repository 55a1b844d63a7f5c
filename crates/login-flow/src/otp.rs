//! Seam for the phone-number OTP provider.

use crate::FlowResult;
use std::future::Future;

/// Outcome of a successful OTP verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedLogin {
    /// User id of the account the phone number belongs to.
    pub user_id: String,
}

/// Phone OTP provider.
///
/// The orchestrator only needs the two calls of the challenge/response
/// round trip; session handling for the OTP path lives behind the
/// implementation.
pub trait OtpAuthenticator: Send + Sync {
    /// Send a one-time code to `phone_number`.
    fn request_code(&self, phone_number: &str) -> impl Future<Output = FlowResult<()>> + Send;

    /// Verify the code the user entered.
    fn verify_code(
        &self,
        phone_number: &str,
        code: &str,
    ) -> impl Future<Output = FlowResult<VerifiedLogin>> + Send;
}
