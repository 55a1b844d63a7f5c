//! Orchestrates the login screen's two modes over one controller.

use crate::{FlowError, FlowResult, LoginMode, OtpAuthenticator, VerifiedLogin};
use auth_events::{AuthEvent, AuthEventBus};
use link_engine::{HandshakeController, HandshakePhase, SessionRpc};
use std::sync::Mutex;
use tracing::{debug, info};

/// Drives the login surface: phone OTP by default, QR on request.
///
/// Mode selection owns the QR handshake lifecycle: entering QR mode starts
/// a session, leaving it (or signing out) deactivates the handshake so no
/// polling survives the mode it belongs to.
pub struct LoginOrchestrator<C, A> {
    controller: HandshakeController<C>,
    authenticator: A,
    events: AuthEventBus,
    mode: Mutex<LoginMode>,
}

impl<C, A> LoginOrchestrator<C, A>
where
    C: SessionRpc + 'static,
    A: OtpAuthenticator,
{
    /// Create an orchestrator starting in phone mode.
    pub fn new(controller: HandshakeController<C>, authenticator: A, events: AuthEventBus) -> Self {
        Self {
            controller,
            authenticator,
            events,
            mode: Mutex::new(LoginMode::Phone),
        }
    }

    /// Currently selected login mode.
    pub fn mode(&self) -> LoginMode {
        *self.mode.lock().expect("lock poisoned")
    }

    /// Switch login modes.
    ///
    /// Selecting the current mode is a no-op; in particular it does not
    /// restart a QR session already on display. Leaving QR mode tears the
    /// handshake down; entering it starts a fresh session.
    pub async fn select_mode(&self, mode: LoginMode) -> FlowResult<()> {
        let previous = {
            let mut current = self.mode.lock().expect("lock poisoned");
            if *current == mode {
                return Ok(());
            }
            let previous = *current;
            *current = mode;
            previous
        };
        debug!(?previous, ?mode, "Login mode changed");

        if previous == LoginMode::Qr {
            self.controller.deactivate();
        }
        if mode == LoginMode::Qr {
            self.controller.refresh().await?;
        }
        Ok(())
    }

    /// Send an OTP to `phone_number`. Phone mode only.
    pub async fn request_otp(&self, phone_number: &str) -> FlowResult<()> {
        self.require_mode(LoginMode::Phone)?;
        self.authenticator.request_code(phone_number).await
    }

    /// Verify the user's OTP and sign them in. Phone mode only.
    pub async fn verify_otp(&self, phone_number: &str, code: &str) -> FlowResult<VerifiedLogin> {
        self.require_mode(LoginMode::Phone)?;
        let login = self.authenticator.verify_code(phone_number, code).await?;
        info!(user_id = %login.user_id, "OTP login complete");
        self.events.publish(AuthEvent::SignedIn {
            user_id: login.user_id.clone(),
        });
        Ok(login)
    }

    /// Current phase of the QR handshake.
    pub fn qr_phase(&self) -> HandshakePhase {
        self.controller.phase()
    }

    /// Encoded QR payload to render, if a session is on display.
    pub fn qr_payload(&self) -> Option<String> {
        self.controller.encoded_payload()
    }

    /// Restart the QR session (e.g. after expiry). QR mode only.
    pub async fn refresh_qr(&self) -> FlowResult<()> {
        self.require_mode(LoginMode::Qr)?;
        self.controller.refresh().await?;
        Ok(())
    }

    /// Abandon any in-progress handshake and announce sign-out.
    pub fn sign_out(&self) {
        self.controller.deactivate();
        self.events.publish(AuthEvent::SignedOut);
        info!("Signed out");
    }

    fn require_mode(&self, required: LoginMode) -> FlowResult<()> {
        let current = self.mode();
        if current == required {
            Ok(())
        } else {
            Err(FlowError::ModeMismatch { required, current })
        }
    }
}
