//! Handshake state machine using rust-fsm.
//!
//! The original flow expressed these transitions as implicit callback
//! chains around `setInterval`; here they are an explicit machine so that
//! every timer callback and poll-result handler can be validated against
//! the current phase.
//!
//! ## State Diagram
//!
//! ```text
//! ┌──────────┐ Refresh ┌────────────┐ SessionCreated ┌────────────┐
//! │   Idle   │────────►│ Generating │───────────────►│ Displaying │
//! └──────────┘         └─────┬──────┘                └─────┬──────┘
//!                            │ CreateFailed                │
//!                            ▼                      Linked │ Expire
//!                       ┌────────┐                         │   └──► Expired
//!                       │ Failed │◄── ExchangeFailed ┌─────▼─────┐
//!                       └────────┘                   │  Linking  │
//!                                                    └─────┬─────┘
//!                                       ExchangeSucceeded  │
//!                                                          ▼
//!                                  ┌──────┐        ┌───────────────┐
//!                                  │ Done │◄───────│ Materializing │
//!                                  └──────┘  Materialized └────────┘
//! ```
//!
//! `Refresh` re-enters `Generating` from every state; `Deactivate` returns
//! to `Idle` from every state. Both are always-legal inputs so teardown and
//! retry never depend on where the handshake currently is.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub link_machine(Idle)

    Idle => {
        Refresh => Generating,
        Deactivate => Idle
    },
    Generating => {
        SessionCreated => Displaying,
        CreateFailed => Failed,
        Refresh => Generating,
        Deactivate => Idle
    },
    Displaying => {
        Linked => Linking,
        Expire => Expired,
        Refresh => Generating,
        Deactivate => Idle
    },
    Linking => {
        ExchangeSucceeded => Materializing,
        ExchangeFailed => Failed,
        Refresh => Generating,
        Deactivate => Idle
    },
    Materializing => {
        Materialized => Done,
        Refresh => Generating,
        Deactivate => Idle
    },
    Done => {
        Refresh => Generating,
        Deactivate => Idle
    },
    Expired => {
        Refresh => Generating,
        Deactivate => Idle
    },
    Failed => {
        Refresh => Generating,
        Deactivate => Idle
    }
}

// Re-export the generated types with clearer names
pub use link_machine::Input as LinkMachineInput;
pub use link_machine::State as LinkMachineState;
pub use link_machine::StateMachine as LinkMachine;

/// Externally visible handshake phase.
///
/// A simplified view of the FSM state for callbacks and UI surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePhase {
    /// QR mode not active.
    Idle,
    /// Requesting a session id from the server.
    Generating,
    /// QR code is displayed; polling for a link.
    Displaying,
    /// A device linked the session; exchanging for credentials.
    Linking,
    /// Writing the materialized session to storage.
    Materializing,
    /// Signed in.
    Done,
    /// The QR code expired before a device linked it.
    Expired,
    /// Session creation or exchange failed.
    Failed,
}

impl HandshakePhase {
    /// Returns true for states that require an explicit refresh to leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandshakePhase::Done | HandshakePhase::Expired | HandshakePhase::Failed
        )
    }

    /// Returns true while polling is (or is about to be) running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            HandshakePhase::Generating
                | HandshakePhase::Displaying
                | HandshakePhase::Linking
                | HandshakePhase::Materializing
        )
    }
}

impl From<&LinkMachineState> for HandshakePhase {
    fn from(state: &LinkMachineState) -> Self {
        match state {
            LinkMachineState::Idle => HandshakePhase::Idle,
            LinkMachineState::Generating => HandshakePhase::Generating,
            LinkMachineState::Displaying => HandshakePhase::Displaying,
            LinkMachineState::Linking => HandshakePhase::Linking,
            LinkMachineState::Materializing => HandshakePhase::Materializing,
            LinkMachineState::Done => HandshakePhase::Done,
            LinkMachineState::Expired => HandshakePhase::Expired,
            LinkMachineState::Failed => HandshakePhase::Failed,
        }
    }
}
