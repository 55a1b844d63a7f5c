//! Typed auth transition events.
//!
//! Components that care about authentication state (navigation, sync
//! workers, status surfaces) subscribe here instead of watching an untyped
//! global event name. The bus is a thin wrapper over
//! `tokio::sync::broadcast`; slow subscribers lag independently and never
//! block the publisher.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default capacity of the broadcast channel backing the bus.
const DEFAULT_CAPACITY: usize = 16;

/// An authentication transition visible to the rest of the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuthEvent {
    /// A session was materialized and the user is signed in.
    SignedIn {
        /// User id that owns the new session.
        user_id: String,
    },
    /// The current session was discarded.
    SignedOut,
}

/// Process-wide publish/subscribe bus for [`AuthEvent`].
///
/// Cloning the bus clones the sender half; all clones publish into the same
/// channel. Receivers are created on demand with [`AuthEventBus::subscribe`].
#[derive(Debug, Clone)]
pub struct AuthEventBus {
    tx: broadcast::Sender<AuthEvent>,
}

impl AuthEventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future auth events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received the event. Zero
    /// subscribers is not an error; the event is simply dropped.
    pub fn publish(&self, event: AuthEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for AuthEventBus {
    fn default() -> Self {
        Self::new()
    }
}
