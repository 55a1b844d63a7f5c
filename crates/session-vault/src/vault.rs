//! High-level API for materializing a session in storage.

use crate::{KeyValueStore, ProviderKeys, StorageResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A token plus the epoch-seconds instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    /// Raw token string as issued by the provider.
    pub token: String,
    /// Expiry in epoch seconds.
    pub expires_at: i64,
}

/// Sign-in metadata the provider SDK associates with the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInDetails {
    /// Identifier the user signed in with (phone number in the QR flow).
    pub login_id: String,
    /// Provider auth flow that produced the session.
    pub auth_flow_type: String,
}

/// A complete session in the shape the external identity SDK expects.
///
/// The SDK reads this from storage rather than an API, so the field set
/// mirrors its session model exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedSession {
    pub access_token: TokenEntry,
    pub id_token: TokenEntry,
    pub refresh_token: String,
    /// `now_seconds - iat` from the id token; negative when the provider's
    /// clock is ahead of ours. Informational only.
    pub clock_drift: i64,
    pub sign_in_details: SignInDetails,
    /// User id that owns this session.
    pub last_auth_user: String,
}

/// Writes materialized sessions into a [`KeyValueStore`] under the
/// provider's key layout.
///
/// This core only ever writes; reads belong to the external SDK. All six
/// keys are written before `write` returns, so a caller that fires a
/// signed-in notification afterwards never exposes a partially written
/// session to subscribers.
#[derive(Clone)]
pub struct SessionVault {
    store: Arc<dyn KeyValueStore>,
}

impl SessionVault {
    /// Create a vault over the given storage backend.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Materialize `session` for `client_id`, overwriting any previous
    /// session for the same `(client_id, user_id)` pair.
    pub fn write(&self, session: &MaterializedSession, client_id: &str) -> StorageResult<()> {
        let user_id = &session.last_auth_user;

        self.store.set(
            &ProviderKeys::scoped(client_id, user_id, ProviderKeys::SIGN_IN_DETAILS),
            &serde_json::to_string(&session.sign_in_details)?,
        )?;
        self.store.set(
            &ProviderKeys::scoped(client_id, user_id, ProviderKeys::ID_TOKEN),
            &session.id_token.token,
        )?;
        self.store.set(
            &ProviderKeys::scoped(client_id, user_id, ProviderKeys::ACCESS_TOKEN),
            &session.access_token.token,
        )?;
        self.store.set(
            &ProviderKeys::scoped(client_id, user_id, ProviderKeys::REFRESH_TOKEN),
            &session.refresh_token,
        )?;
        self.store.set(
            &ProviderKeys::scoped(client_id, user_id, ProviderKeys::CLOCK_DRIFT),
            &session.clock_drift.to_string(),
        )?;
        self.store
            .set(&ProviderKeys::last_auth_user(client_id), user_id)?;

        tracing::info!(
            user_id = %user_id,
            client_id = %client_id,
            "Session materialized"
        );
        Ok(())
    }
}
