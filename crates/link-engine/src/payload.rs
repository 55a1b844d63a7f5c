//! Encoded payload shown to the scanning device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The JSON payload rendered as a scannable code.
///
/// The server never reads this; it exists so the scanning app can recognize
/// the code, extract the session id, and show a local countdown. The
/// `expires_at` here is a client-computed hint mirroring the controller's
/// own expiry timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    /// App-specific login marker.
    #[serde(rename = "type")]
    pub kind: String,
    /// Server-assigned QR session id.
    pub session_id: String,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Expiry hint, epoch milliseconds.
    pub expires_at: i64,
}

impl QrPayload {
    /// Build a payload for `session_id` created at `now` with the given TTL.
    pub fn new(
        kind: impl Into<String>,
        session_id: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let timestamp = now.timestamp_millis();
        Self {
            kind: kind.into(),
            session_id: session_id.into(),
            timestamp,
            expires_at: timestamp + ttl.as_millis() as i64,
        }
    }

    /// JSON-stringify the payload for rendering.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_expected_field_names() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let payload = QrPayload::new(
            "crosslane-qr-login",
            "abc123",
            now,
            Duration::from_secs(300),
        );

        let json: serde_json::Value =
            serde_json::from_str(&payload.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "crosslane-qr-login");
        assert_eq!(json["sessionId"], "abc123");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert_eq!(json["expiresAt"], 1_700_000_300_000i64);
    }

    #[test]
    fn expiry_is_ttl_after_timestamp() {
        let now = Utc::now();
        let payload = QrPayload::new("t", "s", now, Duration::from_secs(300));
        assert_eq!(payload.expires_at - payload.timestamp, 300_000);
    }
}
