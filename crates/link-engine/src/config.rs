//! Handshake timing and endpoint configuration.

use std::time::Duration;

/// Default auth API origin (can be overridden at compile time via the
/// QR_LINK_BASE_URL env var).
pub const DEFAULT_BASE_URL: &str = match option_env!("QR_LINK_BASE_URL") {
    Some(url) => url,
    None => "https://api.crosslane.dev",
};

/// Marker the scanning app uses to recognize our login payloads.
const DEFAULT_PAYLOAD_TYPE: &str = "crosslane-qr-login";

/// Fixed poll interval. Never backs off; a failed tick is simply retried on
/// the next one.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// How long a QR session stays scannable before the client declares it
/// expired. Single-shot; the server does not push expiry events.
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

/// Assumed lifetime for the access and id tokens returned by the exchange.
/// The exchange response carries no expiry for them.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Configuration for the QR handshake.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Auth API origin; endpoints live under `<base_url>/auth`.
    pub base_url: String,
    /// `type` field of the encoded payload shown to the scanning app.
    pub payload_type: String,
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Client-enforced QR session lifetime.
    pub session_ttl: Duration,
    /// Assumed access/id token lifetime after a successful exchange.
    pub token_lifetime: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            payload_type: DEFAULT_PAYLOAD_TYPE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            session_ttl: DEFAULT_SESSION_TTL,
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
        }
    }
}

impl LinkConfig {
    /// Config pointing at a specific API origin, defaults elsewhere.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}
