//! RPC client for the QR session endpoints.
//!
//! Every call here swallows transport failures into a benign sentinel or a
//! tagged outcome instead of returning an error. A failed poll tick must
//! not abort the handshake; the controller always acts on the latest
//! successful result and the next tick retries implicitly.

use serde::Deserialize;
use std::future::Future;
use tracing::{debug, warn};

/// Status of a QR session as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Not yet scanned/approved (also the sentinel for a failed poll).
    Pending,
    /// A mobile device completed the login for this session.
    Linked,
}

/// Raw provider credentials returned by a successful exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedCredentials {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    pub phone_number: String,
    pub user_id: String,
    pub client_id: String,
}

/// Tagged result of the credential exchange. Exceptions never escape the
/// client; failures arrive here as `Error`.
#[derive(Debug, Clone)]
pub enum ExchangeOutcome {
    Success(LinkedCredentials),
    Error { message: String },
}

/// RPC seam for the QR session endpoints.
///
/// The controller is generic over this trait so tests can script responses
/// without a server.
pub trait SessionRpc: Send + Sync {
    /// Create a QR login session.
    ///
    /// Returns the server-assigned session id, or the empty string on
    /// transport failure or a missing id (callers treat empty as failure).
    fn create_session(&self) -> impl Future<Output = String> + Send;

    /// Poll the status of a session.
    ///
    /// Transport failures and absent statuses both read as `Pending`.
    fn poll_status(&self, session_id: &str) -> impl Future<Output = SessionStatus> + Send;

    /// Exchange a linked session for provider credentials.
    fn exchange_for_credentials(
        &self,
        session_id: &str,
    ) -> impl Future<Output = ExchangeOutcome> + Send;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckSessionResponse {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompleteLoginResponse {
    status: String,
    #[serde(default)]
    data: Option<LinkedCredentials>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP implementation of [`SessionRpc`].
#[derive(Clone)]
pub struct HttpSessionClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpSessionClient {
    /// Create a client against the given API origin.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Build the URL for an auth endpoint.
    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/{}", self.base_url, endpoint)
    }
}

impl SessionRpc for HttpSessionClient {
    async fn create_session(&self) -> String {
        let url = self.auth_url("generate-qr-session");
        debug!(url = %url, "Creating QR session");

        let response = match self
            .http_client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "QR session creation request failed");
                return String::new();
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "QR session creation rejected");
            return String::new();
        }

        match response.json::<CreateSessionResponse>().await {
            Ok(body) => body.session_id.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "QR session creation returned invalid body");
                String::new()
            }
        }
    }

    async fn poll_status(&self, session_id: &str) -> SessionStatus {
        let url = format!(
            "{}?sessionId={}",
            self.auth_url("check-qr-session"),
            session_id
        );

        let response = match self.http_client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                // Transient blip during a multi-minute polling window; the
                // next tick retries.
                debug!(error = %e, "QR status poll failed");
                return SessionStatus::Pending;
            }
        };

        let body = match response.json::<CheckSessionResponse>().await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "QR status poll returned invalid body");
                return SessionStatus::Pending;
            }
        };

        match body.status.as_deref() {
            Some("linked") => SessionStatus::Linked,
            _ => SessionStatus::Pending,
        }
    }

    async fn exchange_for_credentials(&self, session_id: &str) -> ExchangeOutcome {
        let url = self.auth_url("complete-qr-login");
        debug!(url = %url, session_id = %session_id, "Exchanging QR session for credentials");

        let response = match self
            .http_client
            .post(&url)
            .json(&serde_json::json!({ "sessionId": session_id }))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                return ExchangeOutcome::Error {
                    message: e.to_string(),
                }
            }
        };

        let body = match response.json::<CompleteLoginResponse>().await {
            Ok(body) => body,
            Err(e) => {
                return ExchangeOutcome::Error {
                    message: e.to_string(),
                }
            }
        };

        match (body.status.as_str(), body.data) {
            ("success", Some(credentials)) => ExchangeOutcome::Success(credentials),
            _ => ExchangeOutcome::Error {
                message: body
                    .message
                    .unwrap_or_else(|| "QR login exchange failed".to_string()),
            },
        }
    }
}
