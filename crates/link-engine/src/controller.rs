//! Polling controller for the QR handshake.
//!
//! Owns the QR session for its lifetime: generates it, encodes the payload
//! for display, polls the status endpoint on a fixed interval, enforces a
//! one-shot expiry, and on a successful link drives the credential exchange
//! and session materialization.
//!
//! Timer discipline: at most one poll/expiry timer pair is live at any
//! time. Every refresh or deactivation bumps a generation counter and tears
//! down the previous timers. Cancellation is cooperative — an in-flight
//! poll request may still resolve after its timers are gone — so every
//! result handler re-checks its generation and the FSM phase before acting.
//! The generation check catches superseded sessions; the FSM transition
//! catches phase races (a `linked` result arriving after expiry).

use crate::client::{ExchangeOutcome, LinkedCredentials, SessionRpc, SessionStatus};
use crate::config::LinkConfig;
use crate::fsm::{HandshakePhase, LinkMachine, LinkMachineInput};
use crate::jwt::decode_iat;
use crate::payload::QrPayload;
use crate::{LinkError, LinkResult};
use auth_events::{AuthEvent, AuthEventBus};
use chrono::Utc;
use session_vault::{MaterializedSession, SessionVault, SignInDetails, TokenEntry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, info, warn};

/// Auth flow type recorded in the sign-in details. The provider treats the
/// QR exchange as a custom auth flow.
const AUTH_FLOW_TYPE: &str = "CUSTOM_WITHOUT_SRP";

/// Callback type for handshake phase change notifications.
pub type PhaseCallback = Box<dyn Fn(HandshakePhase) + Send + Sync>;

/// The QR session currently on display.
#[derive(Debug, Clone)]
struct ActiveSession {
    session_id: String,
    encoded_payload: String,
}

/// QR handshake controller.
///
/// Cheap to clone; clones share the same handshake state. The controller is
/// generic over [`SessionRpc`] so tests can script the server side.
pub struct HandshakeController<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for HandshakeController<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<C> {
    client: C,
    vault: SessionVault,
    events: AuthEventBus,
    config: LinkConfig,
    /// Internal FSM tracking the handshake phase.
    machine: Mutex<LinkMachine>,
    /// Current session generation. Bumped on every refresh/deactivation;
    /// timer callbacks and poll results carrying an older generation no-op.
    generation: AtomicU64,
    /// Stop channel for the live poll loop, if any.
    stop_tx: Mutex<Option<broadcast::Sender<()>>>,
    /// Session currently on display.
    active: Mutex<Option<ActiveSession>>,
    /// Session produced by the last successful materialization.
    materialized: Mutex<Option<MaterializedSession>>,
    /// Last user-facing failure message.
    last_error: Mutex<Option<String>>,
    /// Optional callback for phase change notifications.
    phase_callback: Mutex<Option<PhaseCallback>>,
}

impl<C> HandshakeController<C>
where
    C: SessionRpc + 'static,
{
    /// Create a controller over the given RPC client, vault, and event bus.
    pub fn new(client: C, vault: SessionVault, events: AuthEventBus, config: LinkConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                vault,
                events,
                config,
                machine: Mutex::new(LinkMachine::new()),
                generation: AtomicU64::new(0),
                stop_tx: Mutex::new(None),
                active: Mutex::new(None),
                materialized: Mutex::new(None),
                last_error: Mutex::new(None),
                phase_callback: Mutex::new(None),
            }),
        }
    }

    /// Current handshake phase.
    pub fn phase(&self) -> HandshakePhase {
        self.inner.phase()
    }

    /// Encoded payload of the session on display, if any.
    pub fn encoded_payload(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|s| s.encoded_payload.clone())
    }

    /// Id of the session on display, if any.
    pub fn session_id(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|s| s.session_id.clone())
    }

    /// Session produced by the last successful materialization.
    pub fn materialized_session(&self) -> Option<MaterializedSession> {
        self.inner
            .materialized
            .lock()
            .expect("lock poisoned")
            .clone()
    }

    /// Last user-facing failure message, if any.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().expect("lock poisoned").clone()
    }

    /// Set a callback to be notified of phase changes.
    pub fn set_phase_callback(&self, callback: PhaseCallback) {
        let mut cb = self.inner.phase_callback.lock().expect("lock poisoned");
        *cb = Some(callback);
    }

    /// Start (or restart) a QR session.
    ///
    /// Idempotent re-entry into `Generating` from any phase: any previous
    /// poll loop and expiry timer are torn down first, so after N refreshes
    /// exactly one timer pair is live. On success the new session's payload
    /// is available via [`encoded_payload`](Self::encoded_payload) and
    /// polling runs until link, expiry, refresh, or deactivation.
    pub async fn refresh(&self) -> LinkResult<()> {
        let inner = &self.inner;
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.teardown_timers();
        *inner.active.lock().expect("lock poisoned") = None;
        *inner.last_error.lock().expect("lock poisoned") = None;
        inner.transition(&LinkMachineInput::Refresh)?;

        debug!(generation, "Generating QR session");
        let session_id = inner.client.create_session().await;

        // A refresh or deactivation superseded this attempt while the
        // creation request was in flight.
        if !inner.is_current(generation) {
            debug!(generation, "Discarding superseded QR session");
            return Ok(());
        }

        if session_id.is_empty() {
            warn!("QR session creation failed");
            *inner.last_error.lock().expect("lock poisoned") =
                Some("Failed to generate QR code. Please try again.".to_string());
            inner.transition(&LinkMachineInput::CreateFailed)?;
            return Err(LinkError::SessionCreateFailed);
        }

        let payload = QrPayload::new(
            inner.config.payload_type.as_str(),
            session_id.as_str(),
            Utc::now(),
            inner.config.session_ttl,
        );
        let encoded_payload = payload.encode()?;
        *inner.active.lock().expect("lock poisoned") = Some(ActiveSession {
            session_id: session_id.clone(),
            encoded_payload,
        });
        inner.transition(&LinkMachineInput::SessionCreated)?;
        info!(session_id = %session_id, "QR session on display, polling for link");

        let (stop_tx, stop_rx) = broadcast::channel(1);
        *inner.stop_tx.lock().expect("lock poisoned") = Some(stop_tx);
        tokio::spawn(Inner::run_poll_loop(
            inner.clone(),
            generation,
            session_id,
            stop_rx,
        ));

        Ok(())
    }

    /// Abandon the current session and return to `Idle`.
    ///
    /// Cancels both timers unconditionally and is safe to call at any time,
    /// including when nothing is running. The session is not invalidated
    /// server-side; it ages out on its own TTL.
    pub fn deactivate(&self) {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.teardown_timers();
        *inner.active.lock().expect("lock poisoned") = None;
        inner.transition_if_legal(&LinkMachineInput::Deactivate);
        debug!("QR handshake deactivated");
    }
}

impl<C> Inner<C>
where
    C: SessionRpc + 'static,
{
    fn phase(&self) -> HandshakePhase {
        let machine = self.machine.lock().expect("lock poisoned");
        HandshakePhase::from(machine.state())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Transition the FSM, notifying the phase callback on change.
    fn transition(&self, input: &LinkMachineInput) -> LinkResult<HandshakePhase> {
        let mut machine = self.machine.lock().expect("lock poisoned");
        let old_phase = HandshakePhase::from(machine.state());

        machine.consume(input).map_err(|_| {
            LinkError::InvalidStateTransition(format!(
                "cannot apply {:?} in phase {:?}",
                input,
                machine.state()
            ))
        })?;

        let new_phase = HandshakePhase::from(machine.state());
        drop(machine);

        if old_phase != new_phase {
            debug!(?old_phase, ?new_phase, "Handshake phase transition");
            self.notify_phase(new_phase);
        }

        Ok(new_phase)
    }

    /// Transition if the input is legal in the current phase; otherwise
    /// no-op. Used where losing a race is the expected outcome.
    fn transition_if_legal(&self, input: &LinkMachineInput) -> bool {
        self.transition(input).is_ok()
    }

    fn notify_phase(&self, phase: HandshakePhase) {
        let cb = self.phase_callback.lock().expect("lock poisoned");
        if let Some(callback) = cb.as_ref() {
            callback(phase);
        }
    }

    /// Cancel the live poll loop, if any. Idempotent.
    fn teardown_timers(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().expect("lock poisoned").take() {
            // The loop may already have exited on its own; that is fine.
            let _ = stop_tx.send(());
        }
    }

    /// Poll loop for one session generation.
    ///
    /// Runs until stop, expiry, link, or a stale-generation detection. The
    /// expiry branch is preferred over a simultaneous tick so a session
    /// never links at the exact expiry instant.
    async fn run_poll_loop(
        inner: Arc<Self>,
        generation: u64,
        session_id: String,
        mut stop_rx: broadcast::Receiver<()>,
    ) {
        let poll = inner.config.poll_interval;
        let mut ticker = interval_at(Instant::now() + poll, poll);
        let expiry = sleep(inner.config.session_ttl);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.recv() => {
                    debug!(session_id = %session_id, "QR poll loop stopped");
                    break;
                }
                _ = &mut expiry => {
                    inner.on_expiry(generation);
                    break;
                }
                _ = ticker.tick() => {
                    // Expiry stays authoritative while a request is in
                    // flight: a slow poll that resolves linked past the
                    // deadline loses to it instead of stretching the TTL.
                    let status = tokio::select! {
                        biased;
                        _ = &mut expiry => {
                            inner.on_expiry(generation);
                            break;
                        }
                        status = inner.client.poll_status(&session_id) => status,
                    };
                    // The request may have resolved after a refresh or
                    // deactivation; timer cancellation alone cannot stop a
                    // result that was already in flight.
                    if !inner.is_current(generation) {
                        debug!(session_id = %session_id, "Ignoring stale poll result");
                        break;
                    }
                    if status == SessionStatus::Linked {
                        inner.complete_link(generation, &session_id).await;
                        break;
                    }
                }
            }
        }
    }

    /// Expiry timer handler. Terminal until an explicit refresh.
    fn on_expiry(&self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        // Loses against a link that already transitioned us out of
        // Displaying; expiry then has no effect.
        if self.transition_if_legal(&LinkMachineInput::Expire) {
            info!("QR session expired before being linked");
            self.teardown_timers();
        }
    }

    /// Handle a `linked` poll result: exchange for credentials and
    /// materialize the session.
    async fn complete_link(&self, generation: u64, session_id: &str) {
        if !self.is_current(generation) {
            return;
        }
        // Exactly-once: Linked is only legal from Displaying, so a
        // concurrent expiry or a duplicate poll result is rejected here.
        if !self.transition_if_legal(&LinkMachineInput::Linked) {
            debug!(session_id = %session_id, "Ignoring linked result outside Displaying");
            return;
        }
        self.teardown_timers();
        info!(session_id = %session_id, "QR session linked, exchanging for credentials");

        match self.client.exchange_for_credentials(session_id).await {
            ExchangeOutcome::Success(credentials) => {
                if !self.is_current(generation) {
                    debug!("Discarding credentials for superseded session");
                    return;
                }
                if let Err(e) = self.materialize(&credentials) {
                    warn!(error = %e, "Session materialization failed");
                    *self.last_error.lock().expect("lock poisoned") =
                        Some("Login failed. Please try again.".to_string());
                    self.transition_if_legal(&LinkMachineInput::ExchangeFailed);
                }
            }
            ExchangeOutcome::Error { message } => {
                warn!(message = %message, "QR credential exchange failed");
                *self.last_error.lock().expect("lock poisoned") =
                    Some(LinkError::ExchangeFailed(message).to_string());
                self.transition_if_legal(&LinkMachineInput::ExchangeFailed);
            }
        }
    }

    /// Build and store the provider-shaped session, then announce sign-in.
    ///
    /// All storage writes complete before the `SignedIn` event fires, so
    /// subscribers never observe a partially materialized session.
    fn materialize(&self, credentials: &LinkedCredentials) -> LinkResult<()> {
        self.transition(&LinkMachineInput::ExchangeSucceeded)?;

        let now = Utc::now().timestamp();
        let expires_at = now + self.config.token_lifetime.as_secs() as i64;

        // The drift is a local hint only; an unreadable iat claim is not
        // worth failing the login over.
        let clock_drift = match decode_iat(&credentials.id_token) {
            Some(iat) => now - iat,
            None => {
                warn!("Could not decode iat from id token, defaulting clock drift to 0");
                0
            }
        };

        let session = MaterializedSession {
            access_token: TokenEntry {
                token: credentials.access_token.clone(),
                expires_at,
            },
            id_token: TokenEntry {
                token: credentials.id_token.clone(),
                expires_at,
            },
            refresh_token: credentials.refresh_token.clone(),
            clock_drift,
            sign_in_details: SignInDetails {
                login_id: credentials.phone_number.clone(),
                auth_flow_type: AUTH_FLOW_TYPE.to_string(),
            },
            last_auth_user: credentials.user_id.clone(),
        };

        self.vault.write(&session, &credentials.client_id)?;
        *self.materialized.lock().expect("lock poisoned") = Some(session);

        self.events.publish(AuthEvent::SignedIn {
            user_id: credentials.user_id.clone(),
        });
        self.transition(&LinkMachineInput::Materialized)?;
        info!(user_id = %credentials.user_id, "QR login complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use session_vault::{KeyValueStore, MemoryStore};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Scripted RPC client. Poll results are consumed in order; once the
    /// script runs out, every further poll reads Pending.
    struct ScriptedRpc {
        create_results: Mutex<VecDeque<String>>,
        poll_results: Mutex<VecDeque<SessionStatus>>,
        exchange_result: Mutex<Option<ExchangeOutcome>>,
        /// Simulated network latency for each poll request.
        poll_delay: Mutex<Option<Duration>>,
        create_calls: AtomicUsize,
        poll_calls: AtomicUsize,
        exchange_calls: AtomicUsize,
        polled_sessions: Mutex<Vec<String>>,
    }

    impl ScriptedRpc {
        fn new() -> Self {
            Self {
                create_results: Mutex::new(VecDeque::new()),
                poll_results: Mutex::new(VecDeque::new()),
                exchange_result: Mutex::new(None),
                poll_delay: Mutex::new(None),
                create_calls: AtomicUsize::new(0),
                poll_calls: AtomicUsize::new(0),
                exchange_calls: AtomicUsize::new(0),
                polled_sessions: Mutex::new(Vec::new()),
            }
        }

        fn script_create(&self, id: &str) {
            self.create_results
                .lock()
                .unwrap()
                .push_back(id.to_string());
        }

        fn script_polls(&self, statuses: &[SessionStatus]) {
            self.poll_results.lock().unwrap().extend(statuses.iter().copied());
        }

        fn script_exchange(&self, outcome: ExchangeOutcome) {
            *self.exchange_result.lock().unwrap() = Some(outcome);
        }

        fn script_poll_delay(&self, delay: Duration) {
            *self.poll_delay.lock().unwrap() = Some(delay);
        }

        fn poll_count(&self) -> usize {
            self.poll_calls.load(Ordering::SeqCst)
        }

        fn exchange_count(&self) -> usize {
            self.exchange_calls.load(Ordering::SeqCst)
        }
    }

    impl SessionRpc for Arc<ScriptedRpc> {
        async fn create_session(&self) -> String {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            self.create_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default()
        }

        async fn poll_status(&self, session_id: &str) -> SessionStatus {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            self.polled_sessions
                .lock()
                .unwrap()
                .push(session_id.to_string());
            let delay = *self.poll_delay.lock().unwrap();
            let status = self
                .poll_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SessionStatus::Pending);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            status
        }

        async fn exchange_for_credentials(&self, _session_id: &str) -> ExchangeOutcome {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            self.exchange_result
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(ExchangeOutcome::Error {
                    message: "unscripted".to_string(),
                })
        }
    }

    struct Fixture {
        rpc: Arc<ScriptedRpc>,
        store: Arc<MemoryStore>,
        events: AuthEventBus,
        controller: HandshakeController<Arc<ScriptedRpc>>,
    }

    fn fixture() -> Fixture {
        let rpc = Arc::new(ScriptedRpc::new());
        let store = Arc::new(MemoryStore::new());
        let events = AuthEventBus::new();
        let controller = HandshakeController::new(
            rpc.clone(),
            SessionVault::new(store.clone()),
            events.clone(),
            LinkConfig::with_base_url("http://unused"),
        );
        Fixture {
            rpc,
            store,
            events,
            controller,
        }
    }

    fn token_with_iat(iat: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"iat":{}}}"#, iat).as_bytes());
        format!("{}.{}.sig", header, payload)
    }

    fn success_exchange(id_token: &str) -> ExchangeOutcome {
        ExchangeOutcome::Success(LinkedCredentials {
            access_token: "A".to_string(),
            id_token: id_token.to_string(),
            refresh_token: "R".to_string(),
            phone_number: "+911234567890".to_string(),
            user_id: "u1".to_string(),
            client_id: "c1".to_string(),
        })
    }

    #[tokio::test]
    async fn create_failure_is_a_sentinel_not_a_panic() {
        let f = fixture();
        // No scripted create => empty-string sentinel from the client.
        let result = f.controller.refresh().await;
        assert!(matches!(result, Err(LinkError::SessionCreateFailed)));
        assert_eq!(f.controller.phase(), HandshakePhase::Failed);
        assert!(f.controller.last_error().is_some());
        assert!(f.controller.encoded_payload().is_none());
    }

    #[tokio::test]
    async fn refresh_displays_session_and_payload() {
        let f = fixture();
        f.rpc.script_create("abc123");

        f.controller.refresh().await.unwrap();
        assert_eq!(f.controller.phase(), HandshakePhase::Displaying);
        assert_eq!(f.controller.session_id().as_deref(), Some("abc123"));

        let payload: serde_json::Value =
            serde_json::from_str(&f.controller.encoded_payload().unwrap()).unwrap();
        assert_eq!(payload["type"], "crosslane-qr-login");
        assert_eq!(payload["sessionId"], "abc123");
        assert_eq!(
            payload["expiresAt"].as_i64().unwrap() - payload["timestamp"].as_i64().unwrap(),
            300_000
        );

        f.controller.deactivate();
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_link_scenario() {
        let f = fixture();
        f.rpc.script_create("abc123");
        f.rpc.script_polls(&[
            SessionStatus::Pending,
            SessionStatus::Pending,
            SessionStatus::Linked,
        ]);
        f.rpc.script_exchange(success_exchange(&token_with_iat(1000)));

        let mut rx = f.events.subscribe();

        let before = Utc::now().timestamp();
        f.controller.refresh().await.unwrap();

        // Three ticks at 2 s apart; give the loop room to finish.
        tokio::time::sleep(Duration::from_secs(8)).await;
        let after = Utc::now().timestamp();

        assert_eq!(f.controller.phase(), HandshakePhase::Done);
        assert_eq!(f.rpc.poll_count(), 3);
        assert_eq!(f.rpc.exchange_count(), 1);

        // Exactly one signed-in event.
        assert_eq!(
            rx.try_recv().unwrap(),
            AuthEvent::SignedIn {
                user_id: "u1".to_string()
            }
        );
        assert!(rx.try_recv().is_err());

        // All six fields landed in storage.
        assert_eq!(
            f.store
                .get("CognitoIdentityServiceProvider.c1.LastAuthUser")
                .unwrap(),
            Some("u1".to_string())
        );
        assert_eq!(
            f.store
                .get("CognitoIdentityServiceProvider.c1.u1.accessToken")
                .unwrap(),
            Some("A".to_string())
        );
        assert_eq!(
            f.store
                .get("CognitoIdentityServiceProvider.c1.u1.refreshToken")
                .unwrap(),
            Some("R".to_string())
        );

        let session = f.controller.materialized_session().unwrap();
        assert!(session.access_token.expires_at >= before + 3600);
        assert!(session.access_token.expires_at <= after + 3600);
        assert_eq!(session.id_token.expires_at, session.access_token.expires_at);
        // clock_drift = exchange-time seconds - iat(1000)
        assert!(session.clock_drift >= before - 1000);
        assert!(session.clock_drift <= after - 1000);
        assert_eq!(session.sign_in_details.login_id, "+911234567890");
        assert_eq!(session.last_auth_user, "u1");

        let drift = f
            .store
            .get("CognitoIdentityServiceProvider.c1.u1.clockDrift")
            .unwrap()
            .unwrap();
        assert_eq!(drift, session.clock_drift.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_expiry_scenario() {
        let f = fixture();
        f.rpc.script_create("abc123");
        // Never linked.

        let mut rx = f.events.subscribe();
        f.controller.refresh().await.unwrap();

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(f.controller.phase(), HandshakePhase::Expired);
        assert!(rx.try_recv().is_err());

        // Polling is cleared: the count stops moving even as time passes.
        let polls_at_expiry = f.rpc.poll_count();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(f.rpc.poll_count(), polls_at_expiry);
        assert_eq!(f.rpc.exchange_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_preempts_a_slow_in_flight_poll() {
        let rpc = Arc::new(ScriptedRpc::new());
        rpc.script_create("abc123");
        // The second poll would come back linked, but only after the
        // session's deadline has passed.
        rpc.script_polls(&[SessionStatus::Pending, SessionStatus::Linked]);
        rpc.script_poll_delay(Duration::from_secs(2));

        let events = AuthEventBus::new();
        let mut config = LinkConfig::with_base_url("http://unused");
        config.session_ttl = Duration::from_secs(5);
        let controller = HandshakeController::new(
            rpc.clone(),
            SessionVault::new(Arc::new(MemoryStore::new())),
            events.clone(),
            config,
        );

        let mut rx = events.subscribe();
        controller.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        // The linked result resolved after the deadline; it must not
        // stretch the session's lifetime.
        assert_eq!(controller.phase(), HandshakePhase::Expired);
        assert_eq!(rpc.exchange_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_terminal_until_refresh() {
        let f = fixture();
        f.rpc.script_create("first");

        f.controller.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(f.controller.phase(), HandshakePhase::Expired);

        // Even if the server would now report linked, nothing polls it.
        f.rpc.script_polls(&[SessionStatus::Linked]);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(f.controller.phase(), HandshakePhase::Expired);
        assert_eq!(f.rpc.exchange_count(), 0);

        // An explicit refresh starts over.
        f.rpc.script_create("second");
        f.controller.refresh().await.unwrap();
        assert_eq!(f.controller.phase(), HandshakePhase::Displaying);
        assert_eq!(f.controller.session_id().as_deref(), Some("second"));
        f.controller.deactivate();
    }

    #[tokio::test]
    async fn stale_linked_result_after_expiry_is_rejected() {
        let f = fixture();
        f.rpc.script_create("abc123");
        f.controller.refresh().await.unwrap();

        let generation = f.controller.inner.generation.load(Ordering::SeqCst);

        // Expiry wins the race, then the in-flight poll resolves linked.
        f.controller.inner.on_expiry(generation);
        assert_eq!(f.controller.phase(), HandshakePhase::Expired);

        f.controller.inner.complete_link(generation, "abc123").await;
        assert_eq!(f.controller.phase(), HandshakePhase::Expired);
        assert_eq!(f.rpc.exchange_count(), 0);
    }

    #[tokio::test]
    async fn stale_results_from_superseded_generation_are_ignored() {
        let f = fixture();
        f.rpc.script_create("first");
        f.controller.refresh().await.unwrap();
        let old_generation = f.controller.inner.generation.load(Ordering::SeqCst);

        f.rpc.script_create("second");
        f.controller.refresh().await.unwrap();

        // Late handlers from the first session must not touch the second.
        f.controller
            .inner
            .complete_link(old_generation, "first")
            .await;
        f.controller.inner.on_expiry(old_generation);

        assert_eq!(f.controller.phase(), HandshakePhase::Displaying);
        assert_eq!(f.controller.session_id().as_deref(), Some("second"));
        assert_eq!(f.rpc.exchange_count(), 0);
        f.controller.deactivate();
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_refresh_keeps_a_single_poll_loop() {
        let f = fixture();
        f.rpc.script_create("s1");
        f.rpc.script_create("s2");
        f.rpc.script_create("s3");

        f.controller.refresh().await.unwrap();
        f.controller.refresh().await.unwrap();
        f.controller.refresh().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;

        // Only the latest session is ever polled.
        let polled = f.rpc.polled_sessions.lock().unwrap().clone();
        assert!(!polled.is_empty());
        assert!(polled.iter().all(|id| id == "s3"));
        f.controller.deactivate();
    }

    #[tokio::test]
    async fn deactivate_is_idempotent() {
        let f = fixture();
        f.rpc.script_create("abc123");
        f.controller.refresh().await.unwrap();

        f.controller.deactivate();
        assert_eq!(f.controller.phase(), HandshakePhase::Idle);

        // Second call has no timers to cancel and must not panic.
        f.controller.deactivate();
        assert_eq!(f.controller.phase(), HandshakePhase::Idle);

        // Deactivating a never-activated controller is also fine.
        let g = fixture();
        g.controller.deactivate();
        assert_eq!(g.controller.phase(), HandshakePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn deactivation_stops_polling() {
        let f = fixture();
        f.rpc.script_create("abc123");
        f.controller.refresh().await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let polls_before = f.rpc.poll_count();
        assert!(polls_before >= 1);

        f.controller.deactivate();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(f.rpc.poll_count(), polls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn exchange_error_surfaces_failure_without_retry() {
        let f = fixture();
        f.rpc.script_create("abc123");
        f.rpc.script_polls(&[SessionStatus::Linked]);
        f.rpc.script_exchange(ExchangeOutcome::Error {
            message: "session already consumed".to_string(),
        });

        let mut rx = f.events.subscribe();
        f.controller.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(f.controller.phase(), HandshakePhase::Failed);
        assert!(f.controller.last_error().is_some());
        assert_eq!(f.rpc.exchange_count(), 1);
        assert!(rx.try_recv().is_err());

        // No further polling after the failure.
        let polls = f.rpc.poll_count();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(f.rpc.poll_count(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_id_token_defaults_drift_to_zero() {
        let f = fixture();
        f.rpc.script_create("abc123");
        f.rpc.script_polls(&[SessionStatus::Linked]);
        f.rpc.script_exchange(success_exchange("not-a-jwt"));

        f.controller.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(f.controller.phase(), HandshakePhase::Done);
        let session = f.controller.materialized_session().unwrap();
        assert_eq!(session.clock_drift, 0);
        assert_eq!(
            f.store
                .get("CognitoIdentityServiceProvider.c1.u1.clockDrift")
                .unwrap(),
            Some("0".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn phase_callback_observes_transitions() {
        let f = fixture();
        f.rpc.script_create("abc123");
        f.rpc.script_polls(&[SessionStatus::Linked]);
        f.rpc.script_exchange(success_exchange(&token_with_iat(1000)));

        let phases: Arc<Mutex<Vec<HandshakePhase>>> = Arc::new(Mutex::new(Vec::new()));
        let phases_clone = phases.clone();
        f.controller.set_phase_callback(Box::new(move |phase| {
            phases_clone.lock().unwrap().push(phase);
        }));

        f.controller.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let observed = phases.lock().unwrap().clone();
        assert_eq!(
            observed,
            vec![
                HandshakePhase::Generating,
                HandshakePhase::Displaying,
                HandshakePhase::Linking,
                HandshakePhase::Materializing,
                HandshakePhase::Done,
            ]
        );
    }

    #[tokio::test]
    async fn refresh_clears_previous_error_and_payload() {
        let f = fixture();
        // First attempt fails to create.
        let _ = f.controller.refresh().await;
        assert!(f.controller.last_error().is_some());

        f.rpc.script_create("abc123");
        f.controller.refresh().await.unwrap();
        assert!(f.controller.last_error().is_none());
        assert_eq!(f.controller.phase(), HandshakePhase::Displaying);
        f.controller.deactivate();
    }
}
