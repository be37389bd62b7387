// ============================================
// File: crates/callhome-server/src/handlers/connection.rs
// ============================================
//! # Connection Handler
//!
//! ## Creation Reason
//! Drives one accepted call-home connection through its whole lifecycle,
//! from the SSH handshake to the moment it leaves the registry.
//!
//! ## Main Functionality
//! - `DecisionVerifier`: host-key hook running the authorization engine
//!   on the blocking pool under a timeout
//! - `ConnectionHandler::run`: handshake → decide → authenticate →
//!   register → activate → wait → retire
//! - `ConnectionContext::retire`: the single exit from `Active`
//!
//! ## Processing Flow
//! ```text
//! establish(stream) ──► verify(host key) ──► decide() ── Rejected ──► close(immediate)
//!                                              │
//!                                          Accepted(id, config)
//!                                              ▼
//!                          authenticate(username, one credential) ── fail/timeout ──► close(immediate)
//!                                              ▼
//!                          registry.create_if_not_exists ── taken ──► close(graceful)
//!                                              ▼
//!                 Active: sessionCreated, then access document written
//!                                              ▼
//!            select { transport closed | terminate | shutdown } ──► retire
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `retire` is synchronous and may be called from anywhere; only the
//!   caller that claims the session's retirement notifies
//! - `retire` deletes the access document while the session still holds
//!   its registry slot, so a successor's document is never touched
//! - The handshake itself is bounded by the controller connect timeout;
//!   authentication by the device's own timeout when it has one
//! - A decision that times out is abandoned, not cancelled: the blocking
//!   task runs on, and a reactive provisioner may still persist the
//!   device. The connection is rejected regardless; the next call from
//!   that device is authorized through the stored config
//!
//! ## Last Modified
//! v0.1.0 - Initial connection lifecycle

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use callhome_common::ConnectionId;
use callhome_core::device::{AccessDocument, ACCESS_CONFIG_KEY, DEVICES_SUBJECT};
use callhome_core::HostKey;
use callhome_transport::{
    BoxedStream, CloseMode, HostKeyVerifier, PeerInfo, SshConnector, TransportError,
};

use crate::config::ControllerConfig;
use crate::error::ServerError;
use crate::services::authorization::{AuthorizationDecision, AuthorizationEngine};
use crate::services::listeners::ListenerSet;
use crate::services::registry::SessionRegistry;
use crate::services::session::{Session, SessionState, StateCell};
use crate::store::ConfigStore;

// ============================================
// ConnectionOutcome
// ============================================

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Handshake failed or the host key was refused.
    Rejected,
    /// The device refused our credentials, or did not answer in time.
    AuthFailed,
    /// Another session for the same device was already live.
    DuplicateSuppressed,
    /// The session was active and has been retired.
    Closed,
}

// ============================================
// Timeouts
// ============================================

/// Time limits applied per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// Handshake budget and default authentication budget.
    pub connect: Duration,
    /// Default idle timeout.
    pub idle: Duration,
    /// Budget for one authorization decision.
    pub decision: Duration,
}

impl ConnectionTimeouts {
    /// Reads the limits from the controller configuration.
    #[must_use]
    pub const fn from_config(config: &ControllerConfig) -> Self {
        Self {
            connect: config.timeouts.connect(),
            idle: config.timeouts.idle(),
            decision: config.limits.decision_timeout(),
        }
    }
}

// ============================================
// ConnectionContext
// ============================================

/// Everything a connection task shares with the controller.
pub struct ConnectionContext {
    /// Device config store.
    pub store: Arc<dyn ConfigStore>,
    /// Host key decisions.
    pub engine: Arc<AuthorizationEngine>,
    /// Live sessions.
    pub registry: Arc<SessionRegistry>,
    /// Upper-layer callbacks.
    pub listeners: Arc<ListenerSet>,
    /// SSH client implementation.
    pub connector: Arc<dyn SshConnector>,
    /// Time limits.
    pub timeouts: ConnectionTimeouts,
}

impl ConnectionContext {
    /// Takes `session` out of `Active`.
    ///
    /// Returns `true` for the one caller that actually removed it; that
    /// caller has removed the access document and fired `sessionRemoved`.
    pub fn retire(&self, session: &Arc<Session>, reason: &str) -> bool {
        let device_id = session.device_id();
        let registered = self
            .registry
            .get(device_id)
            .is_some_and(|current| Arc::ptr_eq(&current, session));
        if !registered || !session.claim_retirement() {
            return false;
        }

        self.store.remove_document(device_id, ACCESS_CONFIG_KEY);
        self.registry.remove_if_same(session);
        if let Err(e) = session.transition(SessionState::Closed) {
            warn!(device_id = %device_id, error = %e, "Retiring session in unexpected state");
        }
        self.listeners.session_removed(device_id);
        info!(
            device_id = %device_id,
            connection_id = %session.connection_id(),
            age_secs = session.age().as_secs(),
            reason,
            "Call-home session removed"
        );
        true
    }

    /// Runs the `Active` entry actions.
    fn activate(&self, session: &Arc<Session>) {
        let device_id = session.device_id();
        let Some(config) = self.store.get_config(device_id) else {
            warn!(
                error = %ServerError::ConfigMissing(device_id.clone()),
                "Session active without config; listeners not notified"
            );
            return;
        };

        self.listeners.session_created(device_id);

        let access =
            AccessDocument::for_session(&config, session.username(), session.remote_address());
        if let Err(e) =
            self.store
                .apply_config(DEVICES_SUBJECT, device_id, ACCESS_CONFIG_KEY, access.to_value())
        {
            warn!(device_id = %device_id, error = %e, "Failed to publish access document");
        }
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("registry", &self.registry)
            .field("listeners", &self.listeners)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

// ============================================
// DecisionVerifier
// ============================================

/// Host-key hook that records the authorization decision.
pub struct DecisionVerifier {
    engine: Arc<AuthorizationEngine>,
    timeout: Duration,
    state: Arc<StateCell>,
    decision: Mutex<Option<AuthorizationDecision>>,
}

impl DecisionVerifier {
    fn new(engine: Arc<AuthorizationEngine>, timeout: Duration, state: Arc<StateCell>) -> Self {
        Self {
            engine,
            timeout,
            state,
            decision: Mutex::new(None),
        }
    }

    fn take_decision(&self) -> Option<AuthorizationDecision> {
        self.decision.lock().take()
    }
}

#[async_trait]
impl HostKeyVerifier for DecisionVerifier {
    async fn verify(&self, peer: SocketAddr, host_key: &HostKey) -> bool {
        if self.state.transition(SessionState::KeyEstablished).is_err() {
            return false;
        }

        let engine = Arc::clone(&self.engine);
        let key = host_key.clone();
        let abandoned = Arc::new(AtomicBool::new(false));
        let late = Arc::clone(&abandoned);
        let task = tokio::task::spawn_blocking(move || {
            let decision = engine.decide(peer, &key);
            if late.load(Ordering::Acquire) {
                if let AuthorizationDecision::Accepted { session_name, .. } = &decision {
                    warn!(
                        peer = %peer,
                        device_id = %session_name,
                        "Authorization finished after its timeout; connection was already rejected"
                    );
                }
            }
            decision
        });

        let decision = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "Authorization decision task failed");
                AuthorizationDecision::Rejected
            }
            Err(_) => {
                abandoned.store(true, Ordering::Release);
                warn!(
                    peer = %peer,
                    timeout_ms = self.timeout.as_millis(),
                    "Authorization decision timed out"
                );
                AuthorizationDecision::Rejected
            }
        };

        let accepted = decision.is_accepted();
        *self.decision.lock() = Some(decision);
        accepted
    }
}

// ============================================
// ConnectionHandler
// ============================================

/// Per-connection lifecycle driver.
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    ctx: Arc<ConnectionContext>,
}

impl ConnectionHandler {
    /// Creates a handler over shared context.
    #[must_use]
    pub const fn new(ctx: Arc<ConnectionContext>) -> Self {
        Self { ctx }
    }

    /// Shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.ctx
    }

    /// Runs one connection to completion.
    ///
    /// `shutdown` carries `Some(mode)` once the acceptor is closing.
    pub async fn run(
        &self,
        stream: BoxedStream,
        peer: PeerInfo,
        mut shutdown: watch::Receiver<Option<CloseMode>>,
    ) -> ConnectionOutcome {
        let ctx = &self.ctx;
        let connection_id = ConnectionId::generate();
        let state = Arc::new(StateCell::new(SessionState::Connecting));
        let verifier = Arc::new(DecisionVerifier::new(
            Arc::clone(&ctx.engine),
            ctx.timeouts.decision,
            Arc::clone(&state),
        ));

        debug!(peer = %peer.addr, %connection_id, "Starting SSH client handshake");

        // Handshake + host key decision
        let established = tokio::time::timeout(
            ctx.timeouts.connect,
            ctx.connector
                .establish(stream, peer, Arc::clone(&verifier) as Arc<dyn HostKeyVerifier>),
        )
        .await;

        let transport = match established {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                let _ = state.transition(SessionState::Rejected);
                if matches!(e, TransportError::HostKeyRejected { .. }) {
                    info!(
                        peer = %peer.addr,
                        error = %ServerError::AuthorizationRejected { peer: peer.addr },
                        "Connection rejected"
                    );
                } else if e.is_per_connection() {
                    info!(peer = %peer.addr, error = %e, "SSH handshake failed");
                } else {
                    warn!(peer = %peer.addr, error = %e, "Connection lost during SSH handshake");
                }
                return ConnectionOutcome::Rejected;
            }
            Err(_) => {
                let _ = state.transition(SessionState::Rejected);
                warn!(peer = %peer.addr, "SSH handshake timed out");
                return ConnectionOutcome::Rejected;
            }
        };

        let Some(AuthorizationDecision::Accepted {
            session_name,
            config,
        }) = verifier.take_decision()
        else {
            let _ = state.transition(SessionState::Rejected);
            warn!(peer = %peer.addr, "Transport established without an accepted host key");
            transport.close(CloseMode::Immediate).await;
            return ConnectionOutcome::Rejected;
        };

        // Authentication
        if let Err(e) = state.transition(SessionState::Authorizing) {
            warn!(peer = %peer.addr, error = %e, "Lifecycle out of order");
            transport.close(CloseMode::Immediate).await;
            return ConnectionOutcome::Rejected;
        }

        let auth_timeout = config.connect_timeout_or(ctx.timeouts.connect);
        let failure = match config.credential() {
            None => Some("no password or key configured".to_string()),
            Some(credential) => {
                match tokio::time::timeout(
                    auth_timeout,
                    transport.authenticate(&config.username, &credential),
                )
                .await
                {
                    Ok(Ok(true)) => None,
                    Ok(Ok(false)) => Some(format!("{} refused", credential.method())),
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("no answer within {}ms", auth_timeout.as_millis())),
                }
            }
        };

        if let Some(reason) = failure {
            let _ = state.transition(SessionState::Rejected);
            warn!(
                peer = %peer.addr,
                error = %ServerError::auth_failure(session_name, config.username.as_str(), reason),
                "Call-home authentication failed"
            );
            transport.close(CloseMode::Immediate).await;
            return ConnectionOutcome::AuthFailed;
        }
        let _ = state.transition(SessionState::Authenticated);

        // Registration
        let idle = config.idle_timeout_or(ctx.timeouts.idle);
        let session = Arc::new(Session::new(
            session_name,
            connection_id,
            config,
            Arc::clone(&transport),
            idle,
        ));

        if !ctx.registry.create_if_not_exists(Arc::clone(&session)) {
            let _ = session.transition(SessionState::Closed);
            debug!(
                device_id = %session.device_id(),
                peer = %peer.addr,
                "Duplicate call-home session suppressed"
            );
            transport.close(CloseMode::Graceful).await;
            return ConnectionOutcome::DuplicateSuppressed;
        }

        if let Err(e) = session.transition(SessionState::Active) {
            warn!(device_id = %session.device_id(), error = %e, "Lifecycle out of order");
            ctx.retire(&session, "activation failed");
            transport.close(CloseMode::Immediate).await;
            return ConnectionOutcome::Closed;
        }

        info!(
            device_id = %session.device_id(),
            peer = %peer.addr,
            %connection_id,
            fingerprint = %session.server_host_key().fingerprint(),
            "Call-home session active"
        );
        ctx.activate(&session);

        // Wait for the end
        let (close_mode, reason) = tokio::select! {
            () = transport.closed() => (None, "transport closed"),
            mode = session.terminated() => (Some(mode), "terminated"),
            mode = wait_for_shutdown(&mut shutdown) => (Some(mode), "controller shutdown"),
        };

        ctx.retire(&session, reason);
        if let Some(mode) = close_mode {
            transport.close(mode).await;
        }
        ConnectionOutcome::Closed
    }
}

/// Resolves with the requested close mode; never resolves if the sender
/// goes away without asking.
pub(crate) async fn wait_for_shutdown(
    shutdown: &mut watch::Receiver<Option<CloseMode>>,
) -> CloseMode {
    let requested = shutdown.wait_for(Option::is_some).await.map(|mode| *mode);
    match requested {
        Ok(mode) => mode.unwrap_or(CloseMode::Graceful),
        Err(_) => std::future::pending().await,
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use callhome_common::DeviceId;
    use callhome_transport::{MockAuth, MockConnector};

    use crate::services::listeners::CallHomeListener;
    use crate::store::MemoryConfigStore;
    use crate::testing::{addr, device_builder, host_key, wait_until};

    struct Fixture {
        handler: ConnectionHandler,
        connector: Arc<MockConnector>,
        store: Arc<MemoryConfigStore>,
        created: Arc<AtomicUsize>,
        removed: Arc<AtomicUsize>,
        shutdown: watch::Sender<Option<CloseMode>>,
    }

    impl Fixture {
        fn new(connect: Duration) -> Self {
            Self::with_decision(connect, Duration::from_secs(2))
        }

        fn with_decision(connect: Duration, decision: Duration) -> Self {
            let store = Arc::new(MemoryConfigStore::new());
            let listeners = Arc::new(ListenerSet::new());
            let connector = Arc::new(MockConnector::new());
            let engine = Arc::new(AuthorizationEngine::new(
                Arc::clone(&store) as Arc<dyn ConfigStore>,
                Arc::clone(&listeners),
            ));

            let created = Arc::new(AtomicUsize::new(0));
            let removed = Arc::new(AtomicUsize::new(0));
            let (c, r) = (Arc::clone(&created), Arc::clone(&removed));
            listeners.add(
                CallHomeListener::new()
                    .on_session_created(move |_| {
                        c.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_session_removed(move |_| {
                        r.fetch_add(1, Ordering::SeqCst);
                    }),
            );

            let ctx = Arc::new(ConnectionContext {
                store: Arc::clone(&store) as Arc<dyn ConfigStore>,
                engine,
                registry: Arc::new(SessionRegistry::new()),
                listeners,
                connector: Arc::clone(&connector) as Arc<dyn SshConnector>,
                timeouts: ConnectionTimeouts {
                    connect,
                    idle: Duration::from_secs(300),
                    decision,
                },
            });
            let (shutdown, _) = watch::channel(None);
            Self {
                handler: ConnectionHandler::new(ctx),
                connector,
                store,
                created,
                removed,
                shutdown,
            }
        }

        fn seed(&self, id: &str, seed: u8) {
            let device = device_builder(id, seed).build().unwrap();
            self.store
                .apply_documents(DEVICES_SUBJECT, &device.id, device.documents())
                .unwrap();
        }

        fn spawn(&self, peer: &str) -> tokio::task::JoinHandle<ConnectionOutcome> {
            let handler = self.handler.clone();
            let shutdown = self.shutdown.subscribe();
            let peer = PeerInfo::new(addr(peer));
            tokio::spawn(async move {
                let (stream, _) = tokio::io::duplex(64);
                handler.run(Box::new(stream), peer, shutdown).await
            })
        }

        fn registry(&self) -> &SessionRegistry {
            &self.handler.context().registry
        }
    }

    #[tokio::test]
    async fn test_known_device_lifecycle() {
        let fx = Fixture::new(Duration::from_secs(2));
        fx.seed("netconf:192.0.2.10:830", 1);
        fx.connector.script(addr("203.0.113.5:22"), host_key(1), MockAuth::Accept);

        let task = fx.spawn("203.0.113.5:22");
        let id = DeviceId::new("netconf:192.0.2.10:830");
        wait_until(|| fx.store.get_document(&id, ACCESS_CONFIG_KEY).is_some()).await;

        let session = fx.registry().get(&id).unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(fx.created.load(Ordering::SeqCst), 1);

        let access = AccessDocument::from_value(
            &fx.store.get_document(&id, ACCESS_CONFIG_KEY).unwrap(),
        )
        .unwrap();
        assert_eq!(access.ip, "203.0.113.5");
        assert_eq!(access.port, 22);
        assert_eq!(access.username, "netconf");

        let mock = fx.connector.session_for(addr("203.0.113.5:22")).unwrap();
        assert_eq!(mock.auth_attempts(), vec![("netconf".to_string(), "password")]);

        fx.connector.disconnect_peer(addr("203.0.113.5:22"));
        assert_eq!(task.await.unwrap(), ConnectionOutcome::Closed);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(fx.registry().get(&id).is_none());
        assert!(fx.store.get_document(&id, ACCESS_CONFIG_KEY).is_none());
        assert_eq!(fx.removed.load(Ordering::SeqCst), 1);
        assert!(mock.close_mode().is_none());
    }

    #[tokio::test]
    async fn test_unknown_key_rejected() {
        let fx = Fixture::new(Duration::from_secs(2));
        fx.seed("netconf:192.0.2.10:830", 1);
        fx.connector.script(addr("203.0.113.5:22"), host_key(2), MockAuth::Accept);

        let outcome = fx.spawn("203.0.113.5:22").await.unwrap();
        assert_eq!(outcome, ConnectionOutcome::Rejected);
        assert_eq!(fx.connector.handshakes(), vec![(addr("203.0.113.5:22"), false)]);
        assert_eq!(fx.registry().count(), 0);
        assert_eq!(fx.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_refused_closes_immediately() {
        let fx = Fixture::new(Duration::from_secs(2));
        fx.seed("netconf:192.0.2.10:830", 1);
        fx.connector.script(addr("203.0.113.5:22"), host_key(1), MockAuth::Reject);

        let outcome = fx.spawn("203.0.113.5:22").await.unwrap();
        assert_eq!(outcome, ConnectionOutcome::AuthFailed);
        let mock = fx.connector.session_for(addr("203.0.113.5:22")).unwrap();
        assert_eq!(mock.close_mode(), Some(CloseMode::Immediate));
        assert_eq!(fx.registry().count(), 0);
        assert_eq!(fx.removed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_timeout_closes_immediately() {
        let fx = Fixture::new(Duration::from_millis(100));
        fx.seed("netconf:192.0.2.10:830", 1);
        fx.connector.script(addr("203.0.113.5:22"), host_key(1), MockAuth::Hang);

        let outcome = fx.spawn("203.0.113.5:22").await.unwrap();
        assert_eq!(outcome, ConnectionOutcome::AuthFailed);
        let mock = fx.connector.session_for(addr("203.0.113.5:22")).unwrap();
        assert_eq!(mock.close_mode(), Some(CloseMode::Immediate));
    }

    #[tokio::test]
    async fn test_duplicate_suppressed_incumbent_kept() {
        let fx = Fixture::new(Duration::from_secs(2));
        fx.seed("netconf:192.0.2.10:830", 1);
        fx.connector.script_default(host_key(1), MockAuth::Accept);

        let first = fx.spawn("203.0.113.5:22");
        let id = DeviceId::new("netconf:192.0.2.10:830");
        wait_until(|| fx.store.get_document(&id, ACCESS_CONFIG_KEY).is_some()).await;
        let incumbent = fx.registry().get(&id).unwrap();

        let outcome = fx.spawn("203.0.113.6:22").await.unwrap();
        assert_eq!(outcome, ConnectionOutcome::DuplicateSuppressed);
        let dup = fx.connector.session_for(addr("203.0.113.6:22")).unwrap();
        assert_eq!(dup.close_mode(), Some(CloseMode::Graceful));

        let still = fx.registry().get(&id).unwrap();
        assert!(Arc::ptr_eq(&incumbent, &still));
        assert_eq!(fx.created.load(Ordering::SeqCst), 1);
        assert_eq!(fx.removed.load(Ordering::SeqCst), 0);

        incumbent.terminate(CloseMode::Immediate);
        assert_eq!(first.await.unwrap(), ConnectionOutcome::Closed);
        let mock = fx.connector.session_for(addr("203.0.113.5:22")).unwrap();
        assert_eq!(mock.close_mode(), Some(CloseMode::Immediate));
        assert_eq!(fx.removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_with_requested_mode() {
        let fx = Fixture::new(Duration::from_secs(2));
        fx.seed("netconf:192.0.2.10:830", 1);
        fx.connector.script_default(host_key(1), MockAuth::Accept);

        let task = fx.spawn("203.0.113.5:22");
        wait_until(|| fx.registry().count() == 1).await;

        fx.shutdown.send_replace(Some(CloseMode::Graceful));
        assert_eq!(task.await.unwrap(), ConnectionOutcome::Closed);
        let mock = fx.connector.session_for(addr("203.0.113.5:22")).unwrap();
        assert_eq!(mock.close_mode(), Some(CloseMode::Graceful));
        assert_eq!(fx.removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retire_is_exactly_once() {
        let fx = Fixture::new(Duration::from_secs(2));
        fx.seed("netconf:192.0.2.10:830", 1);
        fx.connector.script_default(host_key(1), MockAuth::Accept);

        let task = fx.spawn("203.0.113.5:22");
        let id = DeviceId::new("netconf:192.0.2.10:830");
        wait_until(|| fx.registry().count() == 1).await;
        let session = fx.registry().get(&id).unwrap();

        let ctx = fx.handler.context();
        assert!(ctx.retire(&session, "test"));
        assert!(!ctx.retire(&session, "test"));
        session.terminate(CloseMode::Graceful);
        assert_eq!(task.await.unwrap(), ConnectionOutcome::Closed);
        assert_eq!(fx.removed.load(Ordering::SeqCst), 1);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_run_future_is_send() {
        let fx = Fixture::new(Duration::from_secs(2));
        let (stream, _) = tokio::io::duplex(64);
        let run = fx.handler.run(
            Box::new(stream),
            PeerInfo::new(addr("203.0.113.5:22")),
            fx.shutdown.subscribe(),
        );
        assert_send(&run);

        let mut shutdown = fx.shutdown.subscribe();
        let wait = async move { wait_for_shutdown(&mut shutdown).await };
        assert_send(&wait);
    }

    #[tokio::test]
    async fn test_slow_decision_rejects_connection() {
        let fx = Fixture::with_decision(Duration::from_secs(2), Duration::from_millis(100));
        fx.connector.script_default(host_key(7), MockAuth::Accept);
        fx.handler.context().listeners.add(CallHomeListener::new().on_session_auth_failed(
            |_, key| {
                std::thread::sleep(Duration::from_millis(500));
                callhome_core::DeviceConfigBuilder::new(
                    DeviceId::new("netconf0.0.0.0:0"),
                    key.to_openssh(),
                    "netconf",
                )
                .password("pw")
                .build()
                .ok()
            },
        ));

        let outcome = fx.spawn("203.0.113.5:22").await.unwrap();
        assert_eq!(outcome, ConnectionOutcome::Rejected);
        assert_eq!(fx.connector.handshakes(), vec![(addr("203.0.113.5:22"), false)]);
        assert_eq!(fx.registry().count(), 0);
        assert_eq!(fx.created.load(Ordering::SeqCst), 0);

        // The abandoned decision still lands in the store.
        let id = DeviceId::new("netconf0.0.0.0:0");
        wait_until(|| fx.store.get_config(&id).is_some()).await;
        assert_eq!(fx.registry().count(), 0);
    }

    #[tokio::test]
    async fn test_retire_spares_successor_document() {
        let fx = Fixture::new(Duration::from_secs(2));
        fx.seed("netconf:192.0.2.10:830", 1);
        fx.connector.script_default(host_key(1), MockAuth::Accept);
        let id = DeviceId::new("netconf:192.0.2.10:830");

        let first = fx.spawn("203.0.113.5:22");
        wait_until(|| fx.store.get_document(&id, ACCESS_CONFIG_KEY).is_some()).await;
        let incumbent = fx.registry().get(&id).unwrap();
        incumbent.terminate(CloseMode::Graceful);
        assert_eq!(first.await.unwrap(), ConnectionOutcome::Closed);
        assert!(fx.store.get_document(&id, ACCESS_CONFIG_KEY).is_none());

        let second = fx.spawn("203.0.113.6:22");
        wait_until(|| fx.store.get_document(&id, ACCESS_CONFIG_KEY).is_some()).await;
        let successor = fx.registry().get(&id).unwrap();
        assert!(!Arc::ptr_eq(&incumbent, &successor));

        // A late retire of the old session must not touch the new one.
        assert!(!fx.handler.context().retire(&incumbent, "late"));
        let access = AccessDocument::from_value(
            &fx.store.get_document(&id, ACCESS_CONFIG_KEY).unwrap(),
        )
        .unwrap();
        assert_eq!(access.ip, "203.0.113.6");
        assert_eq!(fx.removed.load(Ordering::SeqCst), 1);

        successor.terminate(CloseMode::Graceful);
        assert_eq!(second.await.unwrap(), ConnectionOutcome::Closed);
        assert_eq!(fx.removed.load(Ordering::SeqCst), 2);
    }
}
