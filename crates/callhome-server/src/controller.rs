// ============================================
// File: crates/callhome-server/src/controller.rs
// ============================================
//! # Call-Home Controller
//!
//! ## Creation Reason
//! Single owner of all call-home state: the store handle, the registry,
//! the listeners, the provisioner and the acceptor. Exposes the API the
//! upper protocol layer uses to pick up sessions.
//!
//! ## Main Functionality
//! - Lifecycle: `start`, `reconfigure_port`, `stop`
//! - Upward API: `create_session`, `create_device_info`, `remove_session`,
//!   `session_map`, `add_listener` / `remove_listener`; the NETCONF
//!   channel itself is opened with `Session::open_netconf`
//! - Device management: `register_device`, `unregister_device`
//! - Key helpers: `encode_public_key`, `decode_public_key`
//!
//! ## Controller Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CallHomeController                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//! │  │ Accept loop  │  │ Config-event │  │  Cleanup task    │   │
//! │  │ (acceptor)   │  │    task      │  │                  │   │
//! │  │ new streams  │  │ netconf-ch   │  │ idle sessions    │   │
//! │  │              │  │ upd/removed  │  │                  │   │
//! │  └──────┬───────┘  └──────┬───────┘  └────────┬─────────┘   │
//! │         │                 └──────┬────────────┘             │
//! │         ▼                        ▼                          │
//! │  ConnectionHandler ──► ConnectionContext::retire            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A failed bind does not fail `start`; `reconfigure_port` retries
//! - `stop` clears listeners and sessions; a later `start` re-registers
//!   the provisioner
//! - Streams accepted elsewhere enter through `accept_stream`
//! - If the config-event task lags it re-checks every live session
//!   against the store instead of replaying the lost events
//!
//! ## Last Modified
//! v0.1.0 - Initial controller

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use callhome_common::DeviceId;
use callhome_core::device::{
    AccessDocument, ACCESS_CONFIG_KEY, CALL_HOME_CONFIG_KEY, DEVICES_SUBJECT,
};
use callhome_core::{DeviceConfigBuilder, DeviceInfo, HostKey};
use callhome_transport::{BoxedStream, CloseMode, PeerInfo, SshConnector};

use crate::acceptor::ReverseSshAcceptor;
use crate::config::{validate_port, ControllerConfig};
use crate::error::{Result, ServerError};
use crate::handlers::{ConnectionContext, ConnectionHandler, ConnectionTimeouts};
use crate::services::{
    AuthorizationEngine, CallHomeListener, DurableCounter, ListenerId, ListenerSet,
    ReactiveProvisioner, ReactiveSettings, Session, SessionRegistry, SessionState,
};
use crate::store::{ConfigEventKind, ConfigStore};

// ============================================
// CallHomeController
// ============================================

/// Call-home session controller.
///
/// # Lifecycle
/// 1. Create with `CallHomeController::new(config, store, connector)`
/// 2. `start().await` seeds declared devices, spawns tasks and binds
/// 3. `stop().await` drains connections and clears state
pub struct CallHomeController {
    config: ControllerConfig,
    ctx: Arc<ConnectionContext>,
    provisioner: Option<Arc<ReactiveProvisioner>>,
    provisioner_listener: Mutex<Option<ListenerId>>,
    port: Mutex<u16>,
    listener: AsyncMutex<Option<ReverseSshAcceptor>>,
    injected: AsyncMutex<Option<ReverseSshAcceptor>>,
    started: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl CallHomeController {
    /// Creates a controller.
    ///
    /// # Errors
    /// `ConfigInvalid` for an invalid configuration, `Store` if the
    /// provisioning counter file cannot be opened.
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn ConfigStore>,
        connector: Arc<dyn SshConnector>,
    ) -> Result<Self> {
        config.validate()?;
        let port = validate_port(config.listener.port)?;

        let registry = Arc::new(SessionRegistry::new());
        let listeners = Arc::new(ListenerSet::new());
        let engine = Arc::new(AuthorizationEngine::new(
            Arc::clone(&store),
            Arc::clone(&listeners),
        ));

        let provisioner = if config.reactive.enabled {
            let counter = match &config.reactive.counter_path {
                Some(path) => DurableCounter::open(path)?,
                None => DurableCounter::in_memory(0),
            };
            Some(Arc::new(ReactiveProvisioner::new(
                ReactiveSettings::from_config(&config.reactive),
                counter,
                Arc::clone(&store),
            )))
        } else {
            None
        };

        let ctx = Arc::new(ConnectionContext {
            store,
            engine,
            registry,
            listeners,
            connector,
            timeouts: ConnectionTimeouts::from_config(&config),
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            ctx,
            provisioner,
            provisioner_listener: Mutex::new(None),
            port: Mutex::new(port),
            listener: AsyncMutex::new(None),
            injected: AsyncMutex::new(None),
            started: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Starts the controller.
    ///
    /// A bind failure is logged and leaves the controller running without
    /// a listening socket.
    ///
    /// # Errors
    /// Returns error if a declared device cannot be written to the store.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Controller already started");
            return Ok(());
        }
        info!("Starting call-home controller v{}", env!("CARGO_PKG_VERSION"));

        if let Err(e) = self.seed_declared_devices() {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        if let Some(provisioner) = &self.provisioner {
            let id = self.ctx.listeners.add(provisioner.listener());
            *self.provisioner_listener.lock() = Some(id);
        }

        {
            let mut tasks = self.tasks.lock();
            tasks.push(("config-events", self.spawn_config_event_task()));
            tasks.push(("cleanup", self.spawn_cleanup_task()));
        }

        *self.injected.lock().await = Some(ReverseSshAcceptor::detached(
            SocketAddr::new(self.config.listener.bind_addr, 0),
            self.handler(),
            self.config.limits.drain_timeout(),
        ));

        self.bind_listener().await;
        info!("Call-home controller started");
        Ok(())
    }

    /// Changes the listening port, rebinding if the controller is running.
    ///
    /// # Errors
    /// `ConfigInvalid` unless `1 <= port <= 65535`.
    pub async fn reconfigure_port(&self, port: u32) -> Result<()> {
        let port = validate_port(port)?;
        let previous = std::mem::replace(&mut *self.port.lock(), port);
        info!(previous, port, "Call-home port reconfigured");

        if self.started.load(Ordering::SeqCst) {
            let old = self.listener.lock().await.take();
            if let Some(acceptor) = old {
                acceptor.close(CloseMode::Graceful).await;
            }
            self.bind_listener().await;
        }
        Ok(())
    }

    /// Stops the controller.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping call-home controller...");

        let listener = self.listener.lock().await.take();
        if let Some(acceptor) = listener {
            acceptor.close(CloseMode::Graceful).await;
        }
        let injected = self.injected.lock().await.take();
        if let Some(acceptor) = injected {
            acceptor.close(CloseMode::Graceful).await;
        }

        let _ = self.shutdown_tx.send(());
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, task) in tasks {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => debug!("Task '{}' completed", name),
                Ok(Err(e)) => warn!("Task '{}' failed: {}", name, e),
                Err(_) => warn!("Task '{}' timed out during shutdown", name),
            }
        }

        for session in self.ctx.registry.snapshot().into_values() {
            if self.ctx.retire(&session, "controller stopped") {
                session.terminate(CloseMode::Immediate);
            }
        }
        self.ctx.listeners.clear();
        *self.provisioner_listener.lock() = None;

        info!("Call-home controller stopped");
    }

    /// Returns `true` between `start` and `stop`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Address of the listening socket, if bound.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().await.as_ref().map(ReverseSshAcceptor::local_addr)
    }

    /// Runs a stream accepted outside the controller through the
    /// call-home lifecycle.
    ///
    /// # Errors
    /// `ShuttingDown` if the controller is not started.
    pub async fn accept_stream(&self, stream: BoxedStream, peer: PeerInfo) -> Result<()> {
        let injected = self.injected.lock().await;
        let acceptor = injected.as_ref().ok_or(ServerError::ShuttingDown)?;
        acceptor.spawn_connection(stream, peer);
        Ok(())
    }

    // ========================================
    // Upward API
    // ========================================

    /// Returns the live session of a device and records activity on it.
    ///
    /// # Errors
    /// `NoSession` if the device has no session in `Active`.
    pub fn create_session(&self, id: &DeviceId) -> Result<Arc<Session>> {
        let session = self.active_session(id)?;
        session.touch();
        Ok(session)
    }

    /// Connection parameters for a device.
    ///
    /// The master instance reads them from its live session; any other
    /// instance from the stored config and the published access document.
    ///
    /// # Errors
    /// `NoSession` without a live session (master) or access document
    /// (non-master), `ConfigMissing` without a stored config.
    pub fn create_device_info(&self, id: &DeviceId, is_master: bool) -> Result<DeviceInfo> {
        if is_master {
            let session = self.active_session(id)?;
            let config = self
                .ctx
                .store
                .get_config(id)
                .unwrap_or_else(|| session.config().clone());
            return Ok(DeviceInfo::from_config(
                id.clone(),
                session.username(),
                &config,
                session.remote_address(),
            ));
        }

        let config = self
            .ctx
            .store
            .get_config(id)
            .ok_or_else(|| ServerError::ConfigMissing(id.clone()))?;
        let access = self
            .ctx
            .store
            .get_document(id, ACCESS_CONFIG_KEY)
            .ok_or_else(|| ServerError::NoSession(id.clone()))?;
        let access = AccessDocument::from_value(&access)?;
        let remote = SocketAddr::new(access.ip_addr()?, access.port);
        Ok(DeviceInfo::from_config(id.clone(), &access.username, &config, remote))
    }

    /// Closes and deregisters a device's session. Does nothing if there is none.
    pub fn remove_session(&self, id: &DeviceId) {
        let Some(session) = self.ctx.registry.get(id) else {
            debug!(device_id = %id, "No session to remove");
            return;
        };
        self.ctx.retire(&session, "removed by caller");
        session.terminate(CloseMode::Graceful);
    }

    /// Returns `true` for ids minted by the reactive provisioner.
    #[must_use]
    pub fn is_call_home_device_id(&self, id: &DeviceId) -> bool {
        id.is_call_home()
    }

    /// Snapshot of live sessions.
    #[must_use]
    pub fn session_map(&self) -> BTreeMap<DeviceId, Arc<Session>> {
        self.ctx.registry.snapshot()
    }

    /// Registers a listener.
    pub fn add_listener(&self, listener: CallHomeListener) -> ListenerId {
        self.ctx.listeners.add(listener)
    }

    /// Deregisters a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.ctx.listeners.remove(id)
    }

    // ========================================
    // Device management
    // ========================================

    /// Builds a device and writes its documents.
    ///
    /// # Errors
    /// Builder validation or store failures.
    pub fn register_device(&self, builder: DeviceConfigBuilder) -> Result<DeviceId> {
        let device = builder.build()?;
        self.ctx
            .store
            .apply_documents(DEVICES_SUBJECT, &device.id, device.documents())?;
        info!(device_id = %device.id, "Call-home device registered");
        Ok(device.id)
    }

    /// Deletes a device's documents; its live session is closed through
    /// the resulting config event.
    pub fn unregister_device(&self, id: &DeviceId) -> bool {
        let removed = self.ctx.store.remove_config(id);
        if removed {
            info!(device_id = %id, "Call-home device unregistered");
        }
        removed
    }

    /// Replaces the reactive provisioning defaults.
    ///
    /// Returns `false` if reactive provisioning is disabled.
    pub fn update_reactive_settings(&self, settings: ReactiveSettings) -> bool {
        match &self.provisioner {
            Some(provisioner) => {
                provisioner.update_settings(settings);
                true
            }
            None => false,
        }
    }

    /// OpenSSH one-line text of a host key.
    #[must_use]
    pub fn encode_public_key(key: &HostKey) -> String {
        key.to_openssh()
    }

    /// Parses OpenSSH text or a bare base64 blob.
    ///
    /// # Errors
    /// `Core(KeyDecode)` if the text is not a valid key.
    pub fn decode_public_key(text: &str) -> Result<HostKey> {
        Ok(HostKey::parse(text)?)
    }

    // ========================================
    // Internals
    // ========================================

    fn handler(&self) -> ConnectionHandler {
        ConnectionHandler::new(Arc::clone(&self.ctx))
    }

    /// Registered sessions still finishing activation are not handed out.
    fn active_session(&self, id: &DeviceId) -> Result<Arc<Session>> {
        self.ctx
            .registry
            .get(id)
            .filter(|session| session.state() == SessionState::Active)
            .ok_or_else(|| ServerError::NoSession(id.clone()))
    }

    fn seed_declared_devices(&self) -> Result<()> {
        for declared in &self.config.devices {
            let device = declared.to_provisioned()?;
            self.ctx
                .store
                .apply_documents(DEVICES_SUBJECT, &device.id, device.documents())?;
            debug!(device_id = %device.id, "Declared device seeded");
        }
        if !self.config.devices.is_empty() {
            info!(devices = self.config.devices.len(), "Declared devices seeded");
        }
        Ok(())
    }

    async fn bind_listener(&self) {
        let addr = SocketAddr::new(self.config.listener.bind_addr, *self.port.lock());
        match ReverseSshAcceptor::bind(addr, self.handler(), self.config.limits.drain_timeout())
            .await
        {
            Ok(acceptor) => *self.listener.lock().await = Some(acceptor),
            Err(e) => error!(error = %e, "Call-home listener unavailable until the port is reconfigured"),
        }
    }

    /// Spawns the task closing sessions whose call-home config changed.
    fn spawn_config_event_task(&self) -> JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let mut events = ctx.store.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Config-event task received shutdown signal");
                        break;
                    }
                    event = events.recv() => {
                        match event {
                            Ok(event) => {
                                if event.key != CALL_HOME_CONFIG_KEY
                                    || event.kind == ConfigEventKind::Added
                                {
                                    continue;
                                }
                                let Some(session) = ctx.registry.get(&event.subject) else {
                                    continue;
                                };
                                info!(
                                    device_id = %event.subject,
                                    kind = ?event.kind,
                                    "Call-home config changed, closing session"
                                );
                                if ctx.retire(&session, "config changed") {
                                    session.terminate(CloseMode::Graceful);
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Config-event task lagged, reconciling sessions");
                                reconcile_sessions(&ctx);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }

            debug!("Config-event task exiting");
        })
    }

    /// Spawns the idle-session sweeper.
    fn spawn_cleanup_task(&self) -> JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.config.limits.cleanup_interval();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Cleanup task received shutdown signal");
                        break;
                    }
                    _ = interval_timer.tick() => {
                        let expired = ctx.registry.expired();
                        for session in &expired {
                            debug!(
                                device_id = %session.device_id(),
                                idle_secs = session.idle_for().as_secs(),
                                "Session idle past its timeout"
                            );
                            if ctx.retire(session, "idle timeout") {
                                session.terminate(CloseMode::Graceful);
                            }
                        }
                        debug!(
                            expired = expired.len(),
                            sessions = ctx.registry.count(),
                            "Cleanup cycle complete"
                        );
                    }
                }
            }

            debug!("Cleanup task exiting");
        })
    }
}

/// Closes every session whose stored config no longer matches the one
/// it was authorized with.
fn reconcile_sessions(ctx: &ConnectionContext) {
    let mut closed = 0usize;
    for session in ctx.registry.snapshot().into_values() {
        if ctx.store.get_config(session.device_id()).as_ref() == Some(session.config()) {
            continue;
        }
        if ctx.retire(&session, "config changed") {
            session.terminate(CloseMode::Graceful);
            closed += 1;
        }
    }
    info!(closed, sessions = ctx.registry.count(), "Session reconcile complete");
}

impl std::fmt::Debug for CallHomeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHomeController")
            .field("port", &*self.port.lock())
            .field("started", &self.is_started())
            .field("sessions", &self.ctx.registry.count())
            .field("reactive", &self.provisioner.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicUsize;

    use callhome_transport::{MockAuth, MockConnector, SshSession};

    use crate::store::MemoryConfigStore;
    use crate::testing::{addr, device_builder, free_port, host_key, key_text, wait_until};

    struct Harness {
        controller: CallHomeController,
        connector: Arc<MockConnector>,
        store: Arc<MemoryConfigStore>,
        removed: Arc<AtomicUsize>,
    }

    fn base_config() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.listener.bind_addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.listener.port = u32::from(free_port());
        config.reactive.password = "pw".to_string();
        config.limits.drain_timeout_secs = 1;
        config
    }

    async fn harness(config: ControllerConfig) -> Harness {
        let store = Arc::new(MemoryConfigStore::new());
        let connector = Arc::new(MockConnector::new());
        let controller = CallHomeController::new(
            config,
            Arc::clone(&store) as Arc<dyn ConfigStore>,
            Arc::clone(&connector) as Arc<dyn SshConnector>,
        )
        .unwrap();
        controller.start().await.unwrap();

        let removed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&removed);
        controller.add_listener(CallHomeListener::new().on_session_removed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        Harness {
            controller,
            connector,
            store,
            removed,
        }
    }

    impl Harness {
        async fn connect(&self, peer: &str) {
            let (stream, _) = tokio::io::duplex(64);
            self.controller
                .accept_stream(Box::new(stream), PeerInfo::new(addr(peer)))
                .await
                .unwrap();
        }

        async fn wait_active(&self, id: &DeviceId) {
            wait_until(|| {
                self.store.get_document(id, ACCESS_CONFIG_KEY).is_some()
                    && self.controller.session_map().contains_key(id)
            })
            .await;
        }
    }

    #[tokio::test]
    async fn test_first_contact_scenario() {
        let h = harness(base_config()).await;
        h.connector.script(addr("203.0.113.5:22"), host_key(1), MockAuth::Accept);

        h.connect("203.0.113.5:22").await;
        let id = DeviceId::new("netconf0.0.0.0:0");
        h.wait_active(&id).await;

        assert!(h.controller.is_call_home_device_id(&id));
        let session = h.controller.create_session(&id).unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.username(), "netconf");

        let stored = h.store.get_config(&id).unwrap();
        assert_eq!(stored.host_key().unwrap(), host_key(1));
        assert_eq!(stored.password.as_deref(), Some("pw"));

        let master = h.controller.create_device_info(&id, true).unwrap();
        assert_eq!(master.ip, IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)));
        assert_eq!(master.port, 22);
        let replica = h.controller.create_device_info(&id, false).unwrap();
        assert_eq!(replica, master);

        h.controller.stop().await;
        assert!(h.controller.session_map().is_empty());
        assert!(h.store.get_document(&id, ACCESS_CONFIG_KEY).is_none());
    }

    #[tokio::test]
    async fn test_remove_session_twice_notifies_once() {
        let h = harness(base_config()).await;
        h.connector.script_default(host_key(1), MockAuth::Accept);
        h.connect("203.0.113.5:22").await;
        let id = DeviceId::new("netconf0.0.0.0:0");
        h.wait_active(&id).await;

        h.controller.remove_session(&id);
        h.controller.remove_session(&id);
        wait_until(|| {
            h.connector
                .session_for(addr("203.0.113.5:22"))
                .is_some_and(|s| !s.is_open())
        })
        .await;

        assert_eq!(h.removed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            h.controller.create_session(&id),
            Err(ServerError::NoSession(_))
        ));
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_config_removed_closes_session() {
        let mut config = base_config();
        config.reactive.enabled = false;
        let h = harness(config).await;
        h.connector.script_default(host_key(2), MockAuth::Accept);

        let id = h
            .controller
            .register_device(
                DeviceConfigBuilder::for_endpoint(
                    IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
                    Some(830),
                    key_text(2),
                    "admin",
                )
                .password("secret"),
            )
            .unwrap();
        h.connect("203.0.113.5:22").await;
        h.wait_active(&id).await;

        assert!(h.controller.unregister_device(&id));
        wait_until(|| h.controller.session_map().is_empty()).await;
        let mock = h.connector.session_for(addr("203.0.113.5:22")).unwrap();
        wait_until(|| !mock.is_open()).await;
        assert_eq!(mock.close_mode(), Some(CloseMode::Graceful));
        assert_eq!(h.removed.load(Ordering::SeqCst), 1);

        // Config really gone and no provisioner: reconnect is refused.
        h.connect("203.0.113.5:23").await;
        wait_until(|| h.connector.handshakes().len() == 2).await;
        assert_eq!(h.connector.handshakes()[1], (addr("203.0.113.5:23"), false));
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_config_update_reconnects_to_same_device() {
        let h = harness(base_config()).await;
        h.connector.script_default(host_key(3), MockAuth::Accept);

        let builder = device_builder("netconf:10.1.1.1:830", 3);
        let id = h.controller.register_device(builder.clone()).unwrap();
        h.connect("203.0.113.5:22").await;
        h.wait_active(&id).await;

        h.controller
            .register_device(builder.connect_timeout(9))
            .unwrap();
        wait_until(|| h.removed.load(Ordering::SeqCst) == 1).await;

        h.connect("203.0.113.5:24").await;
        h.wait_active(&id).await;
        assert_eq!(h.store.all_subjects(), vec![id.clone()]);
        assert_eq!(
            h.controller.create_device_info(&id, true).unwrap().connect_timeout,
            Some(9)
        );
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_device_info_errors() {
        let h = harness(base_config()).await;
        let id = h
            .controller
            .register_device(device_builder("netconf:10.1.1.2:830", 4))
            .unwrap();

        assert!(matches!(
            h.controller.create_device_info(&id, true),
            Err(ServerError::NoSession(_))
        ));
        assert!(matches!(
            h.controller.create_device_info(&id, false),
            Err(ServerError::NoSession(_))
        ));
        assert!(matches!(
            h.controller.create_device_info(&DeviceId::new("nope"), false),
            Err(ServerError::ConfigMissing(_))
        ));
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_reconfigure_port_rebinds() {
        let h = harness(base_config()).await;
        let before = h.controller.local_addr().await.unwrap();

        assert!(matches!(
            h.controller.reconfigure_port(0).await,
            Err(ServerError::ConfigInvalid { .. })
        ));
        assert!(h.controller.reconfigure_port(70_000).await.is_err());
        assert_eq!(h.controller.local_addr().await, Some(before));

        let port = free_port();
        h.controller.reconfigure_port(u32::from(port)).await.unwrap();
        assert_eq!(h.controller.local_addr().await.unwrap().port(), port);

        h.controller.stop().await;
        assert!(h.controller.local_addr().await.is_none());
        assert!(!h.controller.is_started());
    }

    #[tokio::test]
    async fn test_bind_failure_keeps_controller_running() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = base_config();
        config.listener.port = u32::from(occupied.local_addr().unwrap().port());

        let h = harness(config).await;
        assert!(h.controller.is_started());
        assert!(h.controller.local_addr().await.is_none());

        h.controller
            .reconfigure_port(u32::from(free_port()))
            .await
            .unwrap();
        assert!(h.controller.local_addr().await.is_some());
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_netconf_channel_handed_off() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let h = harness(base_config()).await;
        h.connector.script(addr("203.0.113.5:22"), host_key(1), MockAuth::Accept);
        h.connect("203.0.113.5:22").await;
        let id = DeviceId::new("netconf0.0.0.0:0");
        h.wait_active(&id).await;

        let session = h.controller.create_session(&id).unwrap();
        let mut channel = session.open_netconf().await.unwrap();
        let mock = h.connector.session_for(addr("203.0.113.5:22")).unwrap();
        let mut device = mock.take_subsystem("netconf").unwrap();

        device.write_all(b"<hello/>]]>]]>").await.unwrap();
        let mut hello = [0u8; 14];
        channel.read_exact(&mut hello).await.unwrap();
        assert_eq!(&hello, b"<hello/>]]>]]>");

        channel.write_all(b"<rpc/>]]>]]>").await.unwrap();
        let mut rpc = [0u8; 12];
        device.read_exact(&mut rpc).await.unwrap();
        assert_eq!(&rpc, b"<rpc/>]]>]]>");

        h.controller.remove_session(&id);
        wait_until(|| !mock.is_open()).await;
        assert!(matches!(session.open_netconf().await, Err(ServerError::NoSession(_))));
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_registered_but_inactive_session_not_handed_out() {
        let h = harness(base_config()).await;
        let (transport, _) = crate::testing::active_mock_session("203.0.113.5:22").await;
        let id = DeviceId::new("netconf:10.1.1.9:830");
        let session = Arc::new(Session::new(
            id.clone(),
            callhome_common::ConnectionId::generate(),
            crate::testing::device_config(1),
            transport,
            Duration::from_secs(60),
        ));
        assert!(h.controller.ctx.registry.create_if_not_exists(Arc::clone(&session)));

        assert!(matches!(
            h.controller.create_session(&id),
            Err(ServerError::NoSession(_))
        ));
        assert!(matches!(
            h.controller.create_device_info(&id, true),
            Err(ServerError::NoSession(_))
        ));

        session.transition(SessionState::Active).unwrap();
        assert!(Arc::ptr_eq(&h.controller.create_session(&id).unwrap(), &session));
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_lagged_config_events_reconciled() {
        let mut config = base_config();
        config.reactive.enabled = false;
        let h = harness(config).await;
        h.connector.script_default(host_key(8), MockAuth::Accept);

        let id = h
            .controller
            .register_device(device_builder("netconf:10.1.1.8:830", 8))
            .unwrap();
        h.connect("203.0.113.5:22").await;
        h.wait_active(&id).await;

        // Flood the event channel without yielding so the removal is overwritten.
        assert!(h.controller.unregister_device(&id));
        for i in 0..300u32 {
            let filler = format!("netconf:10.9.{}.{}:830", i / 250, i % 250);
            h.controller.register_device(device_builder(&filler, 9)).unwrap();
        }

        wait_until(|| h.removed.load(Ordering::SeqCst) == 1).await;
        assert!(h.controller.session_map().is_empty());
        let mock = h.connector.session_for(addr("203.0.113.5:22")).unwrap();
        wait_until(|| !mock.is_open()).await;
        assert_eq!(mock.close_mode(), Some(CloseMode::Graceful));
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_netconf_traffic_keeps_session_alive() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut config = base_config();
        config.limits.cleanup_interval_secs = 1;
        let h = harness(config).await;
        h.connector.script_default(host_key(5), MockAuth::Accept);

        let id = h
            .controller
            .register_device(device_builder("netconf:10.1.1.4:830", 5).idle_timeout(2))
            .unwrap();
        h.connect("203.0.113.5:22").await;
        h.wait_active(&id).await;

        let session = h.controller.create_session(&id).unwrap();
        let mut channel = session.open_netconf().await.unwrap();
        let mut device = h
            .connector
            .session_for(addr("203.0.113.5:22"))
            .unwrap()
            .take_subsystem("netconf")
            .unwrap();

        for _ in 0..14 {
            tokio::time::sleep(Duration::from_millis(300)).await;
            channel.write_all(b"<rpc/>").await.unwrap();
            let mut buf = [0u8; 6];
            device.read_exact(&mut buf).await.unwrap();
        }

        assert_eq!(session.state(), SessionState::Active);
        assert!(h.controller.session_map().contains_key(&id));
        assert_eq!(h.removed.load(Ordering::SeqCst), 0);
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_idle_session_swept() {
        let mut config = base_config();
        config.limits.cleanup_interval_secs = 1;
        let h = harness(config).await;
        h.connector.script_default(host_key(5), MockAuth::Accept);

        let id = h
            .controller
            .register_device(device_builder("netconf:10.1.1.3:830", 5).idle_timeout(1))
            .unwrap();
        h.connect("203.0.113.5:22").await;
        h.wait_active(&id).await;

        wait_until(|| h.removed.load(Ordering::SeqCst) == 1).await;
        assert!(h.controller.session_map().is_empty());
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_declared_devices_seeded_and_keys() {
        let mut config = base_config();
        config.devices.push(crate::config::DeclaredDevice {
            ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 20)),
            port: None,
            path: None,
            server_key: key_text(6),
            username: "root".to_string(),
            password: Some("x".to_string()),
            ssh_key: None,
            driver: None,
            connect_timeout: None,
            reply_timeout: None,
            idle_timeout: None,
        });
        let h = harness(config).await;
        let id = DeviceId::new("netconf:192.0.2.20");
        assert_eq!(h.store.get_config(&id).unwrap().username, "root");
        assert!(!h.controller.is_call_home_device_id(&id));

        let text = CallHomeController::encode_public_key(&host_key(6));
        assert_eq!(CallHomeController::decode_public_key(&text).unwrap(), host_key(6));
        assert!(CallHomeController::decode_public_key("ssh-ed25519 ???").is_err());
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn test_accept_stream_requires_start() {
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());
        let controller =
            CallHomeController::new(base_config(), store, Arc::new(MockConnector::new())).unwrap();
        let (stream, _) = tokio::io::duplex(64);
        assert!(matches!(
            controller
                .accept_stream(Box::new(stream), PeerInfo::new(addr("203.0.113.5:22")))
                .await,
            Err(ServerError::ShuttingDown)
        ));
    }
}
