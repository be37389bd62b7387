// ============================================
// File: crates/callhome-transport/src/mock.rs
// ============================================
//! # Mock SSH Connector
//!
//! ## Creation Reason
//! Lets the lifecycle and controller be tested without a real SSH
//! stack. Each remote address is scripted with the host key it will
//! present and how it answers authentication.
//!
//! ## Main Functionality
//! - `MockConnector::script` / `script_default`: per-peer behavior
//! - Records every established `MockSession`
//! - `MockSession` records auth attempts and how it was closed, and can
//!   be disconnected from the "device" side
//! - Subsystem channels are in-memory duplex pipes; the device end is
//!   collected with `take_subsystem`
//!
//! ## Usage in Tests
//! ```ignore
//! let connector = MockConnector::new();
//! connector.script(peer, host_key, MockAuth::Accept);
//! let (client, server) = tokio::io::duplex(1024);
//! let session = connector.establish(Box::new(server), PeerInfo::new(peer), verifier).await?;
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Test-only; compiled under `cfg(test)` or the `mock` feature
//! - The stream is held until close so the other end observes EOF then
//!
//! ## Last Modified
//! v0.1.0 - Initial mock implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::watch;

use callhome_common::time::AtomicInstant;
use callhome_core::{Credential, HostKey};

use crate::activity::ActivityStream;
use crate::error::{Result, TransportError};
use crate::traits::{BoxedStream, CloseMode, HostKeyVerifier, PeerInfo, SshConnector, SshSession};

// ============================================
// Scripts
// ============================================

/// How a scripted peer answers authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockAuth {
    /// Accept any credential.
    Accept,
    /// Refuse every credential.
    Reject,
    /// Never answer.
    Hang,
}

#[derive(Debug, Clone)]
struct MockPeer {
    host_key: HostKey,
    auth: MockAuth,
}

// ============================================
// MockConnector
// ============================================

/// In-memory [`SshConnector`].
#[derive(Default)]
pub struct MockConnector {
    peers: Mutex<HashMap<SocketAddr, MockPeer>>,
    fallback: Mutex<Option<MockPeer>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    handshakes: Mutex<Vec<(SocketAddr, bool)>>,
}

impl MockConnector {
    /// Creates a connector with no scripted peers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the behavior of one remote address.
    pub fn script(&self, peer: SocketAddr, host_key: HostKey, auth: MockAuth) {
        self.peers.lock().insert(peer, MockPeer { host_key, auth });
    }

    /// Scripts the behavior of every address without its own script.
    pub fn script_default(&self, host_key: HostKey, auth: MockAuth) {
        *self.fallback.lock() = Some(MockPeer { host_key, auth });
    }

    /// Returns every session established so far.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    /// Returns the most recent session from `peer`.
    #[must_use]
    pub fn session_for(&self, peer: SocketAddr) -> Option<Arc<MockSession>> {
        self.sessions
            .lock()
            .iter()
            .rev()
            .find(|s| s.remote == peer)
            .cloned()
    }

    /// Returns `(peer, accepted)` for every handshake attempted.
    #[must_use]
    pub fn handshakes(&self) -> Vec<(SocketAddr, bool)> {
        self.handshakes.lock().clone()
    }

    /// Simulates the device dropping every connection from `peer`.
    pub fn disconnect_peer(&self, peer: SocketAddr) {
        for session in self.sessions.lock().iter().filter(|s| s.remote == peer) {
            session.peer_disconnect();
        }
    }

    fn script_for(&self, peer: SocketAddr) -> Option<MockPeer> {
        self.peers
            .lock()
            .get(&peer)
            .cloned()
            .or_else(|| self.fallback.lock().clone())
    }
}

#[async_trait]
impl SshConnector for MockConnector {
    async fn establish(
        &self,
        stream: BoxedStream,
        peer: PeerInfo,
        verifier: Arc<dyn HostKeyVerifier>,
    ) -> Result<Arc<dyn SshSession>> {
        let script = self
            .script_for(peer.addr)
            .ok_or_else(|| TransportError::handshake(peer.addr, "no mock script for peer"))?;

        let accepted = verifier.verify(peer.addr, &script.host_key).await;
        self.handshakes.lock().push((peer.addr, accepted));
        if !accepted {
            return Err(TransportError::HostKeyRejected { peer: peer.addr });
        }

        let session = Arc::new(MockSession::new(peer.addr, script, stream));
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("scripted_peers", &self.peers.lock().len())
            .field("sessions", &self.sessions.lock().len())
            .finish()
    }
}

// ============================================
// MockSession
// ============================================

/// In-memory [`SshSession`].
pub struct MockSession {
    remote: SocketAddr,
    host_key: HostKey,
    auth: MockAuth,
    stream: Mutex<Option<BoxedStream>>,
    open: AtomicBool,
    closed_tx: watch::Sender<bool>,
    auth_attempts: Mutex<Vec<(String, &'static str)>>,
    close_mode: Mutex<Option<CloseMode>>,
    activity: Arc<AtomicInstant>,
    subsystems: Mutex<Vec<(String, DuplexStream)>>,
}

impl MockSession {
    fn new(remote: SocketAddr, script: MockPeer, stream: BoxedStream) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            remote,
            host_key: script.host_key,
            auth: script.auth,
            stream: Mutex::new(Some(stream)),
            open: AtomicBool::new(true),
            closed_tx,
            auth_attempts: Mutex::new(Vec::new()),
            close_mode: Mutex::new(None),
            activity: Arc::new(AtomicInstant::now()),
            subsystems: Mutex::new(Vec::new()),
        }
    }

    /// Returns `(username, method)` for every authentication attempt.
    #[must_use]
    pub fn auth_attempts(&self) -> Vec<(String, &'static str)> {
        self.auth_attempts.lock().clone()
    }

    /// Returns how the controller closed the session, if it did.
    #[must_use]
    pub fn close_mode(&self) -> Option<CloseMode> {
        *self.close_mode.lock()
    }

    /// Takes the device end of the oldest unclaimed `name` channel.
    #[must_use]
    pub fn take_subsystem(&self, name: &str) -> Option<DuplexStream> {
        let mut subsystems = self.subsystems.lock();
        let index = subsystems.iter().position(|(n, _)| n == name)?;
        Some(subsystems.remove(index).1)
    }

    /// Simulates the device closing the connection.
    pub fn peer_disconnect(&self) {
        self.shut();
    }

    fn shut(&self) {
        self.open.store(false, Ordering::Release);
        self.stream.lock().take();
        self.subsystems.lock().clear();
        self.closed_tx.send_replace(true);
    }
}

#[async_trait]
impl SshSession for MockSession {
    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn server_host_key(&self) -> HostKey {
        self.host_key.clone()
    }

    async fn authenticate(&self, username: &str, credential: &Credential) -> Result<bool> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.auth_attempts
            .lock()
            .push((username.to_string(), credential.method()));
        self.activity.touch();

        match self.auth {
            MockAuth::Accept => Ok(true),
            MockAuth::Reject => Ok(false),
            MockAuth::Hang => {
                let mut rx = self.closed_tx.subscribe();
                let _ = rx.wait_for(|closed| *closed).await;
                Err(TransportError::Closed)
            }
        }
    }

    async fn open_subsystem(&self, name: &str) -> Result<BoxedStream> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let (local, device) = tokio::io::duplex(4096);
        self.subsystems.lock().push((name.to_string(), device));
        self.activity.touch();
        Ok(Box::new(ActivityStream::new(local, Arc::clone(&self.activity))))
    }

    fn last_activity(&self) -> Instant {
        self.activity.load()
    }

    async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn close(&self, mode: CloseMode) {
        let mut recorded = self.close_mode.lock();
        if recorded.is_none() {
            *recorded = Some(mode);
        }
        drop(recorded);
        self.shut();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("remote", &self.remote)
            .field("open", &self.is_open())
            .field("close_mode", &self.close_mode())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
