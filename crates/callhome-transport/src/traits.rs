// ============================================
// File: crates/callhome-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! The controller accepts TCP and then plays the SSH *client* role on
//! the accepted stream. These traits are the seam between that
//! lifecycle logic and the SSH implementation, so the lifecycle can be
//! tested against an in-memory connector.
//!
//! ## Main Functionality
//! - `SshConnector`: runs the client handshake over an accepted stream
//! - `HostKeyVerifier`: hook consulted during key exchange
//! - `SshSession`: authenticated-or-not client session handle
//! - `PeerInfo`, `CloseMode`: connection metadata and teardown policy
//!
//! ## Handshake Contract
//! ```text
//! establish(stream, peer, verifier)
//!   ├─ key exchange
//!   ├─ verifier.verify(peer, host_key) ── false ──► Err(HostKeyRejected)
//!   └─ Ok(session)                         (no credentials sent yet)
//! session.authenticate(username, credential) ──► Ok(true | false)
//! session.open_subsystem("netconf")          ──► Ok(stream)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `verify` must be called before `establish` returns; a connector
//!   that skips it lets unknown devices through
//! - Implementations must be `Send + Sync`; sessions are shared between
//!   the connection task and the registry
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use callhome_core::{Credential, HostKey};

use crate::error::Result;

/// SSH subsystem carrying NETCONF (RFC 6242).
pub const NETCONF_SUBSYSTEM: &str = "netconf";

// ============================================
// Streams
// ============================================

/// Byte stream an SSH session can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased stream handed from the acceptor to a connector.
pub type BoxedStream = Box<dyn AsyncStream>;

// ============================================
// PeerInfo
// ============================================

/// Metadata about an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// Remote socket address.
    pub addr: SocketAddr,
    /// When the connection was accepted.
    pub accepted_at: Instant,
}

impl PeerInfo {
    /// Creates peer info stamped with the current time.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            accepted_at: Instant::now(),
        }
    }
}

// ============================================
// CloseMode
// ============================================

/// How a connection is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseMode {
    /// Send a disconnect message and let the peer finish.
    Graceful,
    /// Drop the connection without waiting.
    Immediate,
}

impl std::fmt::Display for CloseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graceful => f.write_str("graceful"),
            Self::Immediate => f.write_str("immediate"),
        }
    }
}

// ============================================
// HostKeyVerifier
// ============================================

/// Hook deciding whether a presented host key is acceptable.
#[async_trait]
pub trait HostKeyVerifier: Send + Sync {
    /// Returns `true` to continue the handshake.
    async fn verify(&self, peer: SocketAddr, host_key: &HostKey) -> bool;
}

// ============================================
// SshSession
// ============================================

/// Client-side SSH session established on an accepted stream.
#[async_trait]
pub trait SshSession: Send + Sync {
    /// Remote socket address.
    fn remote_addr(&self) -> SocketAddr;

    /// Host key the peer presented and the verifier accepted.
    fn server_host_key(&self) -> HostKey;

    /// Attempts exactly one authentication method.
    ///
    /// # Returns
    /// `Ok(true)` if the peer accepted the credential.
    ///
    /// # Errors
    /// Returns an error if the attempt could not be completed.
    async fn authenticate(&self, username: &str, credential: &Credential) -> Result<bool>;

    /// Opens a session channel and requests subsystem `name` on it.
    ///
    /// # Errors
    /// `ChannelFailed` if the peer refuses, `Closed` if the transport is gone.
    async fn open_subsystem(&self, name: &str) -> Result<BoxedStream>;

    /// Last time bytes moved over the transport or one of its channels.
    fn last_activity(&self) -> Instant;

    /// Resolves once the transport is closed, by either side.
    async fn closed(&self);

    /// Closes the transport.
    async fn close(&self, mode: CloseMode);

    /// Returns `true` while the transport is open.
    fn is_open(&self) -> bool;
}

// ============================================
// SshConnector
// ============================================

/// Runs the SSH client handshake on accepted streams.
///
/// # Example
/// ```ignore
/// let session = connector.establish(Box::new(tcp), peer, verifier).await?;
/// if session.authenticate("netconf", &credential).await? {
///     // hand off
/// }
/// ```
#[async_trait]
pub trait SshConnector: Send + Sync + 'static {
    /// Performs key exchange, consulting `verifier` for the host key.
    ///
    /// # Errors
    /// - `HostKeyRejected` if `verifier` refused the key
    /// - `HandshakeFailed` for any other handshake failure
    async fn establish(
        &self,
        stream: BoxedStream,
        peer: PeerInfo,
        verifier: Arc<dyn HostKeyVerifier>,
    ) -> Result<Arc<dyn SshSession>>;
}
