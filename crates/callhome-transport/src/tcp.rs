// ============================================
// File: crates/callhome-transport/src/tcp.rs
// ============================================
//! # TCP Listener
//!
//! ## Creation Reason
//! Call-home devices dial the controller, so the controller owns a
//! listening TCP socket (IANA port 4334 by default). This wraps Tokio's
//! listener with the bind options and error mapping the acceptor needs.
//!
//! ## Main Functionality
//! - `TcpAcceptor::bind` / `bind_addr`: socket2 setup with SO_REUSEADDR
//! - `accept`: next inbound stream plus `PeerInfo`
//! - `close`: stops handing out connections
//!
//! ## ⚠️ Important Note for Next Developer
//! - The OS socket is released when the `TcpAcceptor` is dropped; a
//!   failed bind drops the half-built socket before returning
//! - `AddrInUse` is reported as `AddressInUse` so callers can tell a
//!   port conflict from other bind failures
//!
//! ## Last Modified
//! v0.1.0 - Initial TCP listener

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::traits::PeerInfo;

// ============================================
// Constants
// ============================================

/// Pending-connection backlog for the listening socket.
const LISTEN_BACKLOG: i32 = 1024;

// ============================================
// TcpAcceptor
// ============================================

/// Listening socket for inbound call-home connections.
///
/// # Example
/// ```ignore
/// let acceptor = TcpAcceptor::bind("0.0.0.0:4334").await?;
/// let (stream, peer) = acceptor.accept().await?;
/// ```
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: AtomicBool,
}

impl TcpAcceptor {
    /// Binds to an address given as text.
    ///
    /// # Errors
    /// - `InvalidAddress` if the text is not a socket address
    /// - `AddressInUse` / `BindFailed` as for [`Self::bind_addr`]
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self> {
        let addr_str = addr.as_ref();
        let socket_addr: SocketAddr =
            addr_str
                .parse()
                .map_err(|_| TransportError::InvalidAddress {
                    addr: addr_str.to_string(),
                })?;
        Self::bind_addr(socket_addr).await
    }

    /// Binds to a socket address.
    ///
    /// # Errors
    /// - `AddressInUse` if another socket holds the port
    /// - `BindFailed` for any other bind or listen failure
    pub async fn bind_addr(addr: SocketAddr) -> Result<Self> {
        debug!(%addr, "Binding call-home listener");

        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| TransportError::io("creating TCP socket", e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::io("setting SO_REUSEADDR", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::io("setting non-blocking", e))?;

        socket.bind(&addr.into()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TransportError::AddressInUse { addr }
            } else {
                TransportError::bind_failed(addr, e.to_string())
            }
        })?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| TransportError::bind_failed(addr, e.to_string()))?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| TransportError::io("converting to Tokio listener", e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::io("getting local address", e))?;

        info!(%local_addr, "Call-home listener bound");

        Ok(Self {
            listener,
            local_addr,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Waits for the next inbound connection.
    ///
    /// # Errors
    /// - `ShuttingDown` after [`Self::close`]
    /// - `AcceptFailed` if the OS accept call fails
    pub async fn accept(&self) -> Result<(TcpStream, PeerInfo)> {
        if self.is_closed() {
            return Err(TransportError::ShuttingDown);
        }

        let (stream, addr) =
            self.listener
                .accept()
                .await
                .map_err(|e| TransportError::AcceptFailed {
                    reason: e.to_string(),
                })?;
        let _ = stream.set_nodelay(true);

        trace!(peer = %addr, "Accepted TCP connection");
        Ok((stream, PeerInfo::new(addr)))
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops handing out connections. The socket itself is released on drop.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Returns `true` after [`Self::close`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for TcpAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpAcceptor")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
