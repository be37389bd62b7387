// ============================================
// File: crates/callhome-server/src/acceptor.rs
// ============================================
//! # Reverse Connection Acceptor
//!
//! ## Creation Reason
//! Owns the listening socket for one bind and every connection task
//! spawned from it, so a port change or shutdown can tear all of it down
//! as a unit.
//!
//! ## Main Functionality
//! - `ReverseSshAcceptor::bind`: listen and start the accept loop
//! - `spawn_connection`: run a stream through the connection handler
//! - `close(mode)`: stop accepting, ask connections to close with `mode`,
//!   drain with a bounded wait, abort stragglers
//!
//! ## Task Layout
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ accept loop ── select { accept | shutdown }  │
//! │      │                                       │
//! │      ▼ spawn                                 │
//! │ JoinSet<ConnectionOutcome>                   │
//! │  ├── ConnectionHandler::run(stream, peer)    │
//! │  ├── ...                                     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The listening socket closes when the accept loop ends
//! - Finished tasks are reaped on every accept so the set stays small
//!
//! ## Last Modified
//! v0.1.0 - Initial acceptor

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use callhome_transport::{BoxedStream, CloseMode, PeerInfo, TcpAcceptor};

use crate::error::{Result, ServerError};
use crate::handlers::connection::wait_for_shutdown;
use crate::handlers::{ConnectionHandler, ConnectionOutcome};

/// Listening socket plus its connection tasks.
pub struct ReverseSshAcceptor {
    local_addr: SocketAddr,
    handler: ConnectionHandler,
    shutdown_tx: watch::Sender<Option<CloseMode>>,
    connections: Arc<Mutex<JoinSet<ConnectionOutcome>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    drain_timeout: Duration,
}

impl ReverseSshAcceptor {
    /// Binds `addr` and starts accepting.
    ///
    /// # Errors
    /// `Bind` if the address is in use or cannot be bound; no socket is
    /// left open in that case.
    pub async fn bind(
        addr: SocketAddr,
        handler: ConnectionHandler,
        drain_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpAcceptor::bind_addr(addr)
            .await
            .map_err(|e| ServerError::bind(addr, e.to_string()))?;
        let local_addr = listener.local_addr();

        let acceptor = Self::detached(local_addr, handler, drain_timeout);
        let task = acceptor.spawn_accept_loop(listener);
        *acceptor.accept_task.lock() = Some(task);

        info!(%local_addr, "Call-home acceptor listening");
        Ok(acceptor)
    }

    /// An acceptor with no listening socket; streams arrive only through
    /// [`Self::spawn_connection`].
    #[must_use]
    pub fn detached(local_addr: SocketAddr, handler: ConnectionHandler, drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(None);
        Self {
            local_addr,
            handler,
            shutdown_tx,
            connections: Arc::new(Mutex::new(JoinSet::new())),
            accept_task: Mutex::new(None),
            drain_timeout,
        }
    }

    /// Bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connection tasks not yet reaped.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Runs `stream` through the connection lifecycle on its own task.
    pub fn spawn_connection(&self, stream: BoxedStream, peer: PeerInfo) {
        spawn_into(
            &self.connections,
            &self.handler,
            &self.shutdown_tx,
            stream,
            peer,
        );
    }

    fn spawn_accept_loop(&self, listener: TcpAcceptor) -> JoinHandle<()> {
        let handler = self.handler.clone();
        let connections = Arc::clone(&self.connections);
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown_rx) => {
                        debug!("Accept loop received shutdown signal");
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                debug!(peer = %peer.addr, "Call-home connection accepted");
                                spawn_into(&connections, &handler, &shutdown_tx, Box::new(stream), peer);
                            }
                            Err(e) if e.is_retryable() => {
                                warn!(error = %e, "Accept failed, continuing");
                                tokio::time::sleep(Duration::from_millis(50)).await;
                            }
                            Err(e) => {
                                warn!(error = %e, "Accept loop stopping");
                                break;
                            }
                        }
                    }
                }
            }
            listener.close();
            debug!("Accept loop exiting");
        })
    }

    /// Stops accepting and closes every connection with `mode`.
    pub async fn close(&self, mode: CloseMode) {
        info!(local_addr = %self.local_addr, %mode, "Closing call-home acceptor");
        self.shutdown_tx.send_replace(Some(mode));

        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => debug!("Accept loop completed"),
                Ok(Err(e)) => warn!("Accept loop failed: {}", e),
                Err(_) => warn!("Accept loop timed out during shutdown"),
            }
        }

        let mut connections = std::mem::take(&mut *self.connections.lock());
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "Connection drain timed out, aborting remaining tasks"
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }
        info!(local_addr = %self.local_addr, "Call-home acceptor closed");
    }
}

fn spawn_into(
    connections: &Mutex<JoinSet<ConnectionOutcome>>,
    handler: &ConnectionHandler,
    shutdown_tx: &watch::Sender<Option<CloseMode>>,
    stream: BoxedStream,
    peer: PeerInfo,
) {
    let handler = handler.clone();
    let shutdown = shutdown_tx.subscribe();
    let mut set = connections.lock();
    while let Some(result) = set.try_join_next() {
        if let Ok(outcome) = result {
            debug!(?outcome, "Connection task reaped");
        }
    }
    set.spawn(async move { handler.run(stream, peer, shutdown).await });
}

impl std::fmt::Debug for ReverseSshAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseSshAcceptor")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
