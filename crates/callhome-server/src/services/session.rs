// ============================================
// File: crates/callhome-server/src/services/session.rs
// ============================================
//! # Call-Home Session
//!
//! ## Creation Reason
//! Represents one authenticated reverse SSH connection bound to a device
//! identity, and the state machine every connection walks through.
//!
//! ## Main Functionality
//! - `SessionState`: lifecycle states and the allowed transitions
//! - `StateCell`: lock-protected state with checked transitions
//! - `Session`: runtime record handed to the upper layer
//!
//! ## Session Lifecycle
//! ```text
//! ┌────────────┐  key  ┌────────────────┐      ┌─────────────┐
//! │ Connecting │──────►│ KeyEstablished │─────►│ Authorizing │
//! └─────┬──────┘       └───────┬────────┘      └──────┬──────┘
//!       │                      │                      │ auth ok
//!       │       reject         │                      ▼
//!       └──────────────► ┌──────────┐ ◄──── ┌───────────────┐
//!                        │ Rejected │  fail │ Authenticated │
//!                        └──────────┘       └───────┬───────┘
//!                                    registry insert│  duplicate
//!                                                   ▼      │
//!                          ┌────────┐         ┌────────┐   │
//!                          │ Closed │ ◄───────│ Active │   │
//!                          └────────┘         └────────┘   │
//!                              ▲                           │
//!                              └───────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `Session` is only built once authentication succeeded; the earlier
//!   states live on the connection handler's own `StateCell`
//! - `terminate` only asks; the connection task performs the close and
//!   the retire bookkeeping
//! - Idle time counts both controller calls (`touch`) and bytes moving on
//!   the transport or its NETCONF channels
//!
//! ## Last Modified
//! v0.1.0 - Initial session model

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use callhome_common::time::{AtomicInstant, Timestamp};
use callhome_common::{ConnectionId, DeviceId};
use callhome_core::{DeviceConfig, HostKey};
use callhome_transport::{BoxedStream, CloseMode, SshSession, NETCONF_SUBSYSTEM};

use crate::error::{Result, ServerError};

// ============================================
// SessionState
// ============================================

/// Lifecycle state of a call-home connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// TCP accepted, SSH handshake running.
    Connecting,
    /// Host key received.
    KeyEstablished,
    /// Host key accepted, authenticating.
    Authorizing,
    /// Device accepted our credentials.
    Authenticated,
    /// Registered and visible to the upper layer.
    Active,
    /// Torn down after being authenticated.
    Closed,
    /// Refused before a session existed.
    Rejected,
}

impl SessionState {
    /// Returns `true` if `self -> next` is an allowed edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::KeyEstablished | Self::Rejected)
                | (Self::KeyEstablished, Self::Authorizing | Self::Rejected)
                | (Self::Authorizing, Self::Authenticated | Self::Rejected)
                | (Self::Authenticated, Self::Active | Self::Closed)
                | (Self::Active, Self::Closed)
        )
    }

    /// Returns `true` for `Closed` and `Rejected`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Rejected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "Connecting",
            Self::KeyEstablished => "KeyEstablished",
            Self::Authorizing => "Authorizing",
            Self::Authenticated => "Authenticated",
            Self::Active => "Active",
            Self::Closed => "Closed",
            Self::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

// ============================================
// StateCell
// ============================================

/// State holder that refuses illegal transitions.
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<SessionState>,
}

impl StateCell {
    /// Creates a cell in `initial`.
    #[must_use]
    pub fn new(initial: SessionState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> SessionState {
        *self.state.lock()
    }

    /// Moves to `next`.
    ///
    /// # Errors
    /// `InvalidTransition` if the edge is not allowed; the state is unchanged.
    pub fn transition(&self, next: SessionState) -> Result<SessionState> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(ServerError::InvalidTransition { from, to: next });
        }
        *state = next;
        trace!(%from, to = %next, "Session state transition");
        Ok(from)
    }
}

// ============================================
// Session
// ============================================

/// An authenticated call-home session.
pub struct Session {
    device_id: DeviceId,
    connection_id: ConnectionId,
    remote_address: SocketAddr,
    server_host_key: HostKey,
    username: String,
    config: DeviceConfig,
    transport: Arc<dyn SshSession>,
    state: StateCell,
    created_at: Timestamp,
    started: Instant,
    last_activity: AtomicInstant,
    idle_timeout: Duration,
    terminate_tx: watch::Sender<Option<CloseMode>>,
    retired: AtomicBool,
}

impl Session {
    /// Builds a session in `Authenticated`.
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        connection_id: ConnectionId,
        config: DeviceConfig,
        transport: Arc<dyn SshSession>,
        idle_timeout: Duration,
    ) -> Self {
        let (terminate_tx, _) = watch::channel(None);
        Self {
            device_id,
            connection_id,
            remote_address: transport.remote_addr(),
            server_host_key: transport.server_host_key(),
            username: config.username.clone(),
            config,
            transport,
            state: StateCell::new(SessionState::Authenticated),
            created_at: Timestamp::now(),
            started: Instant::now(),
            last_activity: AtomicInstant::now(),
            idle_timeout,
            terminate_tx,
            retired: AtomicBool::new(false),
        }
    }

    /// Device this session belongs to.
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Connection-unique id.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Address the device called from.
    #[must_use]
    pub const fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    /// Host key the device presented.
    #[must_use]
    pub fn server_host_key(&self) -> &HostKey {
        &self.server_host_key
    }

    /// Username the session authenticated as.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Device config as read at authorization time.
    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Underlying SSH session.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn SshSession> {
        &self.transport
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Moves the session to `next`.
    ///
    /// # Errors
    /// `InvalidTransition` for an edge the state machine does not allow.
    pub fn transition(&self, next: SessionState) -> Result<SessionState> {
        self.state.transition(next)
    }

    /// Wall-clock creation time.
    #[must_use]
    pub const fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Time since creation.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time since the last controller call or transport traffic.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .elapsed()
            .min(self.transport.last_activity().elapsed())
    }

    /// Records activity.
    pub fn touch(&self) {
        self.last_activity.touch();
    }

    /// Returns `true` once the idle timeout has passed without activity.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.idle_for() > self.idle_timeout
    }

    /// Opens the NETCONF subsystem channel the upper layer talks over.
    ///
    /// # Errors
    /// `NoSession` unless the session is `Active`; transport errors if the
    /// device refuses the channel.
    pub async fn open_netconf(&self) -> Result<BoxedStream> {
        if self.state() != SessionState::Active {
            return Err(ServerError::NoSession(self.device_id.clone()));
        }
        self.touch();
        Ok(self.transport.open_subsystem(NETCONF_SUBSYSTEM).await?)
    }

    /// Claims the retire bookkeeping; `true` for the first caller only.
    pub(crate) fn claim_retirement(&self) -> bool {
        self.retired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Asks the owning connection task to close the session.
    ///
    /// Only the first request counts.
    pub fn terminate(&self, mode: CloseMode) {
        self.terminate_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(mode);
            true
        });
    }

    /// Returns the requested close mode, if termination was asked for.
    #[must_use]
    pub fn termination_requested(&self) -> Option<CloseMode> {
        *self.terminate_tx.borrow()
    }

    /// Resolves once [`Self::terminate`] has been called.
    pub async fn terminated(&self) -> CloseMode {
        let mut rx = self.terminate_tx.subscribe();
        let requested = rx.wait_for(Option::is_some).await.map(|mode| *mode);
        requested.ok().flatten().unwrap_or(CloseMode::Graceful)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.device_id)
            .field("connection_id", &self.connection_id)
            .field("remote_address", &self.remote_address)
            .field("username", &self.username)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
