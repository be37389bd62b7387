// ============================================
// File: crates/callhome-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Errors raised by the listening socket and by the SSH client
//! connector running on each accepted connection.
//!
//! ## Error Categories
//! 1. **Listener**: bind / accept failures
//! 2. **Handshake**: host key rejected, key exchange failed
//! 3. **Session**: authentication failure, peer gone
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every per-connection error must end that connection only; none of
//!   them may stop the accept loop
//! - Never format credentials into these messages
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use callhome_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Listener Errors
    // ========================================

    /// Failed to bind to address.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind to
        addr: SocketAddr,
        /// Why binding failed
        reason: String,
    },

    /// Address already in use.
    #[error("Address {addr} already in use")]
    AddressInUse {
        /// The address that's in use
        addr: SocketAddr,
    },

    /// Invalid socket address text.
    #[error("Invalid address: {addr}")]
    InvalidAddress {
        /// The invalid address string
        addr: String,
    },

    /// Accepting a connection failed.
    #[error("Failed to accept connection: {reason}")]
    AcceptFailed {
        /// Why accept failed
        reason: String,
    },

    // ========================================
    // Handshake Errors
    // ========================================

    /// The host-key hook refused the presented key.
    #[error("Host key from {peer} rejected")]
    HostKeyRejected {
        /// Remote address
        peer: SocketAddr,
    },

    /// SSH key exchange failed for a reason other than key rejection.
    #[error("SSH handshake with {peer} failed: {reason}")]
    HandshakeFailed {
        /// Remote address
        peer: SocketAddr,
        /// Why it failed
        reason: String,
    },

    // ========================================
    // Session Errors
    // ========================================

    /// Authentication could not be attempted or was aborted.
    #[error("Authentication with {peer} failed: {reason}")]
    AuthenticationFailed {
        /// Remote address
        peer: SocketAddr,
        /// Why it failed
        reason: String,
    },

    /// The device refused a channel or subsystem request.
    #[error("Opening '{subsystem}' subsystem on {peer} failed: {reason}")]
    ChannelFailed {
        /// Remote address
        peer: SocketAddr,
        /// Requested subsystem
        subsystem: String,
        /// Why it failed
        reason: String,
    },

    /// The SSH session is already closed.
    #[error("SSH session closed")]
    Closed,

    /// Operation timed out.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// What operation timed out
        operation: String,
    },

    /// Listener is shutting down.
    #[error("Transport is shutting down")]
    ShuttingDown,

    // ========================================
    // Wrapped Errors
    // ========================================

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates a `HandshakeFailed` error.
    pub fn handshake(peer: SocketAddr, reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            peer,
            reason: reason.into(),
        }
    }

    /// Creates an `AuthenticationFailed` error.
    pub fn auth_failed(peer: SocketAddr, reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            peer,
            reason: reason.into(),
        }
    }

    /// Creates a `ChannelFailed` error.
    pub fn channel_failed(
        peer: SocketAddr,
        subsystem: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ChannelFailed {
            peer,
            subsystem: subsystem.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error is transient and retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::AcceptFailed { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Returns `true` if the error ends a single connection only.
    #[must_use]
    pub const fn is_per_connection(&self) -> bool {
        matches!(
            self,
            Self::HostKeyRejected { .. }
                | Self::HandshakeFailed { .. }
                | Self::AuthenticationFailed { .. }
                | Self::ChannelFailed { .. }
                | Self::Closed
        )
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
    }
}

// ============================================
// Tests
// ============================================
