// ============================================
// File: crates/callhome-server/src/error.rs
// ============================================
//! # Server Error Types
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::net::SocketAddr;

use thiserror::Error;

use callhome_common::error::CommonError;
use callhome_common::DeviceId;
use callhome_core::error::CoreError;
use callhome_transport::error::TransportError;

use crate::services::session::SessionState;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        path: String,
        reason: String,
    },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        field: String,
        reason: String,
    },

    #[error("Failed to bind call-home listener on {addr}: {reason}")]
    Bind {
        addr: SocketAddr,
        reason: String,
    },

    #[error("Connection from {peer} rejected: no device matches the presented host key")]
    AuthorizationRejected {
        peer: SocketAddr,
    },

    #[error("Authentication as '{username}' on {device_id} failed: {reason}")]
    AuthenticationFailure {
        device_id: DeviceId,
        username: String,
        reason: String,
    },

    #[error("No call-home session for device {0}")]
    NoSession(DeviceId),

    #[error("No call-home configuration for device {0}")]
    ConfigMissing(DeviceId),

    #[error("Invalid session transition {from} -> {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("Config store failure: {reason}")]
    Store {
        reason: String,
    },

    #[error("Device identity space exhausted after {issued} allocations")]
    CapacityExhausted {
        issued: u64,
    },

    #[error("Controller is shutting down")]
    ShuttingDown,

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::Bind {
            addr,
            reason: reason.into(),
        }
    }

    pub fn auth_failure(
        device_id: DeviceId,
        username: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::AuthenticationFailure {
            device_id,
            username: username.into(),
            reason: reason.into(),
        }
    }

    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::config_load("/etc/callhome/server.toml", "file not found");
        assert!(err.to_string().contains("/etc/callhome/server.toml"));

        let err = ServerError::NoSession(DeviceId::new("netconf0.0.0.0:0"));
        assert_eq!(err.to_string(), "No call-home session for device netconf0.0.0.0:0");
    }

    #[test]
    fn test_error_classification() {
        let config_err = ServerError::config_invalid("listener.port", "must be in 1..=65535");
        assert!(config_err.is_config_error());

        assert!(ServerError::config_load("/missing.toml", "not found").is_config_error());

        let rejected = ServerError::AuthorizationRejected {
            peer: "203.0.113.5:22".parse().unwrap(),
        };
        assert!(!rejected.is_config_error());
        assert!(!ServerError::bind("0.0.0.0:4334".parse().unwrap(), "in use").is_config_error());
    }

    #[test]
    fn test_transition_message() {
        let err = ServerError::InvalidTransition {
            from: SessionState::Closed,
            to: SessionState::Active,
        };
        assert_eq!(err.to_string(), "Invalid session transition Closed -> Active");
    }
}
