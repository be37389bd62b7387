// ============================================
// File: crates/callhome-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Errors raised by the shared identifier and time types. Higher crates
//! wrap `CommonError` in their own error enum via `#[from]`.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never put passwords or private key material in error messages
//! - Host keys may be logged by fingerprint only
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

/// Common result type.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors from the shared call-home types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A device id could not be accepted.
    #[error("Invalid device id '{id}': {reason}")]
    InvalidDeviceId {
        /// Offending id text
        id: String,
        /// Why it was refused
        reason: String,
    },

    /// Any other malformed input.
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput {
        /// Field or parameter name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Broken internal invariant.
    #[error("Internal error: {message}")]
    Internal {
        /// Description
        message: String,
    },
}

impl CommonError {
    /// Creates an `InvalidDeviceId` error.
    pub fn invalid_device_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDeviceId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidInput` error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
