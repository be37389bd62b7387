// ============================================
// File: crates/callhome-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Errors raised while decoding host keys and device documents.
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include credentials in error messages
//! - Host keys are identified by fingerprint, not by blob
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use callhome_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for key and document handling.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Key Errors
    // ========================================

    /// Public key text could not be decoded.
    #[error("Failed to decode public key: {reason}")]
    KeyDecode {
        /// Why decoding failed
        reason: String,
    },

    // ========================================
    // Document Errors
    // ========================================

    /// A persisted document does not have the expected shape.
    #[error("Invalid '{key}' document: {reason}")]
    InvalidDocument {
        /// Document key (e.g. `netconf-ch`)
        key: String,
        /// What is wrong with it
        reason: String,
    },

    /// Required field is missing or empty.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Field name
        field: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    /// Creates a `KeyDecode` error.
    pub fn key_decode(reason: impl Into<String>) -> Self {
        Self::KeyDecode {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidDocument` error.
    pub fn invalid_document(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidDocument {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `MissingField` error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}
