// ============================================
// File: crates/callhome-server/src/handlers/mod.rs
// ============================================
//! # Connection Handlers
//!
//! ## Creation Reason
//! Hosts the per-connection driver that turns an accepted TCP stream
//! into a registered call-home session and retires it again.
//!
//! ## Main Functionality
//! - [`connection`]: lifecycle driver, host-key hook, retire path
//!
//! ## Last Modified
//! v0.1.0 - Initial handlers structure

pub mod connection;

// Re-export primary types
pub use connection::{
    ConnectionContext, ConnectionHandler, ConnectionOutcome, ConnectionTimeouts, DecisionVerifier,
};
