// ============================================
// File: crates/callhome-server/src/lib.rs
// ============================================
//! # Call-Home Controller Library
//!
//! ## Creation Reason
//! Managed devices that cannot be reached directly dial out to the
//! controller over SSH. This crate accepts those connections, decides
//! which device each one is, authenticates as that device, keeps at most
//! one live session per device and hands sessions to the upper layer.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: controller configuration
//! - [`controller`]: orchestration and upward API
//! - [`acceptor`]: accept loop and connection task set
//! - [`handlers`]: per-connection lifecycle driver
//! - [`services`]: business logic
//!   - [`services::authorization`]: host-key based decisions
//!   - [`services::provisioner`]: first-contact provisioning
//!   - [`services::counter`]: durable identity counter
//!   - [`services::registry`]: live session map
//!   - [`services::session`]: session record and state machine
//!   - [`services::listeners`]: upper-layer callbacks
//! - [`store`]: device config store abstraction
//! - [`error`]: server-specific error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     CallHomeController                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐    │
//! │  │  Acceptor   │────►│ Connection  │────►│  Authorization  │    │
//! │  │ (TCP 4334)  │     │  Handler    │     │     Engine      │    │
//! │  └─────────────┘     └──────┬──────┘     └────────┬────────┘    │
//! │                             │                     │             │
//! │         ┌───────────────────┼─────────────┐       ▼             │
//! │         ▼                   ▼             ▼  ┌─────────────┐    │
//! │  ┌─────────────┐     ┌─────────────┐         │ Provisioner │    │
//! │  │  Session    │     │  Listeners  │         │ + Counter   │    │
//! │  │  Registry   │     │             │         └─────────────┘    │
//! │  └─────────────┘     └─────────────┘                            │
//! │                                                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                ConfigStore (devices/<id>/<key>)                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! device ─TCP─► acceptor ─► SSH client handshake ─► host key ─► decide()
//!                                                              │
//!        upper layer ◄─ sessionCreated ◄─ registry insert ◄─ authenticate
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Only a listening port change is applied at runtime
//! - Rejection is a decision, not an error: see `AuthorizationDecision`
//! - Every exit from `Active` goes through one retire path
//!
//! ## Last Modified
//! v0.1.0 - Initial controller library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acceptor;
pub mod config;
pub mod controller;
pub mod error;
pub mod handlers;
pub mod services;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export primary types
pub use config::ControllerConfig;
pub use controller::CallHomeController;
pub use error::{Result, ServerError};
pub use store::{ConfigStore, MemoryConfigStore};
