// ============================================
// File: crates/callhome-transport/src/lib.rs
// ============================================
//! # Call-Home Transport - Network I/O Layer
//!
//! ## Creation Reason
//! Call-home inverts the usual SSH roles: the device opens the TCP
//! connection, the controller runs the SSH client on it. This crate
//! owns the listening socket and the client-side SSH abstraction.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `SshConnector`, `SshSession`, `HostKeyVerifier`
//! - [`activity`]: stream wrapper feeding idle tracking
//! - [`tcp`]: listening socket
//! - `mock`: scripted in-memory connector (feature `mock`)
//! - `russh_client`: russh-backed connector (feature `russh`)
//! - [`error`]: transport error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              callhome-server                        │
//! │                    │                                │
//! │                    ▼                                │
//! │           callhome-transport  ◄── You are here      │
//! │                    │                                │
//! │                    ▼                                │
//! │             callhome-core                           │
//! │                    │                                │
//! │                    ▼                                │
//! │             callhome-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! device ──TCP──► TcpAcceptor ──stream──► SshConnector::establish
//!                                             │  host key
//!                                             ▼
//!                                      HostKeyVerifier (controller)
//!                                             │
//!                                             ▼
//!                                      SshSession::authenticate
//!                                             │
//!                                             ▼
//!                                      SshSession::open_subsystem("netconf")
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always go through the traits so lifecycle tests can use the mock
//! - The russh adapter is optional; the default build has none
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod activity;
pub mod error;
pub mod tcp;
pub mod traits;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(feature = "russh")]
pub mod russh_client;

// Re-export primary types
pub use activity::ActivityStream;
pub use error::{Result, TransportError};
pub use tcp::TcpAcceptor;
pub use traits::{
    AsyncStream, BoxedStream, CloseMode, HostKeyVerifier, PeerInfo, SshConnector, SshSession,
    NETCONF_SUBSYSTEM,
};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockAuth, MockConnector, MockSession};

#[cfg(feature = "russh")]
pub use russh_client::{RusshConnector, RusshSession};
