// ============================================
// File: crates/callhome-common/src/lib.rs
// ============================================
//! # Call-Home Common - Shared Utilities Library
//!
//! ## Creation Reason
//! Provides the identifiers and small utilities every call-home crate
//! agrees on, so a `DeviceId` means the same thing in the store, the
//! registry and the upward API.
//!
//! ## Main Functionality
//! - [`types`]: `DeviceId`, `DeviceEndpoint`, `ConnectionId`
//! - [`time`]: Atomic timestamps for idle tracking
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              callhome-server                        │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   callhome-core        callhome-transport           │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             callhome-common  ◄── You are here       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Leaf crate: no internal dependencies
//! - Device id formats are persisted; changing them orphans stored configs
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use types::{ConnectionId, DeviceEndpoint, DeviceId};
