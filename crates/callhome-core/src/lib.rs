// ============================================
// File: crates/callhome-core/src/lib.rs
// ============================================
//! # Call-Home Core - Host Keys & Device Documents
//!
//! ## Creation Reason
//! Holds the pure data model of the call-home controller: how an SSH
//! host key is decoded and compared, and how a managed device's
//! persisted documents are shaped. Nothing here touches sockets or the
//! runtime, so every rule can be unit tested in isolation.
//!
//! ## Main Functionality
//!
//! ### Keys Module ([`keys`])
//! - `HostKey`: OpenSSH public key (`<alg> <base64> [comment]`)
//! - `Credential`: password or private key, zeroized on drop
//!
//! ### Device Module ([`device`])
//! - `DeviceDocument` / `DriverDocument` / `AccessDocument`: JSON shapes
//!   filed under a device subject
//! - `DeviceConfig`: composite view used by authorization
//! - `DeviceConfigBuilder`: produces `(id, documents)` for provisioning
//! - `DeviceInfo`: what the upper protocol layer needs to drive a session
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              callhome-server                        │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   callhome-core  ◄──   callhome-transport           │
//! │   You are here                │                     │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             callhome-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Document field names are camelCase on the wire and persisted by
//!   the config store; renaming a field orphans existing records
//! - Credentials must never reach a `Debug` or `Display` impl
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod device;
pub mod error;
pub mod keys;

// Re-export commonly used items
pub use device::{
    AccessDocument, DeviceConfig, DeviceConfigBuilder, DeviceDocument, DeviceInfo,
    DriverDocument, ProvisionedDevice,
};
pub use error::{CoreError, Result};
pub use keys::{Credential, HostKey};
