// ============================================
// File: crates/callhome-server/src/services/mod.rs
// ============================================
//! # Controller Services
//!
//! ## Creation Reason
//! Business logic of the call-home controller, kept apart from sockets
//! and SSH so each piece can be tested on its own.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`authorization`]: host key → device decision
//! - [`provisioner`]: identities and configs for unknown devices
//! - [`counter`]: durable counter behind the identities
//! - [`registry`]: one live session per device
//! - [`session`]: session record and lifecycle states
//! - [`listeners`]: callbacks into the upper layer
//!
//! ## Service Interactions
//! ```text
//! ┌──────────────────────┐  unknown key  ┌──────────────────────┐
//! │ AuthorizationEngine  │──────────────►│     ListenerSet      │
//! │  - scan store        │               │  on_session_auth_    │
//! │  - persist new device│◄──────────────│  failed → Provisioner│
//! └──────────┬───────────┘    device     └──────────────────────┘
//!            │ Accepted(id, config)
//!            ▼
//! ┌──────────────────────┐               ┌──────────────────────┐
//! │  ConnectionHandler   │──────────────►│   SessionRegistry    │
//! │  (handlers module)   │ insert/remove │   DashMap<id, Arc>   │
//! └──────────────────────┘               └──────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All services are `Send + Sync` and shared through `Arc`
//! - Only the connection handler moves sessions between states
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod authorization;
pub mod counter;
pub mod listeners;
pub mod provisioner;
pub mod registry;
pub mod session;

// Re-export primary types
pub use authorization::{AuthorizationDecision, AuthorizationEngine};
pub use counter::DurableCounter;
pub use listeners::{CallHomeListener, ListenerId, ListenerSet};
pub use provisioner::{DeviceIdAllocator, ReactiveProvisioner, ReactiveSettings};
pub use registry::SessionRegistry;
pub use session::{Session, SessionState, StateCell};
