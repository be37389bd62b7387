// ============================================
// File: crates/callhome-server/src/services/listeners.rs
// ============================================
//! # Listener Fan-out
//!
//! ## Creation Reason
//! The upper protocol layer and the reactive provisioner learn about
//! call-home events through registered listeners.
//!
//! ## Main Functionality
//! - `CallHomeListener`: a record of optional callbacks
//! - `ListenerSet`: ordered registry with stable `ListenerId`s
//!
//! ## Callback Semantics
//! ```text
//! on_session_created(id)        after a session becomes Active
//! on_session_removed(id)        once, when it leaves Active
//! on_session_auth_failed(peer,  no stored config matches the key;
//!                        key)   first Some(device) wins
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Callbacks run synchronously on the calling task, in registration
//!   order, over a snapshot; they may add or remove listeners freely
//! - `on_session_auth_failed` runs on the blocking pool (inside a
//!   decision); keep it free of async waits
//!
//! ## Last Modified
//! v0.1.0 - Initial listener registry

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use callhome_common::DeviceId;
use callhome_core::{HostKey, ProvisionedDevice};

/// Callback receiving a device id.
pub type SessionCallback = Arc<dyn Fn(&DeviceId) + Send + Sync>;

/// Callback offered an unknown host key; may provision a device for it.
pub type AuthFailedCallback =
    Arc<dyn Fn(SocketAddr, &HostKey) -> Option<ProvisionedDevice> + Send + Sync>;

// ============================================
// CallHomeListener
// ============================================

/// A set of optional callbacks.
///
/// # Example
/// ```ignore
/// let listener = CallHomeListener::new()
///     .on_session_created(|id| println!("up: {id}"))
///     .on_session_removed(|id| println!("down: {id}"));
/// let id = controller.add_listener(listener);
/// ```
#[derive(Clone, Default)]
pub struct CallHomeListener {
    created: Option<SessionCallback>,
    removed: Option<SessionCallback>,
    auth_failed: Option<AuthFailedCallback>,
}

impl CallHomeListener {
    /// Creates a listener with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session-created callback.
    #[must_use]
    pub fn on_session_created(mut self, f: impl Fn(&DeviceId) + Send + Sync + 'static) -> Self {
        self.created = Some(Arc::new(f));
        self
    }

    /// Sets the session-removed callback.
    #[must_use]
    pub fn on_session_removed(mut self, f: impl Fn(&DeviceId) + Send + Sync + 'static) -> Self {
        self.removed = Some(Arc::new(f));
        self
    }

    /// Sets the unknown-host-key callback.
    #[must_use]
    pub fn on_session_auth_failed(
        mut self,
        f: impl Fn(SocketAddr, &HostKey) -> Option<ProvisionedDevice> + Send + Sync + 'static,
    ) -> Self {
        self.auth_failed = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for CallHomeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHomeListener")
            .field("created", &self.created.is_some())
            .field("removed", &self.removed.is_some())
            .field("auth_failed", &self.auth_failed.is_some())
            .finish()
    }
}

// ============================================
// ListenerSet
// ============================================

/// Handle returned by [`ListenerSet::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered listener registry.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, CallHomeListener)>>,
}

impl ListenerSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener.
    pub fn add(&self, listener: CallHomeListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        debug!(listener = id.0, "Listener registered");
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns `true` if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    fn snapshot(&self) -> Vec<CallHomeListener> {
        self.listeners.read().iter().map(|(_, l)| l.clone()).collect()
    }

    /// Fires `on_session_created`.
    pub fn session_created(&self, id: &DeviceId) {
        for callback in self.snapshot().iter().filter_map(|l| l.created.as_ref()) {
            callback(id);
        }
    }

    /// Fires `on_session_removed`.
    pub fn session_removed(&self, id: &DeviceId) {
        for callback in self.snapshot().iter().filter_map(|l| l.removed.as_ref()) {
            callback(id);
        }
    }

    /// Offers an unknown host key to `on_session_auth_failed` callbacks in
    /// order; the first provisioned device is returned.
    #[must_use]
    pub fn session_auth_failed(&self, remote: SocketAddr, key: &HostKey) -> Option<ProvisionedDevice> {
        self.snapshot()
            .iter()
            .filter_map(|l| l.auth_failed.as_ref())
            .find_map(|callback| callback(remote, key))
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
