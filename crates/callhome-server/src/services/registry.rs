// ============================================
// File: crates/callhome-server/src/services/registry.rs
// ============================================
//! # Session Registry
//!
//! ## Creation Reason
//! Holds the live sessions keyed by device id and enforces that a device
//! has at most one of them.
//!
//! ## Main Functionality
//! - `create_if_not_exists`: atomic insert-if-absent via the DashMap entry API
//! - `remove_if_same`: removal that only succeeds for the exact session
//!   instance, so concurrent retire paths converge on one winner
//! - `expired` / `snapshot` for the controller's housekeeping
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never hold a DashMap reference across an `.await`
//! - Whoever gets `true` from `remove_if_same` owns the removal
//!   notification
//!
//! ## Last Modified
//! v0.1.0 - Initial registry

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use callhome_common::DeviceId;

use crate::services::session::Session;

/// Live sessions by device id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<DeviceId, Arc<Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `session` unless its device already has one.
    ///
    /// Returns `false` and leaves the incumbent in place on conflict.
    pub fn create_if_not_exists(&self, session: Arc<Session>) -> bool {
        match self.sessions.entry(session.device_id().clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    device_id = %existing.key(),
                    incumbent = %existing.get().connection_id(),
                    "Session already registered"
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Looks up the live session of a device.
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes the entry only if it is this exact session.
    pub fn remove_if_same(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(session.device_id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Sessions whose idle timeout has passed.
    #[must_use]
    pub fn expired(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Point-in-time copy of the map, ordered by device id.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<DeviceId, Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.count())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
