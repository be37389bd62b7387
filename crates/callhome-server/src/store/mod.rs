// ============================================
// File: crates/callhome-server/src/store/mod.rs
// ============================================
//! # Device Config Store
//!
//! ## Creation Reason
//! Device configuration is owned by an external key-value store. The
//! controller reads it, writes provisioned devices and access documents
//! into it, and reacts to its change events.
//!
//! ## Main Functionality
//! - `ConfigStore`: the contract the controller depends on
//! - `ConfigEvent`: change notification `{kind, subject, key}`
//! - [`memory`]: in-process implementation used by the binary and tests
//!
//! ## Addressing
//! ```text
//! (subject class, subject id, key) → JSON payload
//!   "devices"      DeviceId       "netconf-ch" | "basic" | "netconf"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `apply_documents` must be all-or-nothing; provisioning relies on it
//! - Events are sent after the write is visible to readers
//!
//! ## Last Modified
//! v0.1.0 - Initial store abstraction

pub mod memory;

use serde_json::Value;
use tokio::sync::broadcast;

use callhome_common::DeviceId;
use callhome_core::DeviceConfig;

use crate::error::Result;

pub use memory::MemoryConfigStore;

// ============================================
// ConfigEvent
// ============================================

/// What happened to a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEventKind {
    /// Document created.
    Added,
    /// Existing document replaced.
    Updated,
    /// Document deleted.
    Removed,
}

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    /// Kind of change.
    pub kind: ConfigEventKind,
    /// Subject the document belongs to.
    pub subject: DeviceId,
    /// Document key.
    pub key: String,
}

// ============================================
// ConfigStore
// ============================================

/// Key-value store holding device documents.
pub trait ConfigStore: Send + Sync {
    /// Loads the composite config (`netconf-ch` + `basic`) of a device.
    ///
    /// Returns `None` if there is no valid `netconf-ch` document.
    fn get_config(&self, id: &DeviceId) -> Option<DeviceConfig>;

    /// Loads one raw document.
    fn get_document(&self, id: &DeviceId, key: &str) -> Option<Value>;

    /// Writes several documents of one subject atomically.
    ///
    /// # Errors
    /// `Store` if any document is rejected; nothing is written then.
    fn apply_documents(
        &self,
        subject_class: &str,
        id: &DeviceId,
        documents: Vec<(String, Value)>,
    ) -> Result<()>;

    /// Writes a single document and returns the resulting config.
    ///
    /// # Errors
    /// `Store` if the write is rejected, `ConfigMissing` if the subject
    /// has no call-home config afterwards.
    fn apply_config(
        &self,
        subject_class: &str,
        id: &DeviceId,
        key: &str,
        payload: Value,
    ) -> Result<DeviceConfig> {
        self.apply_documents(subject_class, id, vec![(key.to_string(), payload)])?;
        self.get_config(id)
            .ok_or_else(|| crate::error::ServerError::ConfigMissing(id.clone()))
    }

    /// Removes every document of a subject. Returns `false` if there was none.
    fn remove_config(&self, id: &DeviceId) -> bool;

    /// Removes one document. Returns `false` if it was absent.
    fn remove_document(&self, id: &DeviceId, key: &str) -> bool;

    /// All subjects with at least one document, sorted.
    fn all_subjects(&self) -> Vec<DeviceId>;

    /// Subscribes to change events.
    fn subscribe(&self) -> broadcast::Receiver<ConfigEvent>;
}
