// ============================================
// File: crates/callhome-server/src/store/memory.rs
// ============================================
//! # In-Memory Config Store
//!
//! ## Creation Reason
//! A `ConfigStore` for the standalone binary and for tests. Declared
//! devices from the configuration file are seeded into it at start.
//!
//! ## Main Functionality
//! - `MemoryConfigStore`: `RwLock<BTreeMap>` of subjects to documents
//! - Known document keys are validated before anything is committed
//! - Change events over a `broadcast` channel
//!
//! ## Last Modified
//! v0.1.0 - Initial in-memory store

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use callhome_common::DeviceId;
use callhome_core::device::{
    AccessDocument, DeviceDocument, DriverDocument, ACCESS_CONFIG_KEY, CALL_HOME_CONFIG_KEY,
    DEVICES_SUBJECT, DRIVER_CONFIG_KEY,
};
use callhome_core::DeviceConfig;

use crate::error::{Result, ServerError};
use crate::store::{ConfigEvent, ConfigEventKind, ConfigStore};

/// Capacity of the change-event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type Documents = BTreeMap<String, Value>;

/// In-process [`ConfigStore`].
pub struct MemoryConfigStore {
    subjects: RwLock<BTreeMap<DeviceId, Documents>>,
    events: broadcast::Sender<ConfigEvent>,
}

impl MemoryConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            subjects: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Number of subjects held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subjects.read().len()
    }

    /// Returns `true` if no subject is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subjects.read().is_empty()
    }

    fn check_document(key: &str, payload: &Value) -> Result<()> {
        let checked = match key {
            CALL_HOME_CONFIG_KEY => DeviceDocument::from_value(payload).map(|_| ()),
            DRIVER_CONFIG_KEY => DriverDocument::from_value(payload).map(|_| ()),
            ACCESS_CONFIG_KEY => AccessDocument::from_value(payload).map(|_| ()),
            _ => Ok(()),
        };
        checked.map_err(|e| ServerError::store(format!("rejected '{key}' document: {e}")))
    }

    fn emit(&self, kind: ConfigEventKind, subject: &DeviceId, key: &str) {
        // No receivers is not an error.
        let _ = self.events.send(ConfigEvent {
            kind,
            subject: subject.clone(),
            key: key.to_string(),
        });
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get_config(&self, id: &DeviceId) -> Option<DeviceConfig> {
        let subjects = self.subjects.read();
        let docs = subjects.get(id)?;
        let device = DeviceDocument::from_value(docs.get(CALL_HOME_CONFIG_KEY)?).ok()?;
        let driver = docs
            .get(DRIVER_CONFIG_KEY)
            .and_then(|v| DriverDocument::from_value(v).ok());
        Some(DeviceConfig::from_documents(device, driver))
    }

    fn get_document(&self, id: &DeviceId, key: &str) -> Option<Value> {
        self.subjects.read().get(id)?.get(key).cloned()
    }

    fn apply_documents(
        &self,
        subject_class: &str,
        id: &DeviceId,
        documents: Vec<(String, Value)>,
    ) -> Result<()> {
        if subject_class != DEVICES_SUBJECT {
            return Err(ServerError::store(format!(
                "unknown subject class '{subject_class}'"
            )));
        }
        for (key, payload) in &documents {
            Self::check_document(key, payload)?;
        }

        let mut changes = Vec::with_capacity(documents.len());
        {
            let mut subjects = self.subjects.write();
            let docs = subjects.entry(id.clone()).or_default();
            for (key, payload) in documents {
                let kind = if docs.insert(key.clone(), payload).is_some() {
                    ConfigEventKind::Updated
                } else {
                    ConfigEventKind::Added
                };
                changes.push((kind, key));
            }
        }

        for (kind, key) in changes {
            trace!(subject = %id, key = %key, ?kind, "Document written");
            self.emit(kind, id, &key);
        }
        Ok(())
    }

    fn remove_config(&self, id: &DeviceId) -> bool {
        let Some(docs) = self.subjects.write().remove(id) else {
            return false;
        };
        debug!(subject = %id, documents = docs.len(), "Subject removed");
        for key in docs.keys() {
            self.emit(ConfigEventKind::Removed, id, key);
        }
        true
    }

    fn remove_document(&self, id: &DeviceId, key: &str) -> bool {
        let removed = {
            let mut subjects = self.subjects.write();
            let Some(docs) = subjects.get_mut(id) else {
                return false;
            };
            let removed = docs.remove(key).is_some();
            if docs.is_empty() {
                subjects.remove(id);
            }
            removed
        };
        if removed {
            self.emit(ConfigEventKind::Removed, id, key);
        }
        removed
    }

    fn all_subjects(&self) -> Vec<DeviceId> {
        self.subjects.read().keys().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for MemoryConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConfigStore")
            .field("subjects", &self.len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
