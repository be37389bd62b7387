// ============================================
// File: crates/callhome-server/src/services/authorization.rs
// ============================================
//! # Authorization Decision Engine
//!
//! ## Creation Reason
//! An inbound call-home connection carries no device identity of its
//! own. The only evidence is the remote address and the SSH host key the
//! device presents; this engine turns that into a device identity and
//! config, or a rejection.
//!
//! ## Decision Procedure
//! ```text
//! decide(remote, key)
//!   │
//!   ├─ scan subjects (sorted) ── stored serverKey == key ? ──► Accepted(id, config)
//!   │
//!   ├─ no match ─► on_session_auth_failed listeners, in order
//!   │                 │ first Some(device)
//!   │                 ▼
//!   │              apply_documents(devices, id, [netconf-ch, basic])
//!   │                 ├─ ok  ──► Accepted(id, config)
//!   │                 └─ err ──► Rejected
//!   │
//!   └─ nobody answers ──► Rejected
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Synchronous on purpose: the connection handler runs it on the
//!   blocking pool under a timeout
//! - Stored keys that fail to decode are skipped, never fatal
//!
//! ## Last Modified
//! v0.1.0 - Initial decision engine

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use callhome_common::DeviceId;
use callhome_core::device::DEVICES_SUBJECT;
use callhome_core::{DeviceConfig, HostKey};

use crate::services::listeners::ListenerSet;
use crate::store::ConfigStore;

/// Outcome of [`AuthorizationEngine::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    /// No device may use this key.
    Rejected,
    /// The key belongs to `session_name`.
    Accepted {
        /// Device identity.
        session_name: DeviceId,
        /// Config to authenticate with.
        config: DeviceConfig,
    },
}

impl AuthorizationDecision {
    /// Returns `true` for `Accepted`.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Maps host keys to devices.
pub struct AuthorizationEngine {
    store: Arc<dyn ConfigStore>,
    listeners: Arc<ListenerSet>,
}

impl AuthorizationEngine {
    /// Creates an engine over `store`, consulting `listeners` for unknown keys.
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStore>, listeners: Arc<ListenerSet>) -> Self {
        Self { store, listeners }
    }

    /// Decides whether `key` presented from `remote` is admitted.
    #[must_use]
    pub fn decide(&self, remote: SocketAddr, key: &HostKey) -> AuthorizationDecision {
        if let Some((session_name, config)) = self.find_known(key) {
            debug!(peer = %remote, device_id = %session_name, "Host key matches stored device");
            return AuthorizationDecision::Accepted {
                session_name,
                config,
            };
        }

        let Some(device) = self.listeners.session_auth_failed(remote, key) else {
            info!(
                peer = %remote,
                fingerprint = %key.fingerprint(),
                "Unknown host key rejected"
            );
            return AuthorizationDecision::Rejected;
        };

        if let Err(e) = self
            .store
            .apply_documents(DEVICES_SUBJECT, &device.id, device.documents())
        {
            warn!(
                peer = %remote,
                device_id = %device.id,
                error = %e,
                "Failed to persist provisioned device"
            );
            return AuthorizationDecision::Rejected;
        }

        AuthorizationDecision::Accepted {
            config: device.config(),
            session_name: device.id,
        }
    }

    /// First stored device, in subject order, expecting `key`.
    #[must_use]
    pub fn find_known(&self, key: &HostKey) -> Option<(DeviceId, DeviceConfig)> {
        self.store.all_subjects().into_iter().find_map(|id| {
            let config = self.store.get_config(&id)?;
            match config.host_key() {
                Ok(stored) if stored == *key => Some((id, config)),
                Ok(_) => None,
                Err(e) => {
                    warn!(device_id = %id, error = %e, "Skipping device with undecodable server key");
                    None
                }
            }
        })
    }
}

impl std::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    use callhome_core::device::CALL_HOME_CONFIG_KEY;

    use crate::error::{Result, ServerError};
    use crate::services::listeners::CallHomeListener;
    use crate::store::{ConfigEvent, MemoryConfigStore};
    use crate::testing::{addr, device_builder, host_key};

    fn seed(store: &MemoryConfigStore, id: &str, key_seed: u8) {
        let device = device_builder(id, key_seed).build().unwrap();
        store
            .apply_documents(DEVICES_SUBJECT, &device.id, device.documents())
            .unwrap();
    }

    fn engine(store: Arc<dyn ConfigStore>) -> (AuthorizationEngine, Arc<ListenerSet>) {
        let listeners = Arc::new(ListenerSet::new());
        (AuthorizationEngine::new(store, Arc::clone(&listeners)), listeners)
    }

    #[test]
    fn test_every_config_resolved_by_its_key() {
        let store = Arc::new(MemoryConfigStore::new());
        for seed_byte in 1..=20u8 {
            seed(&store, &format!("netconf:10.0.0.{seed_byte}:830"), seed_byte);
        }
        let (engine, _) = engine(store);

        for seed_byte in 1..=20u8 {
            match engine.decide(addr("198.51.100.1:4000"), &host_key(seed_byte)) {
                AuthorizationDecision::Accepted { session_name, config } => {
                    assert_eq!(session_name.as_str(), format!("netconf:10.0.0.{seed_byte}:830"));
                    assert_eq!(config.host_key().unwrap(), host_key(seed_byte));
                }
                AuthorizationDecision::Rejected => panic!("key {seed_byte} rejected"),
            }
        }
    }

    #[test]
    fn test_decision_is_idempotent_for_known_key() {
        let store = Arc::new(MemoryConfigStore::new());
        seed(&store, "netconf:10.0.0.1:830", 1);
        let (engine, _) = engine(store);
        let first = engine.decide(addr("198.51.100.1:4000"), &host_key(1));
        let second = engine.decide(addr("198.51.100.2:4001"), &host_key(1));
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_key_without_listeners_rejected() {
        let store = Arc::new(MemoryConfigStore::new());
        seed(&store, "netconf:10.0.0.1:830", 1);
        let (engine, _) = engine(store);
        assert_eq!(
            engine.decide(addr("198.51.100.1:4000"), &host_key(2)),
            AuthorizationDecision::Rejected
        );
    }

    #[test]
    fn test_undecodable_stored_key_skipped() {
        let store = Arc::new(MemoryConfigStore::new());
        store
            .apply_documents(
                DEVICES_SUBJECT,
                &DeviceId::new("netconf:10.0.0.0:1"),
                vec![(
                    CALL_HOME_CONFIG_KEY.to_string(),
                    json!({ "serverKey": "garbage", "username": "u" }),
                )],
            )
            .unwrap();
        seed(&store, "netconf:10.0.0.9:830", 3);
        let (engine, _) = engine(store);
        assert!(engine.decide(addr("198.51.100.1:4000"), &host_key(3)).is_accepted());
    }

    #[test]
    fn test_known_config_beats_provisioner() {
        let store = Arc::new(MemoryConfigStore::new());
        seed(&store, "netconf:10.0.0.1:830", 1);
        let (engine, listeners) = engine(Arc::clone(&store) as Arc<dyn ConfigStore>);

        let consulted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&consulted);
        listeners.add(CallHomeListener::new().on_session_auth_failed(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            device_builder("netconf0.0.0.0:0", 1).build().ok()
        }));

        match engine.decide(addr("198.51.100.1:4000"), &host_key(1)) {
            AuthorizationDecision::Accepted { session_name, .. } => {
                assert_eq!(session_name.as_str(), "netconf:10.0.0.1:830");
            }
            AuthorizationDecision::Rejected => panic!("known key rejected"),
        }
        assert_eq!(consulted.load(Ordering::SeqCst), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_provisioned_device_persisted_atomically() {
        let store = Arc::new(MemoryConfigStore::new());
        let (engine, listeners) = engine(Arc::clone(&store) as Arc<dyn ConfigStore>);
        listeners.add(CallHomeListener::new().on_session_auth_failed(|_, key| {
            callhome_core::DeviceConfigBuilder::new(
                DeviceId::new("netconf0.0.0.0:0"),
                key.to_openssh(),
                "netconf",
            )
            .password("pw")
            .build()
            .ok()
        }));

        let decision = engine.decide(addr("203.0.113.5:22"), &host_key(7));
        assert!(decision.is_accepted());
        let id = DeviceId::new("netconf0.0.0.0:0");
        assert!(store.get_config(&id).is_some());

        // Second contact resolves through the store, not the listener.
        listeners.clear();
        assert_eq!(engine.decide(addr("203.0.113.5:23"), &host_key(7)), decision);
    }

    struct RejectingStore(MemoryConfigStore);

    impl ConfigStore for RejectingStore {
        fn get_config(&self, id: &DeviceId) -> Option<DeviceConfig> {
            self.0.get_config(id)
        }
        fn get_document(&self, id: &DeviceId, key: &str) -> Option<Value> {
            self.0.get_document(id, key)
        }
        fn apply_documents(&self, _: &str, _: &DeviceId, _: Vec<(String, Value)>) -> Result<()> {
            Err(ServerError::store("read-only"))
        }
        fn remove_config(&self, id: &DeviceId) -> bool {
            self.0.remove_config(id)
        }
        fn remove_document(&self, id: &DeviceId, key: &str) -> bool {
            self.0.remove_document(id, key)
        }
        fn all_subjects(&self) -> Vec<DeviceId> {
            self.0.all_subjects()
        }
        fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
            self.0.subscribe()
        }
    }

    #[test]
    fn test_failed_persist_rejects() {
        let store: Arc<dyn ConfigStore> = Arc::new(RejectingStore(MemoryConfigStore::new()));
        let (engine, listeners) = engine(store);
        listeners.add(CallHomeListener::new().on_session_auth_failed(|_, _| {
            device_builder("netconf0.0.0.0:0", 1).build().ok()
        }));
        assert_eq!(
            engine.decide(addr("203.0.113.5:22"), &host_key(1)),
            AuthorizationDecision::Rejected
        );
    }
}
