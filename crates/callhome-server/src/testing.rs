// ============================================
// File: crates/callhome-server/src/testing.rs
// ============================================
//! Shared fixtures for unit tests.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use callhome_core::{DeviceConfig, DeviceConfigBuilder, HostKey};
use callhome_common::DeviceId;
use callhome_transport::{
    HostKeyVerifier, MockAuth, MockConnector, PeerInfo, SshConnector, SshSession,
};

/// A valid ed25519 host key whose key bytes are all `seed`.
pub(crate) fn host_key(seed: u8) -> HostKey {
    let alg = b"ssh-ed25519";
    let mut blob = Vec::new();
    blob.extend_from_slice(&(alg.len() as u32).to_be_bytes());
    blob.extend_from_slice(alg);
    blob.extend_from_slice(&32u32.to_be_bytes());
    blob.extend_from_slice(&[seed; 32]);
    HostKey::from_blob(blob).unwrap()
}

/// OpenSSH text of [`host_key`].
pub(crate) fn key_text(seed: u8) -> String {
    host_key(seed).to_openssh()
}

/// Builder for a device expecting `host_key(seed)`, user `netconf`, password `pw`.
pub(crate) fn device_builder(id: &str, seed: u8) -> DeviceConfigBuilder {
    DeviceConfigBuilder::new(DeviceId::new(id), key_text(seed), "netconf").password("pw")
}

/// Composite config for [`device_builder`].
pub(crate) fn device_config(seed: u8) -> DeviceConfig {
    device_builder("fixture", seed).build().unwrap().config()
}

pub(crate) fn addr(text: &str) -> SocketAddr {
    text.parse().unwrap()
}

pub(crate) struct AcceptAll;

#[async_trait]
impl HostKeyVerifier for AcceptAll {
    async fn verify(&self, _peer: SocketAddr, _key: &HostKey) -> bool {
        true
    }
}

/// An established mock SSH session from `peer` presenting `host_key(1)`.
pub(crate) async fn active_mock_session(
    peer: &str,
) -> (Arc<dyn SshSession>, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new());
    connector.script(addr(peer), host_key(1), MockAuth::Accept);
    let (stream, _) = tokio::io::duplex(64);
    let session = connector
        .establish(Box::new(stream), PeerInfo::new(addr(peer)), Arc::new(AcceptAll))
        .await
        .unwrap();
    (session, connector)
}

/// Polls `condition` every 10ms for up to 5s.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

/// A loopback port that was free a moment ago.
pub(crate) fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
