// ============================================
// File: crates/callhome-core/src/device.rs
// ============================================
//! # Device Documents
//!
//! ## Creation Reason
//! A managed device is described by several JSON documents filed under
//! the same subject in the config store. This module owns their shapes
//! and the composite view the controller works with.
//!
//! ## Document Layout
//! ```text
//! subject "netconf0.0.0.0:0"
//! ├── "netconf-ch"  DeviceDocument   serverKey, username, password?, sshKey?,
//! │                                  path?, connectTimeout?, replyTimeout?,
//! │                                  idleTimeout?
//! ├── "basic"       DriverDocument   driver            (absent => "netconf")
//! └── "netconf"     AccessDocument   username, ip, port, ... (only while Active)
//! ```
//!
//! ## Main Functionality
//! - Typed (de)serialization of each document
//! - `DeviceConfig`: `netconf-ch` + `basic` merged into one record
//! - `DeviceConfigBuilder`: builds the documents for a new device
//! - `DeviceInfo`: connection parameters handed to the upper layer
//!
//! ## ⚠️ Important Note for Next Developer
//! - Timeouts are whole seconds; absent means "use the controller default"
//! - An empty password and a missing password mean the same thing
//! - `Debug` impls here redact secrets; keep them manual
//!
//! ## Last Modified
//! v0.1.0 - Initial document model

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use callhome_common::DeviceId;

use crate::error::{CoreError, Result};
use crate::keys::{Credential, HostKey};

// ============================================
// Constants
// ============================================

/// Store subject class every device document is filed under.
pub const DEVICES_SUBJECT: &str = "devices";

/// Key of the call-home config document.
pub const CALL_HOME_CONFIG_KEY: &str = "netconf-ch";

/// Key of the driver document.
pub const DRIVER_CONFIG_KEY: &str = "basic";

/// Key of the access document written while a session is active.
pub const ACCESS_CONFIG_KEY: &str = "netconf";

/// Driver assumed when no driver document exists.
pub const DEFAULT_DRIVER: &str = "netconf";

// ============================================
// DeviceDocument ("netconf-ch")
// ============================================

/// Persisted call-home configuration of one device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDocument {
    /// Expected host key in OpenSSH text form.
    pub server_key: String,
    /// SSH username.
    pub username: String,
    /// SSH password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// SSH private key (PEM / OpenSSH).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
    /// Optional sub-path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Connect timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u32>,
    /// Reply timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_timeout: Option<u32>,
    /// Idle timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u32>,
}

impl DeviceDocument {
    /// Decodes and validates a stored document.
    ///
    /// # Errors
    /// `InvalidDocument` on a shape mismatch, `MissingField` when
    /// `serverKey` or `username` is empty.
    pub fn from_value(value: &Value) -> Result<Self> {
        let doc: Self = serde_json::from_value(value.clone())
            .map_err(|e| CoreError::invalid_document(CALL_HOME_CONFIG_KEY, e))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Encodes the document for the store.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Checks mandatory fields.
    ///
    /// # Errors
    /// `MissingField` when `serverKey` or `username` is empty.
    pub fn validate(&self) -> Result<()> {
        if self.server_key.trim().is_empty() {
            return Err(CoreError::missing_field("serverKey"));
        }
        if self.username.is_empty() {
            return Err(CoreError::missing_field("username"));
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDocument")
            .field("username", &self.username)
            .field("has_password", &non_empty(self.password.as_deref()).is_some())
            .field("has_ssh_key", &non_empty(self.ssh_key.as_deref()).is_some())
            .field("path", &self.path)
            .field("connect_timeout", &self.connect_timeout)
            .field("reply_timeout", &self.reply_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================
// DriverDocument ("basic")
// ============================================

/// Driver selection for a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDocument {
    /// Driver name.
    #[serde(default = "default_driver")]
    pub driver: String,
}

fn default_driver() -> String {
    DEFAULT_DRIVER.to_string()
}

impl Default for DriverDocument {
    fn default() -> Self {
        Self {
            driver: default_driver(),
        }
    }
}

impl DriverDocument {
    /// Decodes a stored driver document.
    ///
    /// # Errors
    /// `InvalidDocument` on a shape mismatch.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::invalid_document(DRIVER_CONFIG_KEY, e))
    }

    /// Encodes the document for the store.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "driver": self.driver })
    }
}

// ============================================
// DeviceConfig (composite)
// ============================================

/// Everything the controller knows about a device before it connects.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Expected host key (OpenSSH text).
    pub server_key: String,
    /// SSH username.
    pub username: String,
    /// SSH password.
    pub password: Option<String>,
    /// SSH private key.
    pub ssh_key: Option<String>,
    /// Optional sub-path.
    pub path: Option<String>,
    /// Connect timeout override (seconds).
    pub connect_timeout: Option<u32>,
    /// Reply timeout override (seconds).
    pub reply_timeout: Option<u32>,
    /// Idle timeout override (seconds).
    pub idle_timeout: Option<u32>,
    /// Driver name.
    pub driver: String,
}

impl DeviceConfig {
    /// Merges the call-home and driver documents.
    #[must_use]
    pub fn from_documents(device: DeviceDocument, driver: Option<DriverDocument>) -> Self {
        Self {
            server_key: device.server_key,
            username: device.username,
            password: device.password,
            ssh_key: device.ssh_key,
            path: device.path,
            connect_timeout: device.connect_timeout,
            reply_timeout: device.reply_timeout,
            idle_timeout: device.idle_timeout,
            driver: driver.unwrap_or_default().driver,
        }
    }

    /// Decodes the stored host key.
    ///
    /// # Errors
    /// `KeyDecode` if the stored text is not a valid key.
    pub fn host_key(&self) -> Result<HostKey> {
        HostKey::parse(&self.server_key)
    }

    /// Selects the single authentication method to attempt.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        if let Some(password) = non_empty(self.password.as_deref()) {
            return Some(Credential::password(password));
        }
        non_empty(self.ssh_key.as_deref()).map(Credential::private_key)
    }

    /// Connect timeout, falling back to `default`.
    #[must_use]
    pub fn connect_timeout_or(&self, default: Duration) -> Duration {
        seconds_or(self.connect_timeout, default)
    }

    /// Idle timeout, falling back to `default`.
    #[must_use]
    pub fn idle_timeout_or(&self, default: Duration) -> Duration {
        seconds_or(self.idle_timeout, default)
    }

    /// Splits back into the `netconf-ch` document.
    #[must_use]
    pub fn device_document(&self) -> DeviceDocument {
        DeviceDocument {
            server_key: self.server_key.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            ssh_key: self.ssh_key.clone(),
            path: self.path.clone(),
            connect_timeout: self.connect_timeout,
            reply_timeout: self.reply_timeout,
            idle_timeout: self.idle_timeout,
        }
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("username", &self.username)
            .field("driver", &self.driver)
            .field("path", &self.path)
            .field("connect_timeout", &self.connect_timeout)
            .field("reply_timeout", &self.reply_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

fn seconds_or(value: Option<u32>, default: Duration) -> Duration {
    match value {
        Some(secs) if secs > 0 => Duration::from_secs(u64::from(secs)),
        _ => default,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

// ============================================
// AccessDocument ("netconf")
// ============================================

/// Connection parameters published while a session is active.
///
/// `ip` and `port` are the remote socket address the device called
/// from, not the address encoded in its id.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDocument {
    /// Username the session authenticated as.
    pub username: String,
    /// Remote address of the device.
    pub ip: String,
    /// Remote port of the device.
    pub port: u16,
    /// SSH password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// SSH private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
    /// Optional sub-path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Connect timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u32>,
    /// Reply timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_timeout: Option<u32>,
    /// Idle timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u32>,
}

impl AccessDocument {
    /// Builds the document for a freshly activated session.
    #[must_use]
    pub fn for_session(config: &DeviceConfig, username: &str, remote: SocketAddr) -> Self {
        Self {
            username: username.to_string(),
            ip: remote.ip().to_string(),
            port: remote.port(),
            password: non_empty(config.password.as_deref()).map(str::to_string),
            ssh_key: non_empty(config.ssh_key.as_deref()).map(str::to_string),
            path: config.path.clone(),
            connect_timeout: config.connect_timeout,
            reply_timeout: config.reply_timeout,
            idle_timeout: config.idle_timeout,
        }
    }

    /// Decodes a stored access document.
    ///
    /// # Errors
    /// `InvalidDocument` on a shape mismatch.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::invalid_document(ACCESS_CONFIG_KEY, e))
    }

    /// Encodes the document for the store.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parses `ip`.
    ///
    /// # Errors
    /// `InvalidDocument` if `ip` is not an address.
    pub fn ip_addr(&self) -> Result<IpAddr> {
        self.ip
            .parse()
            .map_err(|e| CoreError::invalid_document(ACCESS_CONFIG_KEY, format!("ip: {e}")))
    }
}

impl fmt::Debug for AccessDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessDocument")
            .field("username", &self.username)
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ============================================
// DeviceConfigBuilder
// ============================================

#[derive(Clone)]
enum Target {
    Fixed(DeviceId),
    Endpoint { ip: IpAddr, port: Option<u16> },
}

/// Builds the documents for a new device.
///
/// # Example
/// ```ignore
/// let device = DeviceConfigBuilder::for_endpoint(ip, Some(830), server_key, "admin")
///     .password("secret")
///     .connect_timeout(10)
///     .build()?;
/// store.apply_documents(DEVICES_SUBJECT, &device.id, device.documents())?;
/// ```
#[derive(Clone)]
pub struct DeviceConfigBuilder {
    target: Target,
    document: DeviceDocument,
    driver: String,
}

impl DeviceConfigBuilder {
    /// Starts a builder whose id is fixed up front.
    pub fn new(
        device_id: DeviceId,
        server_key: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self::with_target(Target::Fixed(device_id), server_key.into(), username.into())
    }

    /// Starts a builder whose id is derived as `netconf:<ip>[:<port>][/<path>]`.
    pub fn for_endpoint(
        ip: IpAddr,
        port: Option<u16>,
        server_key: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self::with_target(Target::Endpoint { ip, port }, server_key.into(), username.into())
    }

    fn with_target(target: Target, server_key: String, username: String) -> Self {
        Self {
            target,
            document: DeviceDocument {
                server_key,
                username,
                password: None,
                ssh_key: None,
                path: None,
                connect_timeout: None,
                reply_timeout: None,
                idle_timeout: None,
            },
            driver: DEFAULT_DRIVER.to_string(),
        }
    }

    /// Sets the password; empty strings are dropped.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.document.password = Some(password.into()).filter(|p| !p.is_empty());
        self
    }

    /// Sets the private key; empty strings are dropped.
    #[must_use]
    pub fn ssh_key(mut self, key: impl Into<String>) -> Self {
        self.document.ssh_key = Some(key.into()).filter(|k| !k.is_empty());
        self
    }

    /// Sets the sub-path; empty strings are dropped.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.document.path = Some(path.into()).filter(|p| !p.is_empty());
        self
    }

    /// Sets the driver name.
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Sets the connect timeout in seconds.
    #[must_use]
    pub fn connect_timeout(mut self, secs: u32) -> Self {
        self.document.connect_timeout = Some(secs);
        self
    }

    /// Sets the reply timeout in seconds.
    #[must_use]
    pub fn reply_timeout(mut self, secs: u32) -> Self {
        self.document.reply_timeout = Some(secs);
        self
    }

    /// Sets the idle timeout in seconds.
    #[must_use]
    pub fn idle_timeout(mut self, secs: u32) -> Self {
        self.document.idle_timeout = Some(secs);
        self
    }

    /// Returns the id the built device will carry.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        match &self.target {
            Target::Fixed(id) => id.clone(),
            Target::Endpoint { ip, port } => {
                DeviceId::declared(*ip, *port, self.document.path.as_deref())
            }
        }
    }

    /// Validates and produces the device.
    ///
    /// # Errors
    /// `MissingField` for an empty username, server key or driver;
    /// `KeyDecode` if the server key does not parse.
    pub fn build(self) -> Result<ProvisionedDevice> {
        self.document.validate()?;
        HostKey::parse(&self.document.server_key)?;
        if self.driver.is_empty() {
            return Err(CoreError::missing_field("driver"));
        }
        Ok(ProvisionedDevice {
            id: self.device_id(),
            device: self.document,
            driver: DriverDocument {
                driver: self.driver,
            },
        })
    }
}

// ============================================
// ProvisionedDevice
// ============================================

/// Output of [`DeviceConfigBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedDevice {
    /// Subject the documents are filed under.
    pub id: DeviceId,
    /// `netconf-ch` document.
    pub device: DeviceDocument,
    /// `basic` document.
    pub driver: DriverDocument,
}

impl ProvisionedDevice {
    /// Returns `(key, payload)` pairs for one atomic store write.
    #[must_use]
    pub fn documents(&self) -> Vec<(String, Value)> {
        vec![
            (CALL_HOME_CONFIG_KEY.to_string(), self.device.to_value()),
            (DRIVER_CONFIG_KEY.to_string(), self.driver.to_value()),
        ]
    }

    /// Composite view of the documents.
    #[must_use]
    pub fn config(&self) -> DeviceConfig {
        DeviceConfig::from_documents(self.device.clone(), Some(self.driver.clone()))
    }
}

// ============================================
// DeviceInfo
// ============================================

/// Connection parameters handed to the upper protocol layer.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device identity.
    pub device_id: DeviceId,
    /// SSH username.
    pub username: String,
    /// SSH password.
    pub password: Option<String>,
    /// Device address.
    pub ip: IpAddr,
    /// Device port.
    pub port: u16,
    /// Optional sub-path.
    pub path: Option<String>,
    /// SSH private key.
    pub ssh_key: Option<String>,
    /// Connect timeout (seconds).
    pub connect_timeout: Option<u32>,
    /// Reply timeout (seconds).
    pub reply_timeout: Option<u32>,
    /// Idle timeout (seconds).
    pub idle_timeout: Option<u32>,
}

impl DeviceInfo {
    /// Assembles device info from a config and a reachable address.
    #[must_use]
    pub fn from_config(
        device_id: DeviceId,
        username: &str,
        config: &DeviceConfig,
        remote: SocketAddr,
    ) -> Self {
        Self {
            device_id,
            username: username.to_string(),
            password: config.password.clone(),
            ip: remote.ip(),
            port: remote.port(),
            path: config.path.clone(),
            ssh_key: config.ssh_key.clone(),
            connect_timeout: config.connect_timeout,
            reply_timeout: config.reply_timeout,
            idle_timeout: config.idle_timeout,
        }
    }
}

impl fmt::Debug for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInfo")
            .field("device_id", &self.device_id)
            .field("username", &self.username)
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::tests::ed25519_text;
    use serde_json::json;
    use std::net::Ipv4Addr;

    #[test]
    fn test_device_document_camel_case() {
        let value = json!({
            "serverKey": ed25519_text(1),
            "username": "admin",
            "password": "pw",
            "connectTimeout": 7
        });
        let doc = DeviceDocument::from_value(&value).unwrap();
        assert_eq!(doc.username, "admin");
        assert_eq!(doc.connect_timeout, Some(7));
        assert_eq!(doc.ssh_key, None);

        let encoded = doc.to_value();
        assert_eq!(encoded["serverKey"], json!(ed25519_text(1)));
        assert!(encoded.get("sshKey").is_none());
    }

    #[test]
    fn test_device_document_requires_key_and_username() {
        let no_key = json!({ "serverKey": "", "username": "admin" });
        assert!(matches!(
            DeviceDocument::from_value(&no_key),
            Err(CoreError::MissingField { .. })
        ));
        let wrong_shape = json!({ "username": 5 });
        assert!(matches!(
            DeviceDocument::from_value(&wrong_shape),
            Err(CoreError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn test_driver_defaults_to_netconf() {
        let doc = DeviceDocument::from_value(&json!({
            "serverKey": ed25519_text(1),
            "username": "u"
        }))
        .unwrap();
        assert_eq!(DeviceConfig::from_documents(doc.clone(), None).driver, "netconf");

        let basic = DriverDocument::from_value(&json!({ "driver": "juniper" })).unwrap();
        assert_eq!(DeviceConfig::from_documents(doc, Some(basic)).driver, "juniper");
        assert_eq!(DriverDocument::from_value(&json!({})).unwrap().driver, "netconf");
    }

    #[test]
    fn test_credential_prefers_password() {
        let built = DeviceConfigBuilder::new(DeviceId::new("netconf:10.0.0.1:830"), ed25519_text(1), "u")
            .password("pw")
            .ssh_key("PEM")
            .build()
            .unwrap();
        assert!(matches!(built.config().credential(), Some(Credential::Password(_))));

        let key_only = DeviceConfigBuilder::new(DeviceId::new("x"), ed25519_text(1), "u")
            .password("")
            .ssh_key("PEM")
            .build()
            .unwrap();
        assert!(matches!(key_only.config().credential(), Some(Credential::PrivateKey(_))));

        let none = DeviceConfigBuilder::new(DeviceId::new("y"), ed25519_text(1), "u")
            .build()
            .unwrap();
        assert!(none.config().credential().is_none());
    }

    #[test]
    fn test_builder_endpoint_id_and_documents() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));
        let device = DeviceConfigBuilder::for_endpoint(ip, Some(830), ed25519_text(2), "admin")
            .path("vr1")
            .driver("ovs-netconf")
            .idle_timeout(30)
            .build()
            .unwrap();
        assert_eq!(device.id.as_str(), "netconf:192.0.2.10:830/vr1");

        let docs = device.documents();
        assert_eq!(docs[0].0, CALL_HOME_CONFIG_KEY);
        assert_eq!(docs[0].1["idleTimeout"], json!(30));
        assert_eq!(docs[1], (DRIVER_CONFIG_KEY.to_string(), json!({ "driver": "ovs-netconf" })));
    }

    #[test]
    fn test_builder_rejects_bad_input() {
        let id = DeviceId::new("netconf0.0.0.0:0");
        assert!(DeviceConfigBuilder::new(id.clone(), "garbage", "u").build().is_err());
        assert!(DeviceConfigBuilder::new(id.clone(), ed25519_text(1), "").build().is_err());
        assert!(DeviceConfigBuilder::new(id, ed25519_text(1), "u").driver("").build().is_err());
    }

    #[test]
    fn test_timeouts_fall_back_to_default() {
        let mut config = DeviceConfigBuilder::new(DeviceId::new("d"), ed25519_text(1), "u")
            .connect_timeout(9)
            .build()
            .unwrap()
            .config();
        let default = Duration::from_secs(5);
        assert_eq!(config.connect_timeout_or(default), Duration::from_secs(9));
        assert_eq!(config.idle_timeout_or(default), default);
        config.connect_timeout = Some(0);
        assert_eq!(config.connect_timeout_or(default), default);
    }

    #[test]
    fn test_access_document_uses_remote_address() {
        let config = DeviceConfigBuilder::new(DeviceId::new("d"), ed25519_text(1), "u")
            .password("pw")
            .reply_timeout(4)
            .build()
            .unwrap()
            .config();
        let remote: SocketAddr = "203.0.113.5:22".parse().unwrap();
        let access = AccessDocument::for_session(&config, "u", remote);
        let value = access.to_value();
        assert_eq!(value["ip"], json!("203.0.113.5"));
        assert_eq!(value["port"], json!(22));
        assert_eq!(value["password"], json!("pw"));
        assert_eq!(value["replyTimeout"], json!(4));
        assert!(value.get("sshKey").is_none());

        let decoded = AccessDocument::from_value(&value).unwrap();
        assert_eq!(decoded.ip_addr().unwrap(), remote.ip());
    }

    #[test]
    fn test_debug_never_prints_secrets() {
        let config = DeviceConfigBuilder::new(DeviceId::new("d"), ed25519_text(1), "u")
            .password("topsecret")
            .build()
            .unwrap()
            .config();
        let info = DeviceInfo::from_config(
            DeviceId::new("d"),
            "u",
            &config,
            "198.51.100.1:4334".parse().unwrap(),
        );
        assert!(!format!("{config:?}").contains("topsecret"));
        assert!(!format!("{info:?}").contains("topsecret"));
        assert!(!format!("{:?}", config.device_document()).contains("topsecret"));
    }
}
