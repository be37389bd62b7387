// ============================================
// File: crates/callhome-server/src/config.rs
// ============================================
//! # Controller Configuration
//!
//! ## Creation Reason
//! Loads and validates the call-home controller's TOML configuration.
//!
//! ## Main Functionality
//! - `ControllerConfig`: main configuration structure
//! - TOML file loading and parsing
//! - Per-section validation
//! - Operator-declared devices seeded into the store at start
//!
//! ## Configuration Sections
//! - `listener`: bind address and call-home port
//! - `timeouts`: controller-wide connect / reply / idle defaults
//! - `reactive`: defaults for auto-provisioning unknown devices
//! - `limits`: shutdown drain, sweeper interval, decision budget
//! - `logging`: log level
//! - `devices`: devices known up front
//!
//! ## Example Configuration
//! ```toml
//! [listener]
//! bind_addr = "0.0.0.0"
//! port = 4334
//!
//! [timeouts]
//! connect_secs = 5
//! reply_secs = 5
//! idle_secs = 300
//!
//! [reactive]
//! enabled = true
//! username = "netconf"
//! password = "changeme"
//! counter_path = "/var/lib/callhome/counter.json"
//!
//! [[devices]]
//! ip = "192.0.2.10"
//! port = 830
//! server_key = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA..."
//! username = "admin"
//! password = "secret"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `listener.port` is the only setting applied without a restart
//!   (see `CallHomeController::reconfigure_port`)
//! - Reactive timeouts `<= 0` mean "leave unset on provisioned devices"
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use callhome_core::device::{DeviceConfigBuilder, DEFAULT_DRIVER};
use callhome_core::ProvisionedDevice;

use crate::error::{Result, ServerError};

/// IANA-assigned port for NETCONF call-home over SSH.
pub const DEFAULT_CALL_HOME_PORT: u32 = 4334;

// ============================================
// ControllerConfig
// ============================================

/// Main controller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Listening socket.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Controller-wide timeout defaults.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Reactive provisioning defaults.
    #[serde(default)]
    pub reactive: ReactiveConfig,

    /// Resource and shutdown limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Operator-declared devices.
    #[serde(default)]
    pub devices: Vec<DeclaredDevice>,
}

impl ControllerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!(devices = config.devices.len(), "Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns error if the text cannot be parsed or validated.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.listener.validate()?;
        self.timeouts.validate()?;
        self.reactive.validate()?;
        self.limits.validate()?;
        for (index, device) in self.devices.iter().enumerate() {
            device
                .to_provisioned()
                .map_err(|e| ServerError::config_invalid(format!("devices[{index}]"), e.to_string()))?;
        }
        Ok(())
    }

    /// Serializes back to TOML.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

// ============================================
// ListenerConfig
// ============================================

/// Listening socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Call-home port, 1..=65535.
    #[serde(default = "default_port")]
    pub port: u32,
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u32 {
    DEFAULT_CALL_HOME_PORT
}

/// Checks a call-home port and narrows it to `u16`.
///
/// # Errors
/// `ConfigInvalid` unless `1 <= port <= 65535`.
pub fn validate_port(port: u32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ServerError::config_invalid(
            "listener.port",
            format!("{port} is not in 1..=65535"),
        )),
    }
}

impl ListenerConfig {
    fn validate(&self) -> Result<()> {
        validate_port(self.port).map(|_| ())
    }

    /// Socket address to bind.
    ///
    /// # Errors
    /// `ConfigInvalid` if the port is out of range.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_addr, validate_port(self.port)?))
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

// ============================================
// TimeoutsConfig
// ============================================

/// Controller-wide defaults used when a device sets no override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Seconds allowed for SSH authentication.
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,

    /// Seconds allowed for a protocol reply.
    #[serde(default = "default_reply_secs")]
    pub reply_secs: u64,

    /// Seconds of inactivity before a session is closed.
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
}

fn default_connect_secs() -> u64 {
    5
}

fn default_reply_secs() -> u64 {
    5
}

fn default_idle_secs() -> u64 {
    300
}

impl TimeoutsConfig {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("timeouts.connect_secs", self.connect_secs),
            ("timeouts.reply_secs", self.reply_secs),
            ("timeouts.idle_secs", self.idle_secs),
        ] {
            if value == 0 {
                return Err(ServerError::config_invalid(field, "must be greater than 0"));
            }
        }
        Ok(())
    }

    /// Default connect timeout.
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// Default idle timeout.
    #[must_use]
    pub const fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            reply_secs: default_reply_secs(),
            idle_secs: default_idle_secs(),
        }
    }
}

// ============================================
// ReactiveConfig
// ============================================

/// Defaults applied to devices provisioned on first contact.
#[derive(Clone, Serialize, Deserialize)]
pub struct ReactiveConfig {
    /// Whether unknown host keys are provisioned at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SSH username.
    #[serde(default = "default_reactive_username")]
    pub username: String,

    /// SSH password.
    #[serde(default)]
    pub password: String,

    /// SSH private key (PEM / OpenSSH text).
    #[serde(default)]
    pub client_key: String,

    /// Connect timeout in seconds; `<= 0` leaves it unset.
    #[serde(default = "default_unset")]
    pub connect_timeout: i64,

    /// Reply timeout in seconds; `<= 0` leaves it unset.
    #[serde(default = "default_unset")]
    pub reply_timeout: i64,

    /// Idle timeout in seconds; `<= 0` leaves it unset.
    #[serde(default = "default_unset")]
    pub idle_timeout: i64,

    /// Driver recorded for provisioned devices.
    #[serde(default = "default_device_driver")]
    pub device_driver: String,

    /// Durable counter file; in-memory when absent.
    #[serde(default)]
    pub counter_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_reactive_username() -> String {
    "netconf".to_string()
}

fn default_unset() -> i64 {
    -1
}

fn default_device_driver() -> String {
    DEFAULT_DRIVER.to_string()
}

impl ReactiveConfig {
    fn validate(&self) -> Result<()> {
        if self.enabled && self.device_driver.is_empty() {
            return Err(ServerError::config_invalid(
                "reactive.device_driver",
                "cannot be empty",
            ));
        }
        Ok(())
    }
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            username: default_reactive_username(),
            password: String::new(),
            client_key: String::new(),
            connect_timeout: default_unset(),
            reply_timeout: default_unset(),
            idle_timeout: default_unset(),
            device_driver: default_device_driver(),
            counter_path: None,
        }
    }
}

impl fmt::Debug for ReactiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveConfig")
            .field("enabled", &self.enabled)
            .field("username", &self.username)
            .field("has_password", &!self.password.is_empty())
            .field("has_client_key", &!self.client_key.is_empty())
            .field("device_driver", &self.device_driver)
            .field("counter_path", &self.counter_path)
            .finish_non_exhaustive()
    }
}

// ============================================
// LimitsConfig
// ============================================

/// Resource and shutdown limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Seconds to wait for connection tasks on shutdown.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    /// Seconds between idle-session sweeps.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Milliseconds allowed for one authorization decision.
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_ms: u64,
}

fn default_drain_timeout() -> u64 {
    5
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_decision_timeout() -> u64 {
    2000
}

impl LimitsConfig {
    fn validate(&self) -> Result<()> {
        if self.cleanup_interval_secs == 0 {
            return Err(ServerError::config_invalid(
                "limits.cleanup_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.decision_timeout_ms == 0 {
            return Err(ServerError::config_invalid(
                "limits.decision_timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Shutdown drain budget.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Idle sweep period.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Authorization decision budget.
    #[must_use]
    pub const fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            decision_timeout_ms: default_decision_timeout(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// DeclaredDevice
// ============================================

/// A device the operator registers up front.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeclaredDevice {
    /// Management address.
    pub ip: IpAddr,
    /// Management port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Optional sub-path.
    #[serde(default)]
    pub path: Option<String>,
    /// Expected host key, OpenSSH text.
    pub server_key: String,
    /// SSH username.
    pub username: String,
    /// SSH password.
    #[serde(default)]
    pub password: Option<String>,
    /// SSH private key.
    #[serde(default)]
    pub ssh_key: Option<String>,
    /// Driver name.
    #[serde(default)]
    pub driver: Option<String>,
    /// Connect timeout override (seconds).
    #[serde(default)]
    pub connect_timeout: Option<u32>,
    /// Reply timeout override (seconds).
    #[serde(default)]
    pub reply_timeout: Option<u32>,
    /// Idle timeout override (seconds).
    #[serde(default)]
    pub idle_timeout: Option<u32>,
}

impl DeclaredDevice {
    /// Builds the store documents for this device.
    ///
    /// # Errors
    /// Propagates builder validation failures.
    pub fn to_provisioned(&self) -> callhome_core::Result<ProvisionedDevice> {
        let mut builder = DeviceConfigBuilder::for_endpoint(
            self.ip,
            self.port,
            self.server_key.clone(),
            self.username.clone(),
        );
        if let Some(password) = &self.password {
            builder = builder.password(password.clone());
        }
        if let Some(key) = &self.ssh_key {
            builder = builder.ssh_key(key.clone());
        }
        if let Some(path) = &self.path {
            builder = builder.path(path.clone());
        }
        if let Some(driver) = &self.driver {
            builder = builder.driver(driver.clone());
        }
        if let Some(secs) = self.connect_timeout {
            builder = builder.connect_timeout(secs);
        }
        if let Some(secs) = self.reply_timeout {
            builder = builder.reply_timeout(secs);
        }
        if let Some(secs) = self.idle_timeout {
            builder = builder.idle_timeout(secs);
        }
        builder.build()
    }
}

impl fmt::Debug for DeclaredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeclaredDevice")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
