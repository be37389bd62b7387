// ============================================
// File: crates/callhome-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the identifiers shared by the config store, the session
//! registry and the upward API of the call-home controller.
//!
//! ## Main Functionality
//! - `DeviceId`: stable managed-device identifier (store subject and
//!   registry key)
//! - `DeviceEndpoint`: `(ip, port, path)` triple encoded in a `DeviceId`
//! - `ConnectionId`: random per-connection tag used in log lines
//!
//! ## Device Id Formats
//! ```text
//! operator-declared:  netconf:<ip>[:<port>][/<path>]    netconf:10.0.0.1:830
//!                     netconf:[<ipv6>]:<port>           netconf:[2001:db8::1]:830
//! reactively issued:  netconf<ip>:<port>                netconf0.0.0.12:7
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Both formats are persisted as store subjects; do not change them
//! - Reactive ids always carry `0` as the first IPv4 octet until the
//!   allocator has issued more than 2^24 * 255 ids
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Scheme prefix shared by every call-home device id.
pub const DEVICE_ID_SCHEME: &str = "netconf";

// ============================================
// DeviceId
// ============================================

/// Stable identifier of a managed device.
///
/// # Example
/// ```
/// use callhome_common::types::DeviceId;
/// use std::net::Ipv4Addr;
///
/// let id = DeviceId::call_home(Ipv4Addr::new(0, 0, 0, 0), 0);
/// assert_eq!(id.as_str(), "netconf0.0.0.0:0");
/// assert!(id.is_call_home());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps an arbitrary id string without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the id issued to a reactively provisioned device.
    #[must_use]
    pub fn call_home(address: Ipv4Addr, port: u16) -> Self {
        Self(format!("{DEVICE_ID_SCHEME}{address}:{port}"))
    }

    /// Builds the id of an operator-declared device.
    #[must_use]
    pub fn declared(ip: IpAddr, port: Option<u16>, path: Option<&str>) -> Self {
        let mut id = match ip {
            IpAddr::V4(v4) => format!("{DEVICE_ID_SCHEME}:{v4}"),
            IpAddr::V6(v6) => format!("{DEVICE_ID_SCHEME}:[{v6}]"),
        };
        if let Some(port) = port {
            id.push(':');
            id.push_str(&port.to_string());
        }
        if let Some(path) = path.filter(|p| !p.is_empty()) {
            id.push('/');
            id.push_str(path.trim_start_matches('/'));
        }
        Self(id)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the `(ip, port, path)` triple carried by the id.
    ///
    /// Returns `None` for ids outside the `netconf` scheme or with an
    /// unparsable address.
    #[must_use]
    pub fn endpoint(&self) -> Option<DeviceEndpoint> {
        let rest = self.0.strip_prefix(DEVICE_ID_SCHEME)?;
        let rest = rest.strip_prefix(':').unwrap_or(rest);

        let (host, tail) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']')?;
            (host, tail)
        } else {
            match rest.find(['/', ':']) {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            }
        };
        let ip: IpAddr = host.parse().ok()?;

        let (port_part, path) = match tail.split_once('/') {
            Some((port_part, path)) => (port_part, Some(path.to_string())),
            None => (tail, None),
        };
        let port = match port_part.strip_prefix(':') {
            Some(digits) => Some(digits.parse::<u16>().ok()?),
            None if port_part.is_empty() => None,
            None => return None,
        };

        Some(DeviceEndpoint {
            ip,
            port,
            path: path.filter(|p| !p.is_empty()),
        })
    }

    /// Returns `true` if the id was issued by the reactive provisioner:
    /// `netconf` prefix and a leading address octet of `0`.
    #[must_use]
    pub fn is_call_home(&self) -> bool {
        if !self.0.starts_with(DEVICE_ID_SCHEME) {
            return false;
        }
        match self.endpoint().map(|e| e.ip) {
            Some(IpAddr::V4(v4)) => v4.octets()[0] == 0,
            Some(IpAddr::V6(v6)) => v6.octets()[0] == 0,
            None => false,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CommonError::invalid_device_id(s, "cannot be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================
// DeviceEndpoint
// ============================================

/// Address triple decoded from a [`DeviceId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    /// Management address.
    pub ip: IpAddr,
    /// Management port, if the id carries one.
    pub port: Option<u16>,
    /// Optional sub-path (e.g. a virtual device behind one address).
    pub path: Option<String>,
}

// ============================================
// ConnectionId
// ============================================

/// Random tag attached to one accepted TCP connection.
///
/// Only used to correlate log lines; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new random connection id.
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::thread_rng().next_u64())
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ============================================
// Tests
// ============================================
