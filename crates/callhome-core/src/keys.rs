// ============================================
// File: crates/callhome-core/src/keys.rs
// ============================================
//! # SSH Key Material
//!
//! ## Creation Reason
//! Devices are recognised by the SSH host key they present when they
//! call home. Stored configs keep that key as OpenSSH text; the
//! transport hands over the raw wire blob. `HostKey` is the common
//! form both sides are compared in.
//!
//! ## Main Functionality
//! - `HostKey`: `(algorithm, blob)` pair with OpenSSH text codec and a
//!   SHA-256 fingerprint for logs
//! - `Credential`: what the controller authenticates with
//!
//! ## Key Formats
//! ```text
//! text:  ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAI... optional-comment
//!        AAAAC3NzaC1lZDI1NTE5AAAAI...             (bare blob)
//!
//! blob:  ┌──────────┬───────────────┬────────────────────┐
//!        │ len (u32)│ algorithm name│ key-specific fields│
//!        └──────────┴───────────────┴────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Equality is on `(algorithm, blob)`; comments are discarded
//! - `Credential` wraps its secret in `Zeroizing`; keep it that way
//!
//! ## Last Modified
//! v0.1.0 - Initial key handling

use std::fmt;
use std::str::FromStr;

use base64::{
    engine::general_purpose::{STANDARD as BASE64, STANDARD_NO_PAD as BASE64_NO_PAD},
    Engine,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Longest algorithm name accepted inside a key blob.
const MAX_ALGORITHM_LEN: usize = 64;

// ============================================
// HostKey
// ============================================

/// SSH public host key presented by a calling-home device.
///
/// # Example
/// ```ignore
/// let key: HostKey = "ssh-ed25519 AAAAC3Nza... router-7".parse()?;
/// assert_eq!(key.algorithm(), "ssh-ed25519");
/// println!("{}", key.fingerprint()); // SHA256:...
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    algorithm: String,
    blob: Vec<u8>,
}

impl HostKey {
    /// Builds a key from its SSH wire blob, reading the algorithm name
    /// embedded at the start of the blob.
    ///
    /// # Errors
    /// Returns `KeyDecode` if the blob has no valid algorithm prefix.
    pub fn from_blob(blob: Vec<u8>) -> Result<Self> {
        let algorithm = read_algorithm(&blob)?;
        Ok(Self { algorithm, blob })
    }

    /// Parses OpenSSH one-line text or a bare base64 blob.
    ///
    /// # Errors
    /// Returns `KeyDecode` on bad base64, a malformed blob, or when the
    /// declared algorithm differs from the one inside the blob.
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let first = tokens
            .next()
            .ok_or_else(|| CoreError::key_decode("empty key text"))?;

        match tokens.next() {
            None => Self::from_blob(decode_base64(first)?),
            Some(encoded) => {
                let key = Self::from_blob(decode_base64(encoded)?)?;
                if key.algorithm != first {
                    return Err(CoreError::key_decode(format!(
                        "declared algorithm '{first}' does not match blob algorithm '{}'",
                        key.algorithm
                    )));
                }
                Ok(key)
            }
        }
    }

    /// Returns the algorithm name (e.g. `ssh-ed25519`).
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Returns the raw wire blob.
    #[must_use]
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Encodes as `<alg> <base64>` without a comment.
    #[must_use]
    pub fn to_openssh(&self) -> String {
        format!("{} {}", self.algorithm, BASE64.encode(&self.blob))
    }

    /// Returns the OpenSSH-style fingerprint `SHA256:<base64-nopad>`.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.blob);
        format!("SHA256:{}", BASE64_NO_PAD.encode(digest))
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded.trim())
        .map_err(|e| CoreError::key_decode(format!("invalid base64: {e}")))
}

fn read_algorithm(blob: &[u8]) -> Result<String> {
    let header: [u8; 4] = blob
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| CoreError::key_decode("blob shorter than length prefix"))?;
    let len = u32::from_be_bytes(header) as usize;
    if len == 0 || len > MAX_ALGORITHM_LEN {
        return Err(CoreError::key_decode(format!("implausible algorithm length {len}")));
    }

    let name = blob
        .get(4..4 + len)
        .ok_or_else(|| CoreError::key_decode("blob truncated inside algorithm name"))?;
    if !name.iter().all(|b| b.is_ascii_graphic()) {
        return Err(CoreError::key_decode("algorithm name is not printable ASCII"));
    }
    if blob.len() == 4 + len {
        return Err(CoreError::key_decode("blob carries no key data"));
    }

    Ok(String::from_utf8_lossy(name).into_owned())
}

impl FromStr for HostKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_openssh())
    }
}

impl fmt::Debug for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKey")
            .field("algorithm", &self.algorithm)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

// ============================================
// Credential
// ============================================

/// Secret used to authenticate to a device.
///
/// Exactly one method is attempted per connection: the password when
/// one is configured, else the private key.
#[derive(Clone)]
pub enum Credential {
    /// Password authentication.
    Password(Zeroizing<String>),
    /// Public-key authentication with an OpenSSH/PEM private key.
    PrivateKey(Zeroizing<String>),
}

impl Credential {
    /// Creates a password credential.
    pub fn password(secret: impl Into<String>) -> Self {
        Self::Password(Zeroizing::new(secret.into()))
    }

    /// Creates a private-key credential.
    pub fn private_key(pem: impl Into<String>) -> Self {
        Self::PrivateKey(Zeroizing::new(pem.into()))
    }

    /// Returns the SSH method name for logging.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::PrivateKey(_) => "publickey",
        }
    }

    /// Returns the secret text.
    #[must_use]
    pub fn expose(&self) -> &str {
        match self {
            Self::Password(s) | Self::PrivateKey(s) => s.as_str(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("method", &self.method())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a syntactically valid ed25519 blob whose key bytes are all `seed`.
    pub(crate) fn ed25519_blob(seed: u8) -> Vec<u8> {
        let alg = b"ssh-ed25519";
        let mut blob = Vec::new();
        blob.extend_from_slice(&(alg.len() as u32).to_be_bytes());
        blob.extend_from_slice(alg);
        blob.extend_from_slice(&32u32.to_be_bytes());
        blob.extend_from_slice(&[seed; 32]);
        blob
    }

    pub(crate) fn ed25519_text(seed: u8) -> String {
        format!("ssh-ed25519 {}", BASE64.encode(ed25519_blob(seed)))
    }

    #[test]
    fn test_parse_openssh_line_with_comment() {
        let text = format!("{} router-7@lab", ed25519_text(1));
        let key = HostKey::parse(&text).unwrap();
        assert_eq!(key.algorithm(), "ssh-ed25519");
        assert_eq!(key.blob(), ed25519_blob(1).as_slice());
        assert_eq!(key.to_openssh(), ed25519_text(1));
    }

    #[test]
    fn test_parse_bare_blob() {
        let bare = BASE64.encode(ed25519_blob(2));
        let key: HostKey = bare.parse().unwrap();
        assert_eq!(key.algorithm(), "ssh-ed25519");
        assert_eq!(key, HostKey::parse(&ed25519_text(2)).unwrap());
    }

    #[test]
    fn test_equality_ignores_comment() {
        let a = HostKey::parse(&format!("{} a", ed25519_text(3))).unwrap();
        let b = HostKey::parse(&format!("{} b", ed25519_text(3))).unwrap();
        let c = HostKey::parse(&ed25519_text(4)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!(HostKey::parse("").is_err());
        assert!(HostKey::parse("ssh-ed25519 !!!not-base64!!!").is_err());
        assert!(HostKey::parse(&format!("ssh-rsa {}", BASE64.encode(ed25519_blob(1)))).is_err());
        assert!(HostKey::from_blob(vec![0, 0, 0]).is_err());
        assert!(HostKey::from_blob(vec![0, 0, 0, 200, b'x']).is_err());
        assert!(HostKey::from_blob(b"\x00\x00\x00\x03abc".to_vec()).is_err());
    }

    #[test]
    fn test_fingerprint_format() {
        let key = HostKey::from_blob(ed25519_blob(5)).unwrap();
        let fp = key.fingerprint();
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.ends_with('='));
        assert_eq!(fp.len(), "SHA256:".len() + 43);
        assert!(format!("{key:?}").contains(&fp));
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let cred = Credential::password("hunter2");
        let debug = format!("{cred:?}");
        assert!(debug.contains("password"));
        assert!(!debug.contains("hunter2"));
        assert_eq!(cred.expose(), "hunter2");
        assert_eq!(Credential::private_key("pem").method(), "publickey");
    }
}
