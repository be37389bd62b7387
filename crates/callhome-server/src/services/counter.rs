// ============================================
// File: crates/callhome-server/src/services/counter.rs
// ============================================
//! # Durable Counter
//!
//! ## Creation Reason
//! Reactively provisioned devices get identities derived from a counter
//! that must keep increasing across restarts, otherwise a restarted
//! controller would hand out ids that already exist.
//!
//! ## Main Functionality
//! - `DurableCounter::open`: JSON state file `{"next": N}`
//! - `DurableCounter::in_memory`: volatile variant
//! - `draw`: returns the next value and persists its successor
//!
//! ## ⚠️ Important Note for Next Developer
//! - The mutex covers draw + write only; callers never hold it otherwise
//! - The file is replaced via write-to-temp + rename
//! - A failed write does not advance the counter
//!
//! ## Last Modified
//! v0.1.0 - Initial counter

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ServerError};

#[derive(Debug, Serialize, Deserialize)]
struct CounterFile {
    next: u64,
}

/// Monotonic counter, optionally backed by a file.
#[derive(Debug)]
pub struct DurableCounter {
    next: Mutex<u64>,
    path: Option<PathBuf>,
}

impl DurableCounter {
    /// Volatile counter whose first draw is `start`.
    #[must_use]
    pub fn in_memory(start: u64) -> Self {
        Self {
            next: Mutex::new(start),
            path: None,
        }
    }

    /// Opens (or starts) a counter persisted at `path`.
    ///
    /// A missing file means a fresh counter whose first draw is `0`.
    ///
    /// # Errors
    /// `Store` if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let next = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let state: CounterFile = serde_json::from_str(&content).map_err(|e| {
                    ServerError::store(format!("counter file {}: {e}", path.display()))
                })?;
                state.next
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(ServerError::store(format!(
                    "counter file {}: {e}",
                    path.display()
                )))
            }
        };
        info!(path = %path.display(), next, "Device counter opened");
        Ok(Self {
            next: Mutex::new(next),
            path: Some(path),
        })
    }

    /// Returns the next value and durably records that it was issued.
    ///
    /// # Errors
    /// `CapacityExhausted` at `u64::MAX`, `Store` if persisting fails.
    pub fn draw(&self) -> Result<u64> {
        let mut next = self.next.lock();
        let value = *next;
        let successor = value
            .checked_add(1)
            .ok_or(ServerError::CapacityExhausted { issued: value })?;
        if let Some(path) = &self.path {
            persist(path, successor)?;
        }
        *next = successor;
        debug!(value, "Counter drawn");
        Ok(value)
    }
}

fn persist(path: &Path, next: u64) -> Result<()> {
    let content = serde_json::to_string_pretty(&CounterFile { next })
        .map_err(|e| ServerError::store(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|e| ServerError::store(format!("writing {}: {e}", path.display())))
}

// ============================================
// Tests
// ============================================
