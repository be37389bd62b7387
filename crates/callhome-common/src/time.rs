// ============================================
// File: crates/callhome-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Sessions record when they were created and when they were last used.
//! The idle sweeper reads the last-use mark from a background task while
//! the upper layer refreshes it on every `create_session` call, so the
//! mark must be readable and writable without a lock.
//!
//! ## Main Functionality
//! - `AtomicInstant`: lock-free monotonic timestamp
//! - `Timestamp`: wall-clock Unix seconds for reporting
//!
//! ## ⚠️ Important Note for Next Developer
//! - `AtomicInstant` stores nanoseconds since a process-wide reference
//!   instant; instants earlier than that reference clamp to it
//! - Use `Timestamp` only for display, never for timeout arithmetic
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================
// AtomicInstant
// ============================================

/// Thread-safe wrapper around [`Instant`].
///
/// # Example
/// ```
/// use callhome_common::time::AtomicInstant;
/// use std::time::Instant;
///
/// let last_activity = AtomicInstant::now();
/// last_activity.store(Instant::now());
/// assert!(last_activity.elapsed().as_secs() < 1);
/// ```
#[derive(Debug)]
pub struct AtomicInstant {
    nanos: AtomicU64,
}

impl AtomicInstant {
    fn reference() -> Instant {
        use std::sync::OnceLock;
        static REFERENCE: OnceLock<Instant> = OnceLock::new();
        *REFERENCE.get_or_init(Instant::now)
    }

    fn offset_of(instant: Instant) -> u64 {
        instant
            .checked_duration_since(Self::reference())
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Creates a new `AtomicInstant` set to the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            nanos: AtomicU64::new(Self::offset_of(Instant::now())),
        }
    }

    /// Loads the stored instant.
    #[must_use]
    pub fn load(&self) -> Instant {
        Self::reference() + Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    /// Stores a new instant.
    pub fn store(&self, instant: Instant) {
        self.nanos.store(Self::offset_of(instant), Ordering::Relaxed);
    }

    /// Updates to the current time.
    pub fn touch(&self) {
        self.store(Instant::now());
    }

    /// Returns the elapsed time since the stored instant.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.load().elapsed()
    }

    /// Checks if more than `duration` has elapsed since the stored instant.
    #[must_use]
    pub fn has_elapsed(&self, duration: Duration) -> bool {
        self.elapsed() > duration
    }
}

impl Default for AtomicInstant {
    fn default() -> Self {
        Self::now()
    }
}

// ============================================
// Timestamp
// ============================================

/// Unix timestamp in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a new timestamp from Unix seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Creates a timestamp for the current time.
    ///
    /// A clock set before the epoch reads as `0`.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
        Self(secs)
    }

    /// Returns the Unix timestamp in seconds.
    #[must_use]
    pub const fn as_secs(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_atomic_instant_basic() {
        let atomic = AtomicInstant::now();
        assert!(atomic.load().elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_atomic_instant_touch_moves_forward() {
        let atomic = AtomicInstant::now();
        thread::sleep(Duration::from_millis(10));

        let before = atomic.load();
        atomic.touch();
        assert!(atomic.load() > before);
    }

    #[test]
    fn test_atomic_instant_elapsed() {
        let atomic = AtomicInstant::now();
        thread::sleep(Duration::from_millis(10));

        assert!(atomic.elapsed() >= Duration::from_millis(10));
        assert!(atomic.has_elapsed(Duration::from_millis(5)));
        assert!(!atomic.has_elapsed(Duration::from_secs(60)));
    }

    #[test]
    fn test_timestamp_now_is_after_2020() {
        assert!(Timestamp::now().as_secs() > 1_577_836_800);
        assert_eq!(Timestamp::from_secs(42).to_string(), "42");
    }
}
