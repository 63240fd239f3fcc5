//! Overwrite-only storage for `Timestamp` counters.
//!
//! Uses [`AtomicSystemTime`] from the `atomic-time` crate so a timestamp can
//! be replaced without a lock.

use atomic_time::AtomicSystemTime;
use std::fmt::{self, Debug};
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// The most recent point in time recorded for a counter.
pub struct TimestampCell {
    time: AtomicSystemTime,
}

impl TimestampCell {
    /// Creates a new cell holding the Unix epoch.
    pub fn new() -> Self {
        TimestampCell {
            time: AtomicSystemTime::new(UNIX_EPOCH),
        }
    }

    /// Overwrites the stored instant.
    #[inline]
    pub fn set(&self, time: SystemTime) {
        self.time.store(time, Ordering::Release);
    }

    /// Returns the most recently stored instant.
    #[inline]
    pub fn value(&self) -> SystemTime {
        self.time.load(Ordering::Acquire)
    }

    /// Resets the stored instant to the Unix epoch.
    #[inline]
    pub fn reset(&self) {
        self.set(UNIX_EPOCH);
    }
}

impl Default for TimestampCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for TimestampCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimestampCell({:?})", self.value())
    }
}
