//! Overwrite-only storage for `Last` and `Interval` counters.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};

/// A single `f64` stored as its bit pattern in an `AtomicU64`.
///
/// Every write replaces the previous value; only the most recent one
/// survives.
pub struct LastCell {
    bits: AtomicU64,
}

impl LastCell {
    /// Creates a new cell holding `0.0`.
    pub const fn new() -> Self {
        // 0.0f64 has an all-zero bit pattern.
        LastCell {
            bits: AtomicU64::new(0),
        }
    }

    /// Overwrites the stored value.
    #[inline]
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Returns the most recently stored value.
    #[inline]
    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Resets the stored value to `0.0`.
    #[inline]
    pub fn reset(&self) {
        self.set(0.0);
    }
}

impl Default for LastCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for LastCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LastCell({})", self.value())
    }
}
