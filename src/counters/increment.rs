//! Sharded storage for `Increment` counters.
//!
//! This module provides [`IncrementCell`], a signed running count spread
//! over cache-padded atomic shards. Concurrent increments from different
//! threads land on different cache lines, so the hot path never contends.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam_utils::CachePadded;

use crate::counters::{GetComponentCounter, NUM_COMPONENTS, THREAD_SLOT_INDEX};

/// A running count using sharded atomic storage.
///
/// Amounts may be negative. Reads sum every shard, which makes them more
/// expensive than writes; counters are written far more often than they are
/// exported.
///
/// # Examples
///
/// ```rust
/// use contatori_prometheus::counters::increment::IncrementCell;
///
/// let calls = IncrementCell::new();
/// calls.add(1);
/// calls.add(3);
/// assert_eq!(calls.value(), 4);
/// ```
pub struct IncrementCell {
    components: [CachePadded<AtomicI64>; NUM_COMPONENTS],
}

impl GetComponentCounter for IncrementCell {
    type CounterType = AtomicI64;

    #[inline]
    fn get_component_counter(&self) -> &AtomicI64 {
        THREAD_SLOT_INDEX.with(|idx| &*self.components[*idx])
    }
}

impl IncrementCell {
    /// Creates a new cell initialized to zero.
    pub const fn new() -> Self {
        const ZERO: CachePadded<AtomicI64> = CachePadded::new(AtomicI64::new(0));
        IncrementCell {
            components: [ZERO; NUM_COMPONENTS],
        }
    }

    /// Adds `amount` to the current thread's shard.
    #[inline]
    pub fn add(&self, amount: i64) {
        self.get_component_counter()
            .fetch_add(amount, Ordering::Relaxed);
    }

    /// Computes the total count by summing all shards.
    #[inline]
    pub fn value(&self) -> i64 {
        self.components
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .fold(0i64, i64::wrapping_add)
    }

    /// Returns the total count and resets all shards to zero.
    ///
    /// Each shard is swapped atomically, so no increment is ever lost: an
    /// update racing with the reset lands either in the returned total or in
    /// the fresh count.
    #[inline]
    pub fn value_and_reset(&self) -> i64 {
        self.components
            .iter()
            .map(|counter| counter.swap(0, Ordering::Relaxed))
            .fold(0i64, i64::wrapping_add)
    }
}

impl Default for IncrementCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for IncrementCell {
    /// Formats the cell showing non-zero shards.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IncrementCell{{")?;
        for (i, counter) in self.components.iter().enumerate() {
            let val = counter.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new() {
        let cell = IncrementCell::new();
        assert_eq!(cell.value(), 0);
    }

    #[test]
    fn test_add() {
        let cell = IncrementCell::new();
        cell.add(10);
        assert_eq!(cell.value(), 10);
        cell.add(-15);
        assert_eq!(cell.value(), -5);
    }

    #[test]
    fn test_value_and_reset() {
        let cell = IncrementCell::new();
        cell.add(42);
        assert_eq!(cell.value_and_reset(), 42);
        assert_eq!(cell.value(), 0);
    }

    #[test]
    fn test_concurrent_adds() {
        let cell = Arc::new(IncrementCell::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        c.add(1);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cell.value(), 80_000);
    }

    #[test]
    fn test_debug_shows_nonzero_shards() {
        let cell = IncrementCell::new();
        cell.add(3);
        let dbg = format!("{:?}", cell);
        assert!(dbg.contains(":3"));
    }
}
