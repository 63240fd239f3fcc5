//! Lock-protected storage for `Statistics` counters.
//!
//! A statistics update touches four fields at once (count, min, max and
//! mean). They live behind one mutex so that a reader can never observe a
//! sample folded into some fields but not the others.

use std::fmt::{self, Debug};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::counters::Statistics;

/// Running statistics of observed samples.
///
/// # Examples
///
/// ```rust
/// use contatori_prometheus::counters::statistics::StatisticsCell;
///
/// let latency = StatisticsCell::new();
/// latency.observe(100.0);
/// latency.observe(150.0);
/// latency.observe(200.0);
///
/// let stats = latency.value();
/// assert_eq!(stats.count, 3);
/// assert_eq!(stats.average, 150.0);
/// ```
pub struct StatisticsCell {
    inner: Mutex<Statistics>,
}

impl StatisticsCell {
    /// Creates an empty cell.
    pub const fn new() -> Self {
        StatisticsCell {
            inner: Mutex::new(Statistics {
                count: 0,
                min: 0.0,
                max: 0.0,
                average: 0.0,
            }),
        }
    }

    // A panic can't happen while the guard is held (observe is plain
    // arithmetic), so a poisoned lock still guards a consistent value.
    fn lock(&self) -> MutexGuard<'_, Statistics> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Folds one sample into the statistics.
    #[inline]
    pub fn observe(&self, value: f64) {
        self.lock().observe(value);
    }

    /// Returns a consistent copy of the statistics.
    #[inline]
    pub fn value(&self) -> Statistics {
        *self.lock()
    }

    /// Returns the statistics and clears them in the same critical section.
    pub fn value_and_reset(&self) -> Statistics {
        std::mem::take(&mut *self.lock())
    }
}

impl Default for StatisticsCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for StatisticsCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StatisticsCell").field(&self.value()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty() {
        let cell = StatisticsCell::new();
        assert!(cell.value().is_empty());
    }

    #[test]
    fn test_observe() {
        let cell = StatisticsCell::new();
        cell.observe(1.0);
        cell.observe(2.0);
        cell.observe(3.0);

        let stats = cell.value();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
        assert!((stats.average - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_value_and_reset() {
        let cell = StatisticsCell::new();
        cell.observe(5.0);
        let taken = cell.value_and_reset();
        assert_eq!(taken.count, 1);
        assert!(cell.value().is_empty());

        cell.observe(9.0);
        let stats = cell.value();
        assert_eq!(stats.min, 9.0);
        assert_eq!(stats.max, 9.0);
    }

    #[test]
    fn test_concurrent_observe_never_torn() {
        let cell = Arc::new(StatisticsCell::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        c.observe(10.0);
                    }
                })
            })
            .collect();

        let reader = {
            let c = Arc::clone(&cell);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    let s = c.value();
                    if s.count > 0 {
                        assert_eq!(s.min, 10.0);
                        assert_eq!(s.max, 10.0);
                        assert_eq!(s.average, 10.0);
                    }
                }
            })
        };

        for h in writers {
            h.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(cell.value().count, 20_000);
    }
}
