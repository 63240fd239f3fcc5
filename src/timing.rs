//! Single-use handles that measure an `Interval` counter.

use atomic_time::AtomicOptionInstant;
use std::fmt::{self, Debug};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::cache::CounterCache;
use crate::error::CounterError;

/// A started measurement of elapsed wall-clock time.
///
/// Created by [`CounterCache::begin_timing`]. The first call to
/// [`end_timing`](Timing::end_timing) records the elapsed time as the
/// counter's new `Interval` value; later calls do nothing.
///
/// # Examples
///
/// ```rust
/// use contatori_prometheus::cache::CounterCache;
/// use contatori_prometheus::counters::CounterKind;
///
/// let cache = CounterCache::new();
/// let timing = cache.begin_timing("mycomponent.mymethod.exec_time");
/// // ... do the work ...
/// assert!(timing.end_timing().unwrap().is_some());
/// assert!(timing.end_timing().unwrap().is_none());
///
/// assert!(cache.get("mycomponent.mymethod.exec_time", CounterKind::Interval).is_some());
/// ```
pub struct Timing {
    cache: CounterCache,
    name: String,
    /// `None` once the measurement has been recorded.
    start: AtomicOptionInstant,
}

impl Timing {
    pub(crate) fn start(cache: CounterCache, name: &str) -> Self {
        Timing {
            cache,
            name: name.to_string(),
            start: AtomicOptionInstant::new(Some(Instant::now())),
        }
    }

    /// Name of the counter this handle measures.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` until the measurement has been recorded.
    pub fn is_pending(&self) -> bool {
        self.start.load(Ordering::Acquire).is_some()
    }

    /// Records the time elapsed since the handle was created.
    ///
    /// Returns the recorded duration, or `None` if the handle was already
    /// ended. Fails only if the counter name is registered with another kind;
    /// the handle is spent either way.
    pub fn end_timing(&self) -> Result<Option<Duration>, CounterError> {
        let Some(start) = self.start.swap(None, Ordering::AcqRel) else {
            return Ok(None);
        };
        let elapsed = start.elapsed();
        self.cache.record_interval(&self.name, elapsed)?;
        Ok(Some(elapsed))
    }
}

impl Debug for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timing")
            .field("name", &self.name)
            .field("pending", &self.is_pending())
            .finish()
    }
}
