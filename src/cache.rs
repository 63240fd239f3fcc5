//! The in-memory counter cache.
//!
//! [`CounterCache`] maps counter names to their aggregated values. A name is
//! bound to a [`CounterKind`] the first time it is used; updating it later
//! with an operation of another kind fails with
//! [`CounterError::KindMismatch`] and leaves the existing counter untouched.
//!
//! # Concurrency
//!
//! The name index sits behind a `RwLock`. Updates to an existing counter only
//! take the read side and then mutate the counter's own cell:
//!
//! - `Increment` cells are sharded atomics, so concurrent increments never
//!   lose an update.
//! - `Last`, `Interval` and `Timestamp` cells are single atomics.
//! - `Statistics` cells fold each sample under their own mutex.
//!
//! The write side is taken only to register a new name or to clear the cache.
//! Snapshots see every counter individually consistent; counters are
//! independent, so no cross-counter ordering is implied.
//!
//! # Example
//!
//! ```rust
//! use contatori_prometheus::cache::CounterCache;
//! use contatori_prometheus::counters::CounterKind;
//!
//! let cache = CounterCache::new();
//! cache.increment("mycomponent.mymethod.calls", 1).unwrap();
//! cache.set_last("mycomponent.queue.size", 12.0).unwrap();
//!
//! let calls = cache.get("mycomponent.mymethod.calls", CounterKind::Increment).unwrap();
//! assert_eq!(calls.value.as_count(), Some(1));
//!
//! // The name is now an Increment counter.
//! assert!(cache.set_last("mycomponent.mymethod.calls", 1.0).is_err());
//! ```

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use crate::counters::increment::IncrementCell;
use crate::counters::last::LastCell;
use crate::counters::statistics::StatisticsCell;
use crate::counters::timestamp::TimestampCell;
use crate::counters::{Counter, CounterKind, CounterValue};
use crate::error::CounterError;
use crate::snapshot::Snapshot;
use crate::timing::Timing;

/// Read-only view of a counter cache.
///
/// Delivery components hold an `Arc<dyn CounterReader>` rather than the
/// cache itself, so they can export counters but never update them.
pub trait CounterReader: Send + Sync {
    /// Returns every known counter, in registration order.
    fn get_all(&self) -> Snapshot;

    /// Returns the counter if it exists with the given kind.
    fn get(&self, name: &str, kind: CounterKind) -> Option<Counter>;
}

/// Storage cell of one counter.
enum Cell {
    Increment(IncrementCell),
    Last(LastCell),
    Timestamp(TimestampCell),
    Statistics(StatisticsCell),
    Interval(LastCell),
}

impl Cell {
    fn new(kind: CounterKind) -> Self {
        match kind {
            CounterKind::Increment => Cell::Increment(IncrementCell::new()),
            CounterKind::Last => Cell::Last(LastCell::new()),
            CounterKind::Timestamp => Cell::Timestamp(TimestampCell::new()),
            CounterKind::Statistics => Cell::Statistics(StatisticsCell::new()),
            CounterKind::Interval => Cell::Interval(LastCell::new()),
        }
    }

    fn kind(&self) -> CounterKind {
        match self {
            Cell::Increment(_) => CounterKind::Increment,
            Cell::Last(_) => CounterKind::Last,
            Cell::Timestamp(_) => CounterKind::Timestamp,
            Cell::Statistics(_) => CounterKind::Statistics,
            Cell::Interval(_) => CounterKind::Interval,
        }
    }

    fn value(&self) -> CounterValue {
        match self {
            Cell::Increment(c) => CounterValue::Increment(c.value()),
            Cell::Last(c) => CounterValue::Last(c.value()),
            Cell::Timestamp(c) => CounterValue::Timestamp(c.value()),
            Cell::Statistics(c) => CounterValue::Statistics(c.value()),
            Cell::Interval(c) => CounterValue::Interval(c.value()),
        }
    }

    fn reset(&self) {
        match self {
            Cell::Increment(c) => {
                c.value_and_reset();
            }
            Cell::Last(c) | Cell::Interval(c) => c.reset(),
            Cell::Timestamp(c) => c.reset(),
            Cell::Statistics(c) => {
                c.value_and_reset();
            }
        }
    }
}

/// Name index plus cells in registration order.
#[derive(Default)]
struct Registry {
    index: HashMap<String, usize>,
    cells: Vec<(String, Cell)>,
}

impl Registry {
    fn get(&self, name: &str) -> Option<&Cell> {
        self.index.get(name).map(|&i| &self.cells[i].1)
    }

    fn get_or_insert(&mut self, name: &str, kind: CounterKind) -> &Cell {
        let i = match self.index.get(name) {
            Some(&i) => i,
            None => {
                let i = self.cells.len();
                self.cells.push((name.to_string(), Cell::new(kind)));
                self.index.insert(name.to_string(), i);
                i
            }
        };
        &self.cells[i].1
    }
}

fn check_kind(name: &str, cell: &Cell, requested: CounterKind) -> Result<(), CounterError> {
    let registered = cell.kind();
    if registered == requested {
        Ok(())
    } else {
        Err(CounterError::KindMismatch {
            name: name.to_string(),
            registered,
            requested,
        })
    }
}

/// Thread-safe cache of named counters.
///
/// Cloning a `CounterCache` is cheap and yields a handle to the same
/// counters.
#[derive(Clone, Default)]
pub struct CounterCache {
    registry: Arc<RwLock<Registry>>,
}

impl CounterCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a read-only handle to this cache.
    pub fn reader(&self) -> Arc<dyn CounterReader> {
        Arc::new(self.clone())
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `update` to the cell of `name`, registering it as `kind` if absent.
    fn update<F>(&self, name: &str, kind: CounterKind, update: F) -> Result<(), CounterError>
    where
        F: FnOnce(&Cell),
    {
        {
            let registry = self.read();
            if let Some(cell) = registry.get(name) {
                check_kind(name, cell, kind)?;
                update(cell);
                return Ok(());
            }
        }

        let mut registry = self.write();
        let cell = registry.get_or_insert(name, kind);
        check_kind(name, cell, kind)?;
        update(cell);
        Ok(())
    }

    /// Adds `amount` to an `Increment` counter.
    pub fn increment(&self, name: &str, amount: i64) -> Result<(), CounterError> {
        self.update(name, CounterKind::Increment, |cell| {
            if let Cell::Increment(c) = cell {
                c.add(amount);
            }
        })
    }

    /// Adds one to an `Increment` counter.
    pub fn increment_one(&self, name: &str) -> Result<(), CounterError> {
        self.increment(name, 1)
    }

    /// Overwrites the value of a `Last` counter.
    pub fn set_last(&self, name: &str, value: f64) -> Result<(), CounterError> {
        self.update(name, CounterKind::Last, |cell| {
            if let Cell::Last(c) = cell {
                c.set(value);
            }
        })
    }

    /// Records the current time in a `Timestamp` counter.
    pub fn timestamp_now(&self, name: &str) -> Result<(), CounterError> {
        self.timestamp(name, SystemTime::now())
    }

    /// Records `time` in a `Timestamp` counter.
    pub fn timestamp(&self, name: &str, time: SystemTime) -> Result<(), CounterError> {
        self.update(name, CounterKind::Timestamp, |cell| {
            if let Cell::Timestamp(c) = cell {
                c.set(time);
            }
        })
    }

    /// Folds a sample into a `Statistics` counter.
    pub fn observe(&self, name: &str, value: f64) -> Result<(), CounterError> {
        self.update(name, CounterKind::Statistics, |cell| {
            if let Cell::Statistics(c) = cell {
                c.observe(value);
            }
        })
    }

    /// Overwrites an `Interval` counter with `elapsed`, stored in milliseconds.
    pub fn record_interval(&self, name: &str, elapsed: Duration) -> Result<(), CounterError> {
        let millis = elapsed.as_secs_f64() * 1000.0;
        self.update(name, CounterKind::Interval, |cell| {
            if let Cell::Interval(c) = cell {
                c.set(millis);
            }
        })
    }

    /// Starts measuring an interval for the counter `name`.
    ///
    /// Call [`Timing::end_timing`] on the returned handle to record the
    /// elapsed time.
    pub fn begin_timing(&self, name: &str) -> Timing {
        Timing::start(self.clone(), name)
    }

    /// Returns every counter, in registration order.
    pub fn get_all(&self) -> Snapshot {
        let registry = self.read();
        let counters = registry
            .cells
            .iter()
            .map(|(name, cell)| Counter::new(name.as_str(), cell.value()))
            .collect();
        Snapshot::taken_now(counters)
    }

    /// Returns the counter if it exists with the given kind.
    pub fn get(&self, name: &str, kind: CounterKind) -> Option<Counter> {
        let registry = self.read();
        registry
            .get(name)
            .filter(|cell| cell.kind() == kind)
            .map(|cell| Counter::new(name, cell.value()))
    }

    /// Drops the accumulated value of `name`, keeping its kind.
    ///
    /// Returns `false` if the counter does not exist.
    pub fn reset(&self, name: &str) -> bool {
        let registry = self.read();
        match registry.get(name) {
            Some(cell) => {
                cell.reset();
                true
            }
            None => false,
        }
    }

    /// Drops the accumulated values of every counter, keeping their kinds.
    pub fn reset_all(&self) {
        let registry = self.read();
        for (_, cell) in &registry.cells {
            cell.reset();
        }
    }

    /// Removes every counter, kinds included.
    pub fn clear(&self) {
        let mut registry = self.write();
        registry.index.clear();
        registry.cells.clear();
    }

    /// Returns the number of registered counters.
    pub fn len(&self) -> usize {
        self.read().cells.len()
    }

    /// Returns `true` if no counter is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CounterReader for CounterCache {
    fn get_all(&self) -> Snapshot {
        CounterCache::get_all(self)
    }

    fn get(&self, name: &str, kind: CounterKind) -> Option<Counter> {
        CounterCache::get(self, name, kind)
    }
}

impl Debug for CounterCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.read();
        f.debug_map()
            .entries(
                registry
                    .cells
                    .iter()
                    .map(|(name, cell)| (name.as_str(), cell.value())),
            )
            .finish()
    }
}
