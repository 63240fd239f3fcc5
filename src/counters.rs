//! Counter kinds, their values, and the storage cells behind them.
//!
//! Every named counter in a [`CounterCache`](crate::cache::CounterCache) has
//! one of five [`CounterKind`]s. Each kind owns its own update rule and is
//! backed by a dedicated storage cell:
//!
//! | Kind | Cell | Update rule |
//! |------|------|-------------|
//! | [`Increment`](CounterKind::Increment) | [`increment::IncrementCell`] | sum of all increments |
//! | [`Last`](CounterKind::Last) | [`last::LastCell`] | overwrite |
//! | [`Timestamp`](CounterKind::Timestamp) | [`timestamp::TimestampCell`] | overwrite |
//! | [`Statistics`](CounterKind::Statistics) | [`statistics::StatisticsCell`] | min / max / incremental mean / count |
//! | [`Interval`](CounterKind::Interval) | [`last::LastCell`] | overwrite with elapsed milliseconds |
//!
//! # Sharding
//!
//! Increments are by far the hottest update path, so [`IncrementCell`](increment::IncrementCell)
//! keeps the sharded layout: every thread writes its own cache-padded slot
//! and reads aggregate all slots.
//!
//! ```text
//!                          ┌─────────────────────────────────────┐
//!                          │           IncrementCell             │
//!                          ├─────────────────────────────────────┤
//!   Thread 0 ──writes──►   │ [Slot 0] ████████ (CachePadded)     │
//!   Thread 1 ──writes──►   │ [Slot 1] ████████ (CachePadded)     │
//!        ...               │    ...                              │
//!   Thread 63 ─writes──►   │ [Slot 63] ███████ (CachePadded)     │
//!                          └─────────────────────────────────────┘
//!                                          │
//!                                          ▼
//!                                   value() aggregates
//!                                   all slots on read
//! ```
//!
//! Slots are assigned round-robin. After 64 threads the assignment wraps
//! around and threads start sharing slots, which only costs contention.

pub mod increment;
pub mod last;
pub mod statistics;
pub mod timestamp;

use atomic_traits::Atomic;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// Number of shards (slots) used by each increment cell.
///
/// Each slot is cache-line padded (64 bytes), so total memory per increment
/// counter is `64 slots × 64 bytes = 4,096 bytes (4KB)`.
pub(crate) const NUM_COMPONENTS: usize = 64;

/// Global counter for assigning slot IDs to threads.
static NEXT_SLOT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Slot index of the current thread, assigned on first use.
    pub(crate) static THREAD_SLOT_INDEX: usize = get_next_slot_id();
}

/// Assigns the next available slot ID to a thread.
///
/// The returned value is in the range `[0, NUM_COMPONENTS)`. Two threads
/// occasionally sharing a slot only increases contention.
pub fn get_next_slot_id() -> usize {
    NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed) % NUM_COMPONENTS
}

/// The kind of a counter. Fixed the first time a name is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Running integer count.
    Increment,
    /// Most recent value.
    Last,
    /// Most recent point in time.
    Timestamp,
    /// Running count, min, max and mean of observed samples.
    Statistics,
    /// Most recent elapsed time measured by a [`Timing`](crate::timing::Timing).
    Interval,
}

impl Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CounterKind::Increment => "increment",
            CounterKind::Last => "last",
            CounterKind::Timestamp => "timestamp",
            CounterKind::Statistics => "statistics",
            CounterKind::Interval => "interval",
        };
        f.write_str(s)
    }
}

/// Aggregated samples of a [`Statistics`](CounterKind::Statistics) counter.
///
/// All four fields are copied together under the counter's lock, so a
/// `Statistics` value is always internally consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Number of samples observed.
    pub count: u64,
    /// Smallest sample, `0.0` when empty.
    pub min: f64,
    /// Largest sample, `0.0` when empty.
    pub max: f64,
    /// Arithmetic mean of all samples, `0.0` when empty.
    pub average: f64,
}

impl Statistics {
    /// Folds one sample into the aggregate.
    ///
    /// The mean is updated incrementally (`avg += (v - avg) / n`), never by
    /// replaying history.
    pub fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.average = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.average += (value - self.average) / self.count as f64;
    }

    /// Returns `true` if no sample has been observed.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// The value of one counter, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CounterValue {
    /// Running count.
    Increment(i64),
    /// Most recent value.
    Last(f64),
    /// Most recent point in time.
    Timestamp(SystemTime),
    /// Aggregated samples.
    Statistics(Statistics),
    /// Most recent elapsed time, in milliseconds.
    Interval(f64),
}

impl CounterValue {
    /// Returns the kind this value belongs to.
    pub fn kind(&self) -> CounterKind {
        match self {
            CounterValue::Increment(_) => CounterKind::Increment,
            CounterValue::Last(_) => CounterKind::Last,
            CounterValue::Timestamp(_) => CounterKind::Timestamp,
            CounterValue::Statistics(_) => CounterKind::Statistics,
            CounterValue::Interval(_) => CounterKind::Interval,
        }
    }

    /// Returns the count of an `Increment` counter.
    pub fn as_count(&self) -> Option<i64> {
        match self {
            CounterValue::Increment(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the scalar of a `Last` or `Interval` counter.
    pub fn as_last(&self) -> Option<f64> {
        match self {
            CounterValue::Last(v) | CounterValue::Interval(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the instant of a `Timestamp` counter.
    pub fn as_time(&self) -> Option<SystemTime> {
        match self {
            CounterValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the aggregate of a `Statistics` counter.
    pub fn as_statistics(&self) -> Option<Statistics> {
        match self {
            CounterValue::Statistics(s) => Some(*s),
            _ => None,
        }
    }
}

impl Display for CounterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterValue::Increment(v) => write!(f, "{}", v),
            CounterValue::Last(v) | CounterValue::Interval(v) => write!(f, "{}", v),
            CounterValue::Timestamp(t) => write!(f, "{}", epoch_seconds(*t)),
            CounterValue::Statistics(s) => write!(
                f,
                "count={} min={} max={} avg={}",
                s.count, s.min, s.max, s.average
            ),
        }
    }
}

/// A named counter as captured by a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    /// Name the counter was registered with.
    pub name: String,
    /// Value at the time of capture.
    #[serde(flatten)]
    pub value: CounterValue,
}

impl Counter {
    /// Creates a new counter record.
    pub fn new(name: impl Into<String>, value: CounterValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Returns the kind of this counter.
    pub fn kind(&self) -> CounterKind {
        self.value.kind()
    }
}

impl Display for Counter {
    /// Formats the counter as `name:value`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

/// Seconds since the Unix epoch with fractional part. Negative before the epoch.
pub fn epoch_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// Access to the thread-local shard of a sharded cell.
pub trait GetComponentCounter {
    /// The atomic type used for individual shards.
    type CounterType: Atomic;

    /// Returns a reference to the current thread's shard.
    fn get_component_counter(&self) -> &Self::CounterType;
}
