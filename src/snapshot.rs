//! Point-in-time copies of a counter cache.
//!
//! A [`Snapshot`] is what gets encoded and delivered: it is detached from
//! the cache, so encoding it never holds a lock and later updates never
//! change it. Snapshots are serializable with any serde format.
//!
//! # Examples
//!
//! ```rust
//! use contatori_prometheus::cache::CounterCache;
//!
//! let cache = CounterCache::new();
//! cache.increment("requests", 42).unwrap();
//!
//! let snapshot = cache.get_all();
//! assert_eq!(snapshot.get("requests").unwrap().value.as_count(), Some(42));
//! ```

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::counters::Counter;

/// An ordered, immutable sequence of counters captured at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Capture time in milliseconds since Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    /// The counters, in registration order.
    pub counters: Vec<Counter>,
}

impl Snapshot {
    /// Creates a snapshot with the given counters and no timestamp.
    pub fn new(counters: Vec<Counter>) -> Self {
        Self {
            timestamp_ms: None,
            counters,
        }
    }

    /// Creates a snapshot with counters and a timestamp.
    pub fn with_timestamp(counters: Vec<Counter>, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            counters,
        }
    }

    /// Creates a snapshot stamped with the current time.
    pub fn taken_now(counters: Vec<Counter>) -> Self {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::with_timestamp(counters, now_ms)
    }

    /// Finds a counter by name.
    pub fn get(&self, name: &str) -> Option<&Counter> {
        self.counters.iter().find(|c| c.name == name)
    }

    /// Iterates the counters in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Counter> {
        self.counters.iter()
    }

    /// Number of counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns `true` if the snapshot holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Counter;
    type IntoIter = std::slice::Iter<'a, Counter>;

    fn into_iter(self) -> Self::IntoIter {
        self.counters.iter()
    }
}

impl IntoIterator for Snapshot {
    type Item = Counter;
    type IntoIter = std::vec::IntoIter<Counter>;

    fn into_iter(self) -> Self::IntoIter {
        self.counters.into_iter()
    }
}

impl FromIterator<Counter> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Counter>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{CounterValue, Statistics};

    #[test]
    fn test_snapshot_new() {
        let snapshot = Snapshot::new(vec![
            Counter::new("a", CounterValue::Increment(1)),
            Counter::new("b", CounterValue::Last(2.0)),
        ]);

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.timestamp_ms.is_none());
    }

    #[test]
    fn test_snapshot_taken_now() {
        let snapshot = Snapshot::taken_now(vec![]);
        assert!(snapshot.timestamp_ms.unwrap() > 0);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_snapshot_get() {
        let snapshot: Snapshot = vec![
            Counter::new("foo", CounterValue::Increment(1)),
            Counter::new("bar", CounterValue::Increment(2)),
        ]
        .into_iter()
        .collect();

        assert!(snapshot.get("foo").is_some());
        assert!(snapshot.get("bar").is_some());
        assert!(snapshot.get("baz").is_none());
    }

    #[test]
    fn test_serialize_snapshot() {
        let snapshot = Snapshot::with_timestamp(
            vec![Counter::new("calls", CounterValue::Increment(4))],
            1234567890,
        );
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp_ms":1234567890,"counters":[{"name":"calls","kind":"increment","value":4}]}"#
        );
    }

    #[test]
    fn test_deserialize_snapshot() {
        let json = r#"{"counters":[{"name":"lat","kind":"statistics","value":{"count":2,"min":1.0,"max":3.0,"average":2.0}}]}"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert!(snapshot.timestamp_ms.is_none());
        assert_eq!(
            snapshot.get("lat").unwrap().value,
            CounterValue::Statistics(Statistics {
                count: 2,
                min: 1.0,
                max: 3.0,
                average: 2.0,
            })
        );
    }
}
