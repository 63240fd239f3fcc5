//! # Contatori Prometheus - Counters Bridge for the Prometheus Ecosystem
//!
//! An in-process counter cache whose contents can be delivered to Prometheus
//! in two ways:
//!
//! - **push**: periodically PUT the text exposition of all counters to a
//!   Pushgateway, retrying transport failures a bounded number of times;
//! - **pull**: answer `GET /metrics` with the same exposition on demand.
//!
//! ## Counter Kinds
//!
//! | Kind | Update | Exported as |
//! |------|--------|-------------|
//! | `Increment` | [`increment`](cache::CounterCache::increment) adds to a running count | `<name>` |
//! | `Last` | [`set_last`](cache::CounterCache::set_last) overwrites | `<name>` |
//! | `Timestamp` | [`timestamp`](cache::CounterCache::timestamp) overwrites | `<name>` in epoch seconds |
//! | `Statistics` | [`observe`](cache::CounterCache::observe) folds into count/min/max/average | `<name>_count`, `_min`, `_max`, `_avg` |
//! | `Interval` | [`begin_timing`](cache::CounterCache::begin_timing) / [`end_timing`](timing::Timing::end_timing) | `<name>` in milliseconds |
//!
//! A name is bound to the kind of its first update. Updating it with another
//! kind fails with [`CounterError::KindMismatch`](error::CounterError) and
//! leaves the stored value untouched.
//!
//! `Increment` counters are sharded across 64 cache-padded atomic slots, one
//! per thread slot, so hot increments from many threads do not contend on a
//! single cache line. Reads aggregate the slots.
//!
//! ## Quick Start
//!
//! ```rust
//! use contatori_prometheus::cache::CounterCache;
//! use contatori_prometheus::exposition::ExpositionEncoder;
//!
//! let cache = CounterCache::new();
//!
//! cache.increment("orders.create.calls", 1).unwrap();
//! cache.set_last("queue.depth", 12.0).unwrap();
//! cache.observe("payload.size", 512.0).unwrap();
//!
//! let timing = cache.begin_timing("orders.create.exec_time");
//! // ... handle the request ...
//! timing.end_timing().unwrap();
//!
//! let text = ExpositionEncoder::new()
//!     .with_source("orders")
//!     .render(&cache.get_all())
//!     .unwrap();
//! assert!(text.contains("orders_create_calls{source=\"orders\"} 1"));
//! ```
//!
//! ## Features
//!
//! | Feature | Module | Description |
//! |---------|--------|-------------|
//! | `push` | [`push`] | Pushgateway delivery (`reqwest`, `tokio`) |
//! | `pull` | [`pull`] | `GET /metrics` endpoint (`axum`, `tokio`) |
//! | `full` | both | Enables both delivery paths |
//!
//! `push` and `pull` are enabled by default. The cache, encoder and
//! configuration are always available.
//!
//! ## Logging
//!
//! Components emit [`tracing`] events and never install a subscriber; the
//! host decides where they go.

pub mod cache;
pub mod config;
pub mod counters;
pub mod error;
pub mod exposition;
pub mod snapshot;
pub mod timing;

#[cfg(feature = "pull")]
pub mod pull;
#[cfg(feature = "push")]
pub mod push;

pub use cache::{CounterCache, CounterReader};
pub use counters::{Counter, CounterKind, CounterValue, Statistics};
pub use error::{Error, Result};
pub use snapshot::Snapshot;
pub use timing::Timing;
