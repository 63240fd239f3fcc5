//! Prometheus text exposition of counter snapshots.
//!
//! [`ExpositionEncoder`] renders a [`Snapshot`] with the official
//! `prometheus` crate: every counter becomes one or more gauges in a fresh
//! [`Registry`], which is then encoded by [`TextEncoder`].
//!
//! # Mapping
//!
//! | Kind | Lines |
//! |------|-------|
//! | `Increment` | `<name> <count>` |
//! | `Last`, `Interval` | `<name> <value>` |
//! | `Timestamp` | `<name> <seconds since epoch>` |
//! | `Statistics` | `<name>_count`, `<name>_min`, `<name>_max`, `<name>_avg` |
//!
//! Names are sanitized for Prometheus: dots, dashes, slashes and any other
//! character outside `[a-zA-Z0-9_:]` become underscores.
//!
//! When a source (job) or instance is set, every sample carries `source` and
//! `instance` labels so a Pushgateway or scraper can group by them. With
//! neither set the output is plain scrape format without labels.
//!
//! # Examples
//!
//! ```rust
//! use contatori_prometheus::cache::CounterCache;
//! use contatori_prometheus::exposition::ExpositionEncoder;
//!
//! let cache = CounterCache::new();
//! cache.increment("a.b", 4).unwrap();
//!
//! let output = ExpositionEncoder::new()
//!     .with_source("svc")
//!     .with_instance("i1")
//!     .render(&cache.get_all())
//!     .unwrap();
//!
//! assert!(output.contains("# TYPE a_b gauge"));
//! assert!(output.contains("a_b{instance=\"i1\",source=\"svc\"} 4"));
//! ```
//!
//! # Output order
//!
//! Metric families are emitted in name order and samples within a family in
//! label order, so the same snapshot always renders to the same bytes.

use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use crate::counters::{epoch_seconds, Counter, CounterValue};
use crate::error::ExpositionError;
use crate::snapshot::Snapshot;

/// Label carrying the job / source name.
pub const SOURCE_LABEL: &str = "source";

/// Label carrying the instance id.
pub const INSTANCE_LABEL: &str = "instance";

/// Result type for exposition operations.
pub type Result<T> = std::result::Result<T, ExpositionError>;

/// Name suffixes that identify RPC counters named `<service>.<command>.<suffix>`.
const SERVICE_SUFFIXES: [&str; 3] = ["exec_time", "calls", "failures"];

/// Name suffixes that identify queue counters named `queue.<queue>.<suffix>`.
const QUEUE_SUFFIXES: [&str; 3] = ["sent_messages", "received_messages", "dead_messages"];

#[derive(Debug, Clone, Copy)]
enum SampleValue {
    Int(i64),
    Float(f64),
}

impl SampleValue {
    fn is_int(&self) -> bool {
        matches!(self, SampleValue::Int(_))
    }
}

/// All samples sharing one metric name.
struct Family {
    help: String,
    label_names: Vec<String>,
    integer: bool,
    samples: Vec<(Vec<String>, SampleValue)>,
    seen: HashSet<Vec<String>>,
}

/// Encoder from counter snapshots to the Prometheus text format.
#[derive(Debug, Clone, Default)]
pub struct ExpositionEncoder {
    source: Option<String>,
    instance: Option<String>,
    derive_labels: bool,
}

impl ExpositionEncoder {
    /// Creates an encoder without grouping labels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `source` label. An empty string clears it.
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = non_empty(source);
        self
    }

    /// Sets the `instance` label. An empty string clears it.
    pub fn with_instance(mut self, instance: &str) -> Self {
        self.instance = non_empty(instance);
        self
    }

    /// Turns well-known counter names into labels.
    ///
    /// With this enabled, `<service>.<command>.exec_time` (likewise `calls`
    /// and `failures`) is exported as `exec_time{service=..,command=..}`, and
    /// `queue.<queue>.sent_messages` (likewise `received_messages` and
    /// `dead_messages`) as `sent_messages{queue=..}`.
    pub fn with_derived_labels(mut self, enabled: bool) -> Self {
        self.derive_labels = enabled;
        self
    }

    /// Returns the configured `source` label value.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Returns the configured `instance` label value.
    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// Sanitizes a counter name to be Prometheus-compatible.
    ///
    /// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    pub(crate) fn sanitize_name(name: &str) -> String {
        let mut result: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if result.is_empty() {
            result.push_str("unnamed");
        }
        // Ensure name doesn't start with a digit
        if result
            .chars()
            .next()
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false)
        {
            result.insert(0, '_');
        }
        result
    }

    /// Splits a counter name into a metric base name and its labels.
    fn metric_name(&self, name: &str) -> (String, Vec<(String, String)>) {
        let mut labels = Vec::new();
        if let Some(source) = &self.source {
            labels.push((SOURCE_LABEL.to_string(), source.clone()));
        }
        if let Some(instance) = &self.instance {
            labels.push((INSTANCE_LABEL.to_string(), instance.clone()));
        }

        if self.derive_labels {
            let parts: Vec<&str> = name.split('.').collect();
            if parts.len() == 3 {
                if SERVICE_SUFFIXES.contains(&parts[2]) {
                    labels.push(("service".to_string(), parts[0].to_string()));
                    labels.push(("command".to_string(), parts[1].to_string()));
                    return (Self::sanitize_name(parts[2]), labels);
                }
                if parts[0] == "queue" && QUEUE_SUFFIXES.contains(&parts[2]) {
                    labels.push(("queue".to_string(), parts[1].to_string()));
                    return (Self::sanitize_name(parts[2]), labels);
                }
            }
        }

        (Self::sanitize_name(name), labels)
    }

    /// Expands one counter into its samples: `(metric name, help, value)`.
    fn samples(base: &str, counter: &Counter) -> Vec<(String, String, SampleValue)> {
        let help = |what: &str| format!("{} {}", counter.name, what);
        match counter.value {
            CounterValue::Increment(count) => {
                vec![(base.to_string(), help("increment"), SampleValue::Int(count))]
            }
            CounterValue::Last(v) => vec![(base.to_string(), help("last"), SampleValue::Float(v))],
            CounterValue::Interval(v) => {
                vec![(base.to_string(), help("interval"), SampleValue::Float(v))]
            }
            CounterValue::Timestamp(t) => vec![(
                base.to_string(),
                help("timestamp"),
                SampleValue::Float(epoch_seconds(t)),
            )],
            CounterValue::Statistics(s) => vec![
                (
                    format!("{}_count", base),
                    help("statistics count"),
                    SampleValue::Int(s.count.min(i64::MAX as u64) as i64),
                ),
                (
                    format!("{}_min", base),
                    help("statistics minimum"),
                    SampleValue::Float(s.min),
                ),
                (
                    format!("{}_max", base),
                    help("statistics maximum"),
                    SampleValue::Float(s.max),
                ),
                (
                    format!("{}_avg", base),
                    help("statistics average"),
                    SampleValue::Float(s.average),
                ),
            ],
        }
    }

    /// Groups the snapshot's samples by metric name.
    ///
    /// A sample that collides with an earlier one (same name and label values,
    /// or a name already used with other labels or value type) is dropped.
    fn families(&self, snapshot: &Snapshot) -> BTreeMap<String, Family> {
        let mut families: BTreeMap<String, Family> = BTreeMap::new();

        for counter in snapshot {
            let (base, labels) = self.metric_name(&counter.name);
            let label_names: Vec<String> = labels.iter().map(|(k, _)| k.clone()).collect();
            let label_values: Vec<String> = labels.iter().map(|(_, v)| v.clone()).collect();

            for (name, help, value) in Self::samples(&base, counter) {
                let family = families.entry(name.clone()).or_insert_with(|| Family {
                    help,
                    label_names: label_names.clone(),
                    integer: value.is_int(),
                    samples: Vec::new(),
                    seen: HashSet::new(),
                });

                if family.label_names != label_names || family.integer != value.is_int() {
                    warn!(
                        counter = %counter.name,
                        metric = %name,
                        "metric name already used with a different shape, sample dropped"
                    );
                    continue;
                }
                if !family.seen.insert(label_values.clone()) {
                    warn!(
                        counter = %counter.name,
                        metric = %name,
                        "duplicate metric after name sanitization, sample dropped"
                    );
                    continue;
                }
                family.samples.push((label_values.clone(), value));
            }
        }

        families
    }

    /// Renders a snapshot to Prometheus exposition format.
    ///
    /// An empty snapshot renders to an empty document.
    ///
    /// # Errors
    ///
    /// Returns an error if metric creation, registration, or encoding fails.
    pub fn render(&self, snapshot: &Snapshot) -> Result<String> {
        // Create a fresh registry for this render
        let registry = Registry::new();

        for (name, family) in self.families(snapshot) {
            if family.integer {
                Self::register_int_family(&registry, &name, &family)?;
            } else {
                Self::register_float_family(&registry, &name, &family)?;
            }
        }

        Self::encode_registry(&registry)
    }

    /// Renders a snapshot to bytes (useful for HTTP bodies).
    ///
    /// # Errors
    ///
    /// Returns an error if metric creation, registration, or encoding fails.
    pub fn render_bytes(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        Ok(self.render(snapshot)?.into_bytes())
    }

    /// Encodes the registry to a string.
    fn encode_registry(registry: &Registry) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ExpositionError::EncodeError(e.to_string()))?;
        String::from_utf8(buffer).map_err(ExpositionError::from)
    }

    /// Registers an integer gauge family.
    fn register_int_family(registry: &Registry, name: &str, family: &Family) -> Result<()> {
        let opts = Opts::new(name, family.help.as_str());
        if family.label_names.is_empty() {
            let gauge = IntGauge::with_opts(opts)?;
            for (_, value) in &family.samples {
                if let SampleValue::Int(v) = value {
                    gauge.set(*v);
                }
            }
            registry.register(Box::new(gauge))?;
        } else {
            let label_names: Vec<&str> = family.label_names.iter().map(String::as_str).collect();
            let gauge = IntGaugeVec::new(opts, label_names.as_slice())?;
            for (label_values, value) in &family.samples {
                let values: Vec<&str> = label_values.iter().map(String::as_str).collect();
                if let SampleValue::Int(v) = value {
                    gauge.with_label_values(values.as_slice()).set(*v);
                }
            }
            registry.register(Box::new(gauge))?;
        }
        Ok(())
    }

    /// Registers a floating-point gauge family.
    fn register_float_family(registry: &Registry, name: &str, family: &Family) -> Result<()> {
        let opts = Opts::new(name, family.help.as_str());
        if family.label_names.is_empty() {
            let gauge = Gauge::with_opts(opts)?;
            for (_, value) in &family.samples {
                if let SampleValue::Float(v) = value {
                    gauge.set(*v);
                }
            }
            registry.register(Box::new(gauge))?;
        } else {
            let label_names: Vec<&str> = family.label_names.iter().map(String::as_str).collect();
            let gauge = GaugeVec::new(opts, label_names.as_slice())?;
            for (label_values, value) in &family.samples {
                let values: Vec<&str> = label_values.iter().map(String::as_str).collect();
                if let SampleValue::Float(v) = value {
                    gauge.with_label_values(values.as_slice()).set(*v);
                }
            }
            registry.register(Box::new(gauge))?;
        }
        Ok(())
    }
}

/// Encodes a snapshot labeled with `job` and `instance` (either may be empty).
///
/// # Errors
///
/// Returns an error if metric creation, registration, or encoding fails.
pub fn encode(snapshot: &Snapshot, job: &str, instance: &str) -> Result<Vec<u8>> {
    ExpositionEncoder::new()
        .with_source(job)
        .with_instance(instance)
        .render_bytes(snapshot)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CounterCache;
    use std::time::{Duration, UNIX_EPOCH};

    /// Parses sample lines into `(series, value)` pairs, skipping comments.
    fn samples(output: &str) -> Vec<(String, f64)> {
        output
            .lines()
            .filter(|l| !l.starts_with('#') && !l.is_empty())
            .map(|l| {
                let (series, value) = l.rsplit_once(' ').unwrap();
                (series.to_string(), value.parse::<f64>().unwrap())
            })
            .collect()
    }

    fn value_of(output: &str, series: &str) -> Option<f64> {
        samples(output)
            .into_iter()
            .find(|(s, _)| s == series)
            .map(|(_, v)| v)
    }

    #[test]
    fn test_render_empty() {
        let output = ExpositionEncoder::new().render(&Snapshot::default()).unwrap();
        assert!(output.is_empty());

        let labeled = encode(&Snapshot::default(), "svc", "i1").unwrap();
        assert!(labeled.is_empty());
    }

    #[test]
    fn test_render_increment_and_statistics() {
        let cache = CounterCache::new();
        cache.increment("a.b", 4).unwrap();
        for v in [1.0, 2.0, 3.0] {
            cache.observe("x.y", v).unwrap();
        }

        let output = String::from_utf8(encode(&cache.get_all(), "svc", "i1").unwrap()).unwrap();
        let labels = "{instance=\"i1\",source=\"svc\"}";

        assert_eq!(value_of(&output, &format!("a_b{}", labels)), Some(4.0));
        assert_eq!(value_of(&output, &format!("x_y_count{}", labels)), Some(3.0));
        assert_eq!(value_of(&output, &format!("x_y_min{}", labels)), Some(1.0));
        assert_eq!(value_of(&output, &format!("x_y_max{}", labels)), Some(3.0));
        assert_eq!(value_of(&output, &format!("x_y_avg{}", labels)), Some(2.0));
        assert_eq!(samples(&output).len(), 5);
        assert!(output.ends_with('\n'));
    }

    #[test]
    fn test_render_without_labels() {
        let cache = CounterCache::new();
        cache.increment("requests", 100).unwrap();

        let output = ExpositionEncoder::new().render(&cache.get_all()).unwrap();
        assert!(output.contains("requests 100"));
        assert!(!output.contains('{'));
    }

    #[test]
    fn test_render_single_label() {
        let cache = CounterCache::new();
        cache.increment("requests", 1).unwrap();

        let output = ExpositionEncoder::new()
            .with_instance("node-1")
            .render(&cache.get_all())
            .unwrap();
        assert!(output.contains("requests{instance=\"node-1\"} 1"));
        assert!(!output.contains(SOURCE_LABEL));
    }

    #[test]
    fn test_render_scalar_kinds() {
        let cache = CounterCache::new();
        cache.set_last("queue.size", 12.5).unwrap();
        cache
            .timestamp("last.seen", UNIX_EPOCH + Duration::from_millis(1_500))
            .unwrap();
        cache
            .record_interval("job.elapsed", Duration::from_millis(40))
            .unwrap();

        let output = ExpositionEncoder::new().render(&cache.get_all()).unwrap();
        assert_eq!(value_of(&output, "queue_size"), Some(12.5));
        assert_eq!(value_of(&output, "last_seen"), Some(1.5));
        assert_eq!(value_of(&output, "job_elapsed"), Some(40.0));
        assert!(output.contains("# TYPE queue_size gauge"));
        assert!(output.contains("# HELP queue_size queue.size last"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let cache = CounterCache::new();
        cache.increment("z.calls", 1).unwrap();
        cache.set_last("a.last", 2.0).unwrap();
        cache.observe("m.stats", 3.0).unwrap();
        let snapshot = cache.get_all();

        let encoder = ExpositionEncoder::new().with_source("svc");
        let first = encoder.render(&snapshot).unwrap();
        for _ in 0..10 {
            assert_eq!(encoder.render(&snapshot).unwrap(), first);
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(ExpositionEncoder::sanitize_name("valid_name"), "valid_name");
        assert_eq!(ExpositionEncoder::sanitize_name("with-dash"), "with_dash");
        assert_eq!(ExpositionEncoder::sanitize_name("with.dot"), "with_dot");
        assert_eq!(ExpositionEncoder::sanitize_name("with/slash"), "with_slash");
        assert_eq!(ExpositionEncoder::sanitize_name("with space"), "with_space");
        assert_eq!(ExpositionEncoder::sanitize_name("città"), "citt_");
        assert_eq!(ExpositionEncoder::sanitize_name(""), "unnamed");
        assert_eq!(ExpositionEncoder::sanitize_name("123starts"), "_123starts");
    }

    #[test]
    fn test_colliding_names_keep_first() {
        let cache = CounterCache::new();
        cache.increment("a.b", 1).unwrap();
        cache.increment("a_b", 2).unwrap();
        cache.set_last("a-b", 3.0).unwrap();

        let output = ExpositionEncoder::new().render(&cache.get_all()).unwrap();
        assert_eq!(samples(&output), vec![("a_b".to_string(), 1.0)]);
    }

    #[test]
    fn test_derived_labels() {
        let cache = CounterCache::new();
        cache.increment("orders.create.calls", 3).unwrap();
        cache.increment("orders.delete.calls", 1).unwrap();
        cache.increment("queue.jobs.sent_messages", 7).unwrap();
        cache.increment("plain.counter", 5).unwrap();

        let output = ExpositionEncoder::new()
            .with_derived_labels(true)
            .render(&cache.get_all())
            .unwrap();

        assert_eq!(
            value_of(&output, "calls{command=\"create\",service=\"orders\"}"),
            Some(3.0)
        );
        assert_eq!(
            value_of(&output, "calls{command=\"delete\",service=\"orders\"}"),
            Some(1.0)
        );
        assert_eq!(value_of(&output, "sent_messages{queue=\"jobs\"}"), Some(7.0));
        assert_eq!(value_of(&output, "plain_counter"), Some(5.0));
    }

    #[test]
    fn test_derived_labels_off_by_default() {
        let cache = CounterCache::new();
        cache.increment("orders.create.calls", 3).unwrap();

        let output = ExpositionEncoder::new().render(&cache.get_all()).unwrap();
        assert_eq!(value_of(&output, "orders_create_calls"), Some(3.0));
    }

    #[test]
    fn test_label_values_escaped() {
        let cache = CounterCache::new();
        cache.increment("calls", 1).unwrap();

        let output = ExpositionEncoder::new()
            .with_source("say \"hi\"")
            .render(&cache.get_all())
            .unwrap();
        assert!(output.contains("calls{source=\"say \\\"hi\\\"\"} 1"));
    }

    #[test]
    fn test_render_bytes_is_utf8() {
        let cache = CounterCache::new();
        cache.increment("bytes_test", 42).unwrap();

        let bytes = ExpositionEncoder::new().render_bytes(&cache.get_all()).unwrap();
        let output = String::from_utf8(bytes).unwrap();
        assert!(output.contains("bytes_test 42"));
    }
}
