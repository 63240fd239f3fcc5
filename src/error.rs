//! Unified error type for counters, exposition and delivery.
//!
//! Each area has its own error enum ([`CounterError`], [`ExpositionError`],
//! [`ConfigError`] and, with the `push` feature, [`PushError`]). The
//! [`Error`] enum wraps all of them so that hosts can use a single error type.
//!
//! # Example
//!
//! ```rust,ignore
//! use contatori_prometheus::error::Result;
//!
//! fn record(cache: &CounterCache) -> Result<()> {
//!     cache.increment("svc.calls", 1)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::counters::CounterKind;

/// Unified error type for all operations of this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A counter update was rejected.
    #[error("counter error: {0}")]
    Counter(#[from] CounterError),

    /// Counters could not be rendered to the exposition format.
    #[error("exposition error: {0}")]
    Exposition(#[from] ExpositionError),

    /// Configuration could not be loaded or resolved.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Metrics could not be delivered to the Pushgateway.
    #[cfg(feature = "push")]
    #[error("push error: {0}")]
    Push(#[from] PushError),

    /// I/O failure, e.g. binding the metrics endpoint.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for operations of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by counter-update operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CounterError {
    /// The name is already registered with a different kind.
    #[error("counter '{name}' is registered as {registered}, not {requested}")]
    KindMismatch {
        name: String,
        registered: CounterKind,
        requested: CounterKind,
    },
}

/// Error rendering counters to the Prometheus text format.
#[derive(Debug, Error)]
pub enum ExpositionError {
    /// Error creating or registering a metric.
    #[error("metric error: {0}")]
    MetricError(String),

    /// Error encoding metrics to text format.
    #[error("encode error: {0}")]
    EncodeError(String),

    /// Error converting bytes to UTF-8 string.
    #[error(transparent)]
    Utf8Error(#[from] std::string::FromUtf8Error),
}

impl From<prometheus::Error> for ExpositionError {
    fn from(err: prometheus::Error) -> Self {
        ExpositionError::MetricError(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Exposition(ExpositionError::from(err))
    }
}

/// Error loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid YAML for the expected schema.
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The configuration file could not be read.
    #[error("read config failed: {0}")]
    Read(#[from] std::io::Error),

    /// A field holds a value outside its accepted range.
    #[error("invalid value: {0}")]
    Invalid(String),

    /// Only `http` and `https` are supported.
    #[error("unsupported protocol '{0}'")]
    UnsupportedProtocol(String),

    /// A discovery key was configured but nothing resolved it.
    #[error("discovery key '{0}' could not be resolved")]
    Discovery(String),
}

/// Error delivering metrics to a Pushgateway.
#[cfg(feature = "push")]
#[derive(Debug, Error)]
pub enum PushError {
    /// The HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(String),

    /// A single attempt failed before any response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// Every attempt failed at the transport level.
    #[error("push to {url} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: Box<PushError>,
    },

    /// The Pushgateway answered with a non-2xx status.
    #[error("pushgateway {url} answered with status {status}")]
    Status { url: String, status: u16 },

    /// Counters could not be rendered.
    #[error(transparent)]
    Exposition(#[from] ExpositionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mismatch_display() {
        let err = CounterError::KindMismatch {
            name: "svc.calls".into(),
            registered: CounterKind::Last,
            requested: CounterKind::Increment,
        };
        assert_eq!(
            err.to_string(),
            "counter 'svc.calls' is registered as last, not increment"
        );
    }

    #[test]
    fn test_unified_from() {
        let err: Error = CounterError::KindMismatch {
            name: "x".into(),
            registered: CounterKind::Timestamp,
            requested: CounterKind::Statistics,
        }
        .into();
        assert!(matches!(err, Error::Counter(_)));

        let err: Error = ConfigError::UnsupportedProtocol("ftp".into()).into();
        assert_eq!(err.to_string(), "config error: unsupported protocol 'ftp'");
    }

    #[test]
    fn test_exposition_error_display() {
        let err = ExpositionError::MetricError("test error".to_string());
        assert_eq!(format!("{}", err), "metric error: test error");

        let err = ExpositionError::EncodeError("encode failed".to_string());
        assert_eq!(format!("{}", err), "encode error: encode failed");
    }

    #[cfg(feature = "push")]
    #[test]
    fn test_exhausted_display() {
        let err = PushError::Exhausted {
            url: "http://gw/metrics/job/a/instance/b".into(),
            attempts: 3,
            source: Box::new(PushError::Transport("connection refused".into())),
        };
        assert_eq!(
            err.to_string(),
            "push to http://gw/metrics/job/a/instance/b failed after 3 attempt(s): transport error: connection refused"
        );
    }
}
