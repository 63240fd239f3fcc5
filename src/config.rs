//! Configuration for the push and pull delivery paths (strict parsing).
//!
//! ```yaml
//! source: my-service
//! instance: node-1
//! push:
//!   connection:
//!     protocol: http
//!     host: localhost
//!     port: 9091
//!   options:
//!     retries: 3
//!     connect_timeout: 10000
//!     timeout: 10000
//! service:
//!   listen: 0.0.0.0:8080
//! ```
//!
//! Every section is optional. Without a `push.connection` the push path
//! opens in its disabled state.

use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::error::ConfigError;

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    /// Job name reported as `source`.
    #[serde(default)]
    pub source: Option<String>,

    /// Instance id reported as `instance`.
    #[serde(default)]
    pub instance: Option<String>,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

impl ExporterConfig {
    pub fn validate(&self) -> Result<()> {
        self.push.validate()?;
        self.service.validate()?;
        Ok(())
    }

    /// Push configuration with the top-level `source`/`instance` filled in
    /// where the section leaves them unset.
    pub fn push_config(&self) -> PushConfig {
        let mut push = self.push.clone();
        push.source = push.source.or_else(|| self.source.clone());
        push.instance = push.instance.or_else(|| self.instance.clone());
        push
    }

    /// Service configuration with the top-level `source`/`instance` filled in
    /// where the section leaves them unset.
    pub fn service_config(&self) -> ServiceConfig {
        let mut service = self.service.clone();
        service.source = service.source.or_else(|| self.source.clone());
        service.instance = service.instance.or_else(|| self.instance.clone());
        service
    }
}

/// Configuration of the Pushgateway delivery path.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushConfig {
    /// Target Pushgateway. `None` disables pushing.
    #[serde(default)]
    pub connection: Option<ConnectionParams>,

    #[serde(default)]
    pub options: PushOptions,

    /// Job name; overrides the top-level `source`.
    #[serde(default)]
    pub source: Option<String>,

    /// Instance id; overrides the top-level `instance`.
    #[serde(default)]
    pub instance: Option<String>,
}

impl PushConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(conn) = &self.connection {
            conn.validate()?;
        }
        self.options.validate()
    }
}

/// Retry and timeout options. All durations are milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushOptions {
    /// Attempts per flush on transport failure. `0` still makes one attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,

    /// Period of the background flush task.
    #[serde(default = "default_interval_ms")]
    pub interval: u64,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            connect_timeout: default_timeout_ms(),
            timeout: default_timeout_ms(),
            interval: default_interval_ms(),
        }
    }
}

impl PushOptions {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout == 0 || self.timeout == 0 {
            return Err(ConfigError::Invalid(
                "push.options timeouts must be greater than zero".into(),
            ));
        }
        if self.interval == 0 {
            return Err(ConfigError::Invalid(
                "push.options.interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    /// Number of attempts a flush makes before giving up.
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

fn default_retries() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_interval_ms() -> u64 {
    300_000
}

/// Where to reach an HTTP endpoint.
///
/// Either `uri`, or `host` and `port` (with an optional `protocol`), or a
/// `discovery_key` resolved through a [`Discovery`] implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionParams {
    #[serde(default)]
    pub discovery_key: Option<String>,

    #[serde(default)]
    pub protocol: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub uri: Option<String>,
}

impl ConnectionParams {
    /// Builds connection parameters for `protocol://host:port`.
    pub fn new(protocol: &str, host: &str, port: u16) -> Self {
        Self {
            protocol: Some(protocol.to_string()),
            host: Some(host.to_string()),
            port: Some(port),
            ..Default::default()
        }
    }

    /// Builds connection parameters from a full URI.
    pub fn from_uri(uri: &str) -> Self {
        Self {
            uri: Some(uri.to_string()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(protocol) = &self.protocol {
            if protocol != "http" && protocol != "https" {
                return Err(ConfigError::UnsupportedProtocol(protocol.clone()));
            }
        }
        if let Some(uri) = &self.uri {
            if !(uri.starts_with("http://") || uri.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "connection.uri '{}' must start with http:// or https://",
                    uri
                )));
            }
        }
        if self.host.is_some() && self.port.is_none() {
            return Err(ConfigError::Invalid("connection.port is required with host".into()));
        }
        Ok(())
    }

    /// Returns `true` if the parameters name an endpoint directly.
    pub fn is_direct(&self) -> bool {
        self.uri.is_some() || self.host.is_some()
    }

    /// Base URI without trailing slash, or `None` if no endpoint is named.
    pub fn base_uri(&self) -> Result<Option<String>> {
        self.validate()?;
        if let Some(uri) = &self.uri {
            return Ok(Some(uri.trim_end_matches('/').to_string()));
        }
        match (&self.host, self.port) {
            (Some(host), Some(port)) => {
                let protocol = self.protocol.as_deref().unwrap_or("http");
                Ok(Some(format!("{}://{}:{}", protocol, host, port)))
            }
            _ => Ok(None),
        }
    }
}

/// Resolves discovery keys to connection parameters.
pub trait Discovery: Send + Sync {
    /// Returns the connection registered under `key`, if any.
    fn resolve(&self, key: &str) -> Option<ConnectionParams>;
}

/// Resolves the base URI of an optional connection.
///
/// Direct parameters win over the discovery key. `Ok(None)` means nothing is
/// configured; a discovery key nobody can resolve is an error.
pub fn resolve_uri(
    connection: Option<&ConnectionParams>,
    discovery: Option<&dyn Discovery>,
) -> Result<Option<String>> {
    let Some(conn) = connection else {
        return Ok(None);
    };
    if conn.is_direct() {
        return conn.base_uri();
    }
    match &conn.discovery_key {
        Some(key) => {
            let resolved = discovery
                .and_then(|d| d.resolve(key))
                .ok_or_else(|| ConfigError::Discovery(key.clone()))?;
            resolved.base_uri()
        }
        None => Ok(None),
    }
}

/// Configuration of the `/metrics` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Export well-known counter names as labels.
    #[serde(default)]
    pub derive_labels: bool,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub instance: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            derive_labels: false,
            source: None,
            instance: None,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        self.listen
            .parse::<std::net::SocketAddr>()
            .map_err(|e| ConfigError::Invalid(format!("service.listen '{}': {}", self.listen, e)))?;
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

/// Identity of the hosting process, used for default `source`/`instance`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextInfo {
    /// Process or container name.
    pub name: String,
    /// Unique id of this process instance.
    pub context_id: String,
}

impl ContextInfo {
    pub fn new(name: &str, context_id: &str) -> Self {
        Self {
            name: name.to_string(),
            context_id: context_id.to_string(),
        }
    }
}

/// Picks the first non-empty value among the explicit setting and the context.
pub(crate) fn pick(explicit: Option<&str>, context: Option<&str>) -> Option<String> {
    explicit
        .filter(|s| !s.is_empty())
        .or(context.filter(|s| !s.is_empty()))
        .map(str::to_string)
}

pub fn load_from_file(path: &str) -> Result<ExporterConfig> {
    let s = fs::read_to_string(path)?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ExporterConfig> {
    let cfg: ExporterConfig = serde_yaml::from_str(s)?;
    cfg.validate()?;
    Ok(cfg)
}
