//! Delivery of counter snapshots to a Prometheus Pushgateway.
//!
//! [`PushCounters`] renders the current snapshot of a [`CounterReader`] and
//! PUTs it to `<base-uri>/metrics/job/<job>/instance/<instance>`.
//!
//! # Lifecycle
//!
//! ```text
//!            open()                      close()
//!   Closed ─────────► Open / Disabled ──────────► Closed
//! ```
//!
//! Opening without a configured connection succeeds in the *disabled* state:
//! `flush()` is then a silent no-op. Flushing a closed component is a no-op
//! as well.
//!
//! # Delivery semantics
//!
//! - Transport failures (connection refused, timeout, DNS) are retried
//!   immediately, up to `options.retries` attempts in total.
//! - Any 2xx response is success. Any other status is logged and returned as
//!   [`PushError::Status`] without retrying.
//! - Nothing is queued: a failed flush is not replayed, the next flush sends
//!   whatever the counters hold at that time.
//!
//! # Example
//!
//! ```rust,ignore
//! use contatori_prometheus::cache::CounterCache;
//! use contatori_prometheus::config::{ConnectionParams, PushConfig};
//! use contatori_prometheus::push::PushCounters;
//!
//! let cache = CounterCache::new();
//! let config = PushConfig {
//!     connection: Some(ConnectionParams::new("http", "localhost", 9091)),
//!     source: Some("billing".into()),
//!     ..Default::default()
//! };
//!
//! let push = PushCounters::new(config, cache.reader());
//! push.open()?;
//!
//! cache.increment("billing.invoices.calls", 1)?;
//! push.flush().await?;
//! ```

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::fmt::{self, Debug};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace, warn};

use crate::cache::CounterReader;
use crate::config::{self, ContextInfo, Discovery, PushConfig, PushOptions};
use crate::error::{ConfigError, PushError, Result};
use crate::exposition::ExpositionEncoder;

/// Job name used when neither the configuration nor the context names one.
pub const DEFAULT_JOB: &str = "unknown";

/// Sends one HTTP PUT to a Pushgateway.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Sends `body` to `url`.
    ///
    /// Returns the HTTP status of the response, or [`PushError::Transport`]
    /// if no response was received.
    async fn put(&self, url: &str, body: Bytes) -> std::result::Result<u16, PushError>;
}

/// [`PushTransport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a client with the connect and request timeouts of `options`.
    pub fn new(options: &PushOptions) -> std::result::Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout())
            .timeout(options.timeout())
            .build()
            .map_err(|e| PushError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PushTransport for HttpTransport {
    async fn put(&self, url: &str, body: Bytes) -> std::result::Result<u16, PushError> {
        let response = self
            .client
            .put(url)
            .header(ACCEPT, "text/html")
            .header(CONTENT_TYPE, prometheus::TEXT_FORMAT)
            .body(body)
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}

enum State {
    Closed,
    Disabled,
    Open {
        url: String,
        encoder: ExpositionEncoder,
        transport: Arc<dyn PushTransport>,
    },
}

/// Pushes counter snapshots to a Pushgateway.
pub struct PushCounters {
    config: PushConfig,
    reader: Arc<dyn CounterReader>,
    context: Option<ContextInfo>,
    discovery: Option<Arc<dyn Discovery>>,
    transport: Option<Arc<dyn PushTransport>>,
    state: RwLock<State>,
}

impl PushCounters {
    /// Creates a closed push component reading from `reader`.
    pub fn new(config: PushConfig, reader: Arc<dyn CounterReader>) -> Self {
        Self {
            config,
            reader,
            context: None,
            discovery: None,
            transport: None,
            state: RwLock::new(State::Closed),
        }
    }

    /// Supplies the default job (`name`) and instance (`context_id`).
    pub fn with_context(mut self, context: ContextInfo) -> Self {
        self.context = Some(context);
        self
    }

    /// Resolves `connection.discovery_key` through `discovery`.
    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Replaces the default `reqwest` transport.
    pub fn with_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Retry, timeout and flush period options.
    pub fn options(&self) -> &PushOptions {
        &self.config.options
    }

    fn state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Job name pushed in the grouping key.
    pub fn job(&self) -> String {
        let context = self.context.as_ref().map(|c| c.name.as_str());
        config::pick(self.config.source.as_deref(), context)
            .unwrap_or_else(|| DEFAULT_JOB.to_string())
    }

    /// Instance id pushed in the grouping key, the host name by default.
    pub fn instance(&self) -> String {
        let context = self.context.as_ref().map(|c| c.context_id.as_str());
        config::pick(self.config.instance.as_deref(), context)
            .or_else(local_hostname)
            .unwrap_or_else(|| DEFAULT_JOB.to_string())
    }

    /// Resolves the target and acquires the HTTP client.
    ///
    /// Opening an open component does nothing. A missing connection, or a
    /// discovery key that resolves to nothing, opens in the disabled state.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection parameters are invalid or the HTTP
    /// client cannot be built.
    pub fn open(&self) -> Result<()> {
        let mut state = self.state_mut();
        if !matches!(*state, State::Closed) {
            return Ok(());
        }

        let base = match config::resolve_uri(
            self.config.connection.as_ref(),
            self.discovery.as_deref(),
        ) {
            Ok(Some(base)) => base,
            Ok(None) => {
                warn!("Connection to Prometheus Pushgateway is not configured, push disabled");
                *state = State::Disabled;
                return Ok(());
            }
            Err(ConfigError::Discovery(key)) => {
                warn!(discovery_key = %key, "Pushgateway connection not found, push disabled");
                *state = State::Disabled;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let transport: Arc<dyn PushTransport> = match &self.transport {
            Some(t) => Arc::clone(t),
            None => Arc::new(HttpTransport::new(&self.config.options)?),
        };

        let job = self.job();
        let instance = self.instance();
        let url = format!(
            "{}/metrics{}{}",
            base,
            grouping_segment("job", &job),
            grouping_segment("instance", &instance)
        );
        let encoder = ExpositionEncoder::new()
            .with_source(&job)
            .with_instance(&instance);

        debug!(url = %url, "Pushgateway delivery opened");
        *state = State::Open {
            url,
            encoder,
            transport,
        };
        Ok(())
    }

    /// Returns `true` once opened (enabled or disabled) and until closed.
    pub fn is_open(&self) -> bool {
        !matches!(*self.state(), State::Closed)
    }

    /// Returns `true` if opened with a resolved Pushgateway.
    pub fn is_enabled(&self) -> bool {
        matches!(*self.state(), State::Open { .. })
    }

    /// Full push URL, when enabled.
    pub fn url(&self) -> Option<String> {
        match &*self.state() {
            State::Open { url, .. } => Some(url.clone()),
            _ => None,
        }
    }

    /// Releases the HTTP client. Closing a closed component does nothing.
    pub fn close(&self) {
        let mut state = self.state_mut();
        if !matches!(*state, State::Closed) {
            debug!("Pushgateway delivery closed");
        }
        *state = State::Closed;
    }

    /// Pushes the current snapshot.
    ///
    /// # Errors
    ///
    /// [`PushError::Exhausted`] when every attempt failed at the transport
    /// level, [`PushError::Status`] on a non-2xx answer.
    pub async fn flush(&self) -> std::result::Result<(), PushError> {
        let (url, encoder, transport) = match &*self.state() {
            State::Open {
                url,
                encoder,
                transport,
            } => (url.clone(), encoder.clone(), Arc::clone(transport)),
            _ => {
                trace!("push skipped, delivery not enabled");
                return Ok(());
            }
        };

        let snapshot = self.reader.get_all();
        let body = Bytes::from(encoder.render_bytes(&snapshot)?);
        let attempts = self.config.options.attempts();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match transport.put(&url, body.clone()).await {
                Ok(status) if (200..300).contains(&status) => {
                    debug!(url = %url, status, counters = snapshot.len(), "Metrics pushed");
                    return Ok(());
                }
                Ok(status) => {
                    error!(url = %url, status, "Failed to push metrics to Pushgateway");
                    return Err(PushError::Status { url, status });
                }
                Err(e) => {
                    warn!(url = %url, attempt, attempts, error = %e, "Push attempt failed");
                    if attempt >= attempts {
                        error!(url = %url, attempts, "Giving up pushing metrics");
                        return Err(PushError::Exhausted {
                            url,
                            attempts,
                            source: Box::new(e),
                        });
                    }
                }
            }
        }
    }

    /// Starts a task that flushes every `period` until closed.
    ///
    /// Flush failures are logged and the next tick tries again.
    pub fn spawn(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;
                if !this.is_open() {
                    debug!("Push task stopped");
                    break;
                }
                if let Err(e) = this.flush().await {
                    warn!(error = %e, "Periodic push failed");
                }
            }
        })
    }
}

impl Debug for PushCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (state, url) = match &*self.state() {
            State::Closed => ("closed", None),
            State::Disabled => ("disabled", None),
            State::Open { url, .. } => ("open", Some(url.clone())),
        };
        f.debug_struct("PushCounters")
            .field("state", &state)
            .field("url", &url)
            .finish()
    }
}

/// One `/<label>/<value>` pair of a Pushgateway grouping key.
///
/// Values that are empty or contain characters outside the URL unreserved
/// set use the `/<label>@base64/<value>` form.
fn grouping_segment(label: &str, value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'));
    if plain {
        format!("/{}/{}", label, value)
    } else if value.is_empty() {
        format!("/{}@base64/=", label)
    } else {
        format!("/{}@base64/{}", label, URL_SAFE.encode(value))
    }
}

fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}
