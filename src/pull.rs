//! `GET /metrics` endpoint for Prometheus scrapers.
//!
//! [`MetricsService`] renders the counters of a [`CounterReader`] on every
//! request. Until a reader is attached the endpoint answers `200` with an
//! empty body, so a scraper never fails just because nothing was recorded.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use contatori_prometheus::cache::CounterCache;
//! use contatori_prometheus::config::ServiceConfig;
//! use contatori_prometheus::pull::MetricsService;
//!
//! let cache = CounterCache::new();
//! let service = Arc::new(MetricsService::new(ServiceConfig::default()).with_reader(cache.reader()));
//!
//! let listener = service.bind().await?;
//! service.serve(listener, async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpListener;
use tracing::{error, info, trace};

use crate::cache::CounterReader;
use crate::config::{self, ContextInfo, ServiceConfig};
use crate::error::{ExpositionError, Result};
use crate::exposition::ExpositionEncoder;

/// Path served by [`MetricsService::router`].
pub const METRICS_PATH: &str = "/metrics";

/// Serves counter snapshots in the Prometheus text format.
pub struct MetricsService {
    config: ServiceConfig,
    context: Option<ContextInfo>,
    reader: RwLock<Option<Arc<dyn CounterReader>>>,
}

impl MetricsService {
    /// Creates a service without a reader.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            context: None,
            reader: RwLock::new(None),
        }
    }

    /// Supplies the default `source` (`name`) and `instance` (`context_id`).
    pub fn with_context(mut self, context: ContextInfo) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_reader(self, reader: Arc<dyn CounterReader>) -> Self {
        self.set_reader(reader);
        self
    }

    /// Attaches (or replaces) the counters served by the endpoint.
    pub fn set_reader(&self, reader: Arc<dyn CounterReader>) {
        *self.reader.write().unwrap_or_else(PoisonError::into_inner) = Some(reader);
    }

    /// Detaches the counters; later scrapes get an empty body.
    pub fn clear_reader(&self) {
        *self.reader.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn encoder(&self) -> ExpositionEncoder {
        let source = config::pick(
            self.config.source.as_deref(),
            self.context.as_ref().map(|c| c.name.as_str()),
        );
        let instance = config::pick(
            self.config.instance.as_deref(),
            self.context.as_ref().map(|c| c.context_id.as_str()),
        );
        ExpositionEncoder::new()
            .with_source(source.as_deref().unwrap_or_default())
            .with_instance(instance.as_deref().unwrap_or_default())
            .with_derived_labels(self.config.derive_labels)
    }

    /// Renders the current counters, or an empty document without a reader.
    pub fn render(&self) -> std::result::Result<String, ExpositionError> {
        let reader = self
            .reader
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match reader {
            Some(reader) => self.encoder().render(&reader.get_all()),
            None => Ok(String::new()),
        }
    }

    /// Router serving `GET /metrics`.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(METRICS_PATH, get(metrics))
            .with_state(Arc::clone(self))
    }

    /// Binds the configured `listen` address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        Ok(listener)
    }

    /// Serves the router on `listener` until `shutdown` completes.
    pub async fn serve<F>(self: &Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!("Metrics endpoint listening on http://{}{}", addr, METRICS_PATH);
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

impl Debug for MetricsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attached = self
            .reader
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("MetricsService")
            .field("config", &self.config)
            .field("context", &self.context)
            .field("reader_attached", &attached)
            .finish()
    }
}

async fn metrics(State(service): State<Arc<MetricsService>>) -> Response {
    match service.render() {
        Ok(body) => {
            trace!(bytes = body.len(), "Metrics scraped");
            (StatusCode::OK, [(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CounterCache;

    async fn scrape(service: Arc<MetricsService>) -> (StatusCode, String, String) {
        let response = metrics(State(service)).await;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_scrape_without_reader() {
        let service = Arc::new(MetricsService::new(ServiceConfig::default()));
        let (status, content_type, body) = scrape(service).await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/plain"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_scrape_fresh_cache() {
        let cache = CounterCache::new();
        let service =
            Arc::new(MetricsService::new(ServiceConfig::default()).with_reader(cache.reader()));
        let (status, _, body) = scrape(service).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.trim().is_empty());
    }

    #[tokio::test]
    async fn test_scrape_unlabeled() {
        let cache = CounterCache::new();
        cache.increment("svc.calls", 3).unwrap();
        let service =
            Arc::new(MetricsService::new(ServiceConfig::default()).with_reader(cache.reader()));

        let (_, _, body) = scrape(service).await;
        assert!(body.lines().any(|l| l == "svc_calls 3"));
    }

    #[tokio::test]
    async fn test_scrape_labels_from_context() {
        let cache = CounterCache::new();
        cache.set_last("queue.depth", 7.5).unwrap();
        let service = Arc::new(
            MetricsService::new(ServiceConfig::default())
                .with_context(ContextInfo::new("svc", "i1"))
                .with_reader(cache.reader()),
        );

        let (_, _, body) = scrape(service).await;
        assert!(body.contains("queue_depth{instance=\"i1\",source=\"svc\"} 7.5"));
    }

    #[tokio::test]
    async fn test_scrape_reflects_updates() {
        let cache = CounterCache::new();
        let service = Arc::new(MetricsService::new(ServiceConfig::default()));
        assert!(scrape(Arc::clone(&service)).await.2.is_empty());

        service.set_reader(cache.reader());
        cache.increment_one("hits").unwrap();
        assert!(scrape(Arc::clone(&service)).await.2.contains("hits 1"));

        cache.increment_one("hits").unwrap();
        assert!(scrape(Arc::clone(&service)).await.2.contains("hits 2"));

        service.clear_reader();
        assert!(scrape(service).await.2.is_empty());
    }
}
