use contatori_prometheus::cache::CounterCache;
use contatori_prometheus::config::{self, ServiceConfig};
use contatori_prometheus::pull::MetricsService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

async fn start(service: Arc<MetricsService>) -> (SocketAddr, oneshot::Sender<()>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        service
            .serve(listener, async move {
                rx.await.ok();
            })
            .await
            .unwrap();
    });
    (addr, tx, handle)
}

#[tokio::test]
async fn test_scrape_fresh_cache() {
    let cache = CounterCache::new();
    let service =
        Arc::new(MetricsService::new(ServiceConfig::default()).with_reader(cache.reader()));
    let (addr, shutdown, handle) = start(service).await;

    let response = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
    assert!(response.text().await.unwrap().trim().is_empty());

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_scrape_counters_from_config() {
    let cfg = config::load_from_str(
        r#"
source: billing
instance: node-7
service:
  listen: 127.0.0.1:0
  derive_labels: true
"#,
    )
    .unwrap();

    let cache = CounterCache::new();
    cache.increment("invoices.create.calls", 2).unwrap();
    cache.increment("queue.mail.sent_messages", 5).unwrap();

    let service = Arc::new(MetricsService::new(cfg.service_config()).with_reader(cache.reader()));
    let listener = service.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let server = Arc::clone(&service);
    let handle = tokio::spawn(async move {
        server
            .serve(listener, async move {
                rx.await.ok();
            })
            .await
            .unwrap();
    });

    let body = reqwest::get(format!("http://{}/metrics", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("# TYPE calls gauge"));
    assert!(body.contains(
        "calls{command=\"create\",instance=\"node-7\",service=\"invoices\",source=\"billing\"} 2"
    ));
    assert!(body.contains("sent_messages{instance=\"node-7\",queue=\"mail\",source=\"billing\"} 5"));

    tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_unknown_path_not_found() {
    let service = Arc::new(MetricsService::new(ServiceConfig::default()));
    let (addr, shutdown, handle) = start(service).await;

    let response = reqwest::get(format!("http://{}/other", addr)).await.unwrap();
    assert_eq!(response.status(), 404);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}
