//! Demo exporter: records simulated traffic and delivers it both ways.
//!
//! Run with:
//! ```bash
//! cargo run --example exporter --features demo -- --listen 127.0.0.1:9100
//! cargo run --example exporter --features demo -- --gateway http://localhost:9091 --push-interval 5000
//! ```
//!
//! Then scrape `http://127.0.0.1:9100/metrics`.

use clap::Parser;
use contatori_prometheus::cache::CounterCache;
use contatori_prometheus::config::{self, ConnectionParams, ContextInfo, ExporterConfig};
use contatori_prometheus::pull::MetricsService;
use contatori_prometheus::push::PushCounters;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Demo exporter for contatori-prometheus.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address of the /metrics endpoint (overrides the config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Pushgateway base URI (overrides the config)
    #[arg(short, long)]
    gateway: Option<String>,

    /// Push period in milliseconds (overrides the config)
    #[arg(long)]
    push_interval: Option<u64>,

    /// Export well-known names as labels
    #[arg(long)]
    derive_labels: bool,

    /// Number of simulated worker threads
    #[arg(long, default_value = "4")]
    workers: usize,
}

fn load_config(args: &Args) -> contatori_prometheus::Result<ExporterConfig> {
    let mut cfg = match &args.config {
        Some(path) => config::load_from_file(path)?,
        None => ExporterConfig::default(),
    };
    if let Some(listen) = &args.listen {
        cfg.service.listen = listen.clone();
    }
    if let Some(uri) = &args.gateway {
        cfg.push.connection = Some(ConnectionParams::from_uri(uri));
    }
    if let Some(interval) = args.push_interval {
        cfg.push.options.interval = interval;
    }
    cfg.service.derive_labels |= args.derive_labels;
    cfg.validate()?;
    Ok(cfg)
}

/// Spawns threads that keep updating counters of every kind.
fn simulate_traffic(cache: &CounterCache, workers: usize) {
    for worker in 0..workers {
        let cache = cache.clone();
        std::thread::spawn(move || {
            let mut i: u64 = 0;
            loop {
                i += 1;
                let timing = cache.begin_timing("orders.create.exec_time");
                std::thread::sleep(Duration::from_millis(10 + (i * 7 + worker as u64) % 40));
                let _ = timing.end_timing();

                let _ = cache.increment_one("orders.create.calls");
                if i % 13 == 0 {
                    let _ = cache.increment_one("orders.create.failures");
                }
                let _ = cache.observe("orders.payload.size", ((i * 31) % 1024) as f64);
                let _ = cache.set_last("queue.orders.depth", (i % 50) as f64);
                let _ = cache.increment("queue.orders.sent_messages", 1);
                let _ = cache.timestamp_now("orders.last_seen");
            }
        });
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> contatori_prometheus::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let cfg = load_config(&args)?;
    let context = ContextInfo::new("exporter-demo", &std::process::id().to_string());

    let cache = CounterCache::new();
    simulate_traffic(&cache, args.workers);

    let push = Arc::new(
        PushCounters::new(cfg.push_config(), cache.reader()).with_context(context.clone()),
    );
    push.open()?;
    let pusher = push.spawn(push.options().interval());

    let service = Arc::new(
        MetricsService::new(cfg.service_config())
            .with_context(context)
            .with_reader(cache.reader()),
    );
    let listener = service.bind().await?;
    service.serve(listener, shutdown_signal()).await?;

    // Last delivery before leaving.
    if let Err(e) = push.flush().await {
        tracing::warn!(error = %e, "final push failed");
    }
    push.close();
    pusher.abort();
    Ok(())
}
