use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use uatu_changewatch::config::LoggingConfig;
use uatu_changewatch::fetchers::{BrowserFetcher, HttpFetcher};
use uatu_changewatch::notification::{run_delivery, WebhookSink};
use uatu_changewatch::processors::ProcessorSet;
use uatu_changewatch::scheduler::{enqueue_all, RecheckScheduler};
use uatu_changewatch::{
    spawn_workers, AppConfig, FetcherRegistry, MemoryWatchStore, Watch, WatchStore, WorkQueue,
    WorkerContext, WorkerSettings,
};

#[derive(Parser, Debug)]
#[command(name = "uatu-changewatch", about = "Website change and restock watcher")]
struct Args {
    /// Base configuration file, without extension
    #[arg(long, default_value = "config/default")]
    config: String,

    /// JSON file with the watches to load into the store
    #[arg(long)]
    watches: Option<PathBuf>,

    /// Override the configured worker count
    #[arg(long)]
    workers: Option<usize>,

    /// Check every watch once, then exit
    #[arg(long)]
    once: bool,
}

fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,uatu_changewatch=debug"));

    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

async fn load_watches(store: &MemoryWatchStore, path: &PathBuf) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading watches from {}", path.display()))?;
    let watches: Vec<Watch> = serde_json::from_str(&raw).context("parsing watches file")?;
    let count = watches.len();
    for watch in watches {
        store.insert_watch(watch).await;
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    if let Some(workers) = args.workers {
        config.workers.count = workers;
        config.validate()?;
    }

    let _log_guard = init_tracing(&config.logging);
    info!("Starting Uatu Changewatch...");

    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()
            .context("installing Prometheus exporter")?;
        info!("Metrics exposed on port {}", config.metrics.port);
    }

    let store = MemoryWatchStore::new();
    if let Some(path) = &args.watches {
        let count = load_watches(&store, path).await?;
        info!("Loaded {} watches", count);
    }
    let store: Arc<dyn WatchStore> = Arc::new(store);

    let mut fetchers = FetcherRegistry::new().with(Arc::new(HttpFetcher::new(config.fetcher.clone())?));
    if config.browser.enabled {
        fetchers.register(Arc::new(BrowserFetcher::from_config(&config.browser)?));
    }
    for (backend, ready) in fetchers.readiness().await {
        if ready {
            info!("Fetcher '{}' is ready", backend.as_str());
        } else {
            warn!("Fetcher '{}' is not reachable yet", backend.as_str());
        }
    }

    let cancel = CancellationToken::new();
    let queue = WorkQueue::new();
    let (notify_tx, notify_rx) = tokio::sync::mpsc::unbounded_channel();

    let sink = Arc::new(WebhookSink::new(config.notifications.delivery_retries)?);
    // Delivery outlives the workers so queued notifications still go out
    let delivery_cancel = CancellationToken::new();
    let delivery = tokio::spawn(run_delivery(notify_rx, sink, delivery_cancel.clone()));

    let context = Arc::new(WorkerContext {
        store: store.clone(),
        fetchers,
        processors: ProcessorSet::standard(Duration::from_secs(config.workers.extraction_timeout_secs)),
        queue: queue.clone(),
        notifications: notify_tx,
        settings: WorkerSettings::from_config(&config),
    });
    let workers = spawn_workers(context.clone(), config.workers.count, cancel.clone());
    info!("Started {} update workers", config.workers.count);

    let queued = enqueue_all(store.as_ref(), &queue).await?;
    info!("Queued {} watches for an initial check", queued);

    let mut scheduler = None;
    if args.once {
        while queue.active_count().await > 0 {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    } else {
        if config.scheduler.enabled {
            let mut recheck = RecheckScheduler::new(store.clone(), queue.clone(), config.scheduler.clone()).await?;
            recheck.start().await?;
            scheduler = Some(recheck);
        }
        tokio::signal::ctrl_c().await?;
    }

    info!("Shutting down...");
    if let Some(mut recheck) = scheduler {
        recheck.shutdown().await?;
    }
    cancel.cancel();
    futures::future::join_all(workers).await;
    drop(context);
    if tokio::time::timeout(Duration::from_secs(30), delivery).await.is_err() {
        warn!("Notification delivery did not drain in time");
        delivery_cancel.cancel();
    }

    Ok(())
}
