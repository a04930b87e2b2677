use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize};
use telemetry_sync::*;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    if app_config.history.persistence {
        let store = kv_store::SqliteKvStore::connect(
            &app_config.history.database_path,
            app_config.history.max_pool_size,
        )
        .await?;
        store.init().await?;
        run(app_config, Arc::new(store)).await
    } else {
        tracing::info!("history persistence disabled; keeping series in memory");
        run(app_config, Arc::new(kv_store::MemoryKvStore::default())).await
    }
}

async fn run<S: kv_store::KvStore>(app_config: config::AppConfig, store: Arc<S>) -> Result<()> {
    let registry = Arc::new(registry::TargetRegistry::new(app_config.targets.clone())?);
    let fetcher = Arc::new(fetch::HttpFetcher::new()?);
    let deduper = fetch::RequestDeduper::new(fetcher);

    let series_persisted_total = Arc::new(AtomicU64::new(0));
    let (write_tx, write_rx) =
        mpsc::channel(history_store::writer_channel_capacity(registry.len()));
    let writer_handle = history_store::spawn_history_writer(
        write_rx,
        store.clone(),
        history_store::HistoryWriterConfig {
            flush_rate: app_config.history.flush_rate,
            flush_interval: Duration::from_secs(app_config.history.flush_interval_secs),
        },
        series_persisted_total.clone(),
    );

    let mut history = history_store::HistoryStore::new(
        store,
        app_config.history.capacity,
        app_config.history.persist_every,
        Some(write_tx),
    );
    let restored = history.restore(registry.ids()).await;
    tracing::info!(targets = registry.len(), restored_series = restored, "history restored");

    let (patch_tx, _) = broadcast::channel(app_config.publishing.broadcast_capacity);
    let view = view::BroadcastView::new(patch_tx);
    let (visibility_tx, visibility_rx) = watch::channel(true);
    let (command_tx, command_rx) = mpsc::channel(64);
    let (engine_shutdown_tx, engine_shutdown_rx) = oneshot::channel();

    let engine_handle = scheduler::spawn(
        scheduler::EngineDeps {
            registry: registry.clone(),
            deduper: deduper.clone(),
            history,
            view: view.clone(),
            visibility_rx,
            command_rx,
            shutdown_rx: engine_shutdown_rx,
            series_persisted_total,
        },
        scheduler::EngineConfig::from_app(&app_config),
    );

    let (board_tx, board_rx) = badges::badge_board(&registry);
    let (badge_shutdown_tx, badge_shutdown_rx) = oneshot::channel();
    let badge_handle = app_config.badges.enabled.then(|| {
        badges::spawn_badge_watcher(
            registry.clone(),
            deduper,
            board_tx,
            badges::BadgeWatcherConfig {
                interval: Duration::from_millis(app_config.badges.interval_ms),
                timeout: Duration::from_millis(app_config.badges.timeout_ms),
            },
            badge_shutdown_rx,
        )
    });

    let app = routes::app(routes::RouteDeps {
        view,
        registry,
        commands: command_tx,
        foreground: Arc::new(routes::ForegroundTracker::new(visibility_tx)),
        badges: board_rx,
        ws_connections: Arc::new(AtomicUsize::new(0)),
    });
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
        }
    }

    let _ = badge_shutdown_tx.send(());
    if let Some(handle) = badge_handle {
        let _ = handle.await;
    }
    // Engine teardown hands the latest series to the writer and drops its sender,
    // which lets the writer flush and exit.
    let _ = engine_shutdown_tx.send(());
    let _ = engine_handle.await;
    let _ = writer_handle.await;
    Ok(())
}
