//! Earthquake alert daemon.
//! Polls the configured sources, fans new quakes out to linked channels,
//! keeps rolling store backups, and serves the operator HTTP surface.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tremor_watch::api::{self, AppState};
use tremor_watch::backup::{spawn_retention_task, BackupManager};
use tremor_watch::config::AppConfig;
use tremor_watch::dispatch::Dispatcher;
use tremor_watch::ingest::providers::{phivolcs::PhivolcsProvider, usgs::UsgsProvider};
use tremor_watch::ingest::types::{QuakeProvider, SourceKind};
use tremor_watch::ingest::Feed;
use tremor_watch::metrics::Metrics;
use tremor_watch::notify::{discord::DiscordNotifier, map::StaticMap, Notifier};
use tremor_watch::pipeline::Pipeline;
use tremor_watch::scheduler::Scheduler;
use tremor_watch::store::{backend::JsonFileBackend, Store};

/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tremor_watch=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn build_feeds(cfg: &AppConfig, client: &reqwest::Client) -> Result<Vec<Feed>> {
    let mut feeds = Vec::with_capacity(cfg.sources.len());
    for kind in &cfg.sources {
        let provider: Box<dyn QuakeProvider> = match kind {
            SourceKind::Phivolcs => Box::new(PhivolcsProvider::new(cfg.fetch_timeout)?),
            SourceKind::Usgs => Box::new(UsgsProvider::new(client.clone())),
        };
        feeds.push(Feed::new(provider, cfg.fetch_timeout));
    }
    Ok(feeds)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load()?;
    let unset = AppConfig::unset_optional(|k| std::env::var(k).ok());
    if !unset.is_empty() {
        tracing::warn!(vars = %unset.join(", "), "optional variables not set; using config file or defaults");
    }

    let metrics = Metrics::init()?;

    let store = Arc::new(
        Store::open(JsonFileBackend::new(&cfg.db_path), cfg.tracked_cap)
            .await
            .with_context(|| format!("opening store at {}", cfg.db_path.display()))?,
    );
    let stats = store.stats().await;
    tracing::info!(
        path = %stats.location,
        guilds = stats.guilds,
        tracked = stats.tracked_quakes,
        "store ready"
    );

    let notifier: Arc<dyn Notifier> = Arc::new(
        DiscordNotifier::new(cfg.discord_token.clone())
            .with_delivery_budget(cfg.delivery_timeout)
            .with_map(StaticMap::from_token(cfg.mapbox_token.clone())),
    );
    let dispatcher = Dispatcher::new(store.clone(), notifier, cfg.delivery_timeout);
    let client = reqwest::Client::builder()
        .timeout(cfg.fetch_timeout)
        .build()
        .context("building http client")?;
    let pipeline = Arc::new(Pipeline::new(
        build_feeds(&cfg, &client)?,
        store.clone(),
        dispatcher,
        cfg.lookback,
    ));
    let scheduler = Scheduler::new(pipeline);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = scheduler.spawn(cfg.poll_interval, shutdown_rx.clone());
    let backups = spawn_retention_task(
        BackupManager::new(&cfg.db_path, &cfg.backup_dir),
        cfg.backup_keep,
        cfg.backup_interval,
        shutdown_rx,
    );

    let global: Arc<dyn QuakeProvider> = Arc::new(UsgsProvider::global(client));
    let state = AppState::new(scheduler, cfg.trigger_cooldown_secs).with_global(global);
    let app = api::router(state).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    tracing::info!(addr = %cfg.listen_addr, "admin surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    let _ = shutdown_tx.send(true);
    for (name, handle) in [("poller", poller), ("backups", backups)] {
        if let Err(e) = handle.await {
            tracing::warn!(task = name, error = %e, "background task ended abnormally");
        }
    }
    tracing::info!("stopped");
    Ok(())
}
