use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamgrab_core::{
    load_config, validate_config, CaptureAdapter, Config, ConfigError, DownloadScheduler,
    EventBroadcaster, FallbackResolver, HttpCapture, HttpTransfer, JobRegistry, JobRunner,
    JobStore, SqliteJobStore, TransferAdapter,
};
use streamgrab_server::api::create_router;
use streamgrab_server::state::AppState;

/// Environment variable overriding the config file location
const CONFIG_PATH_ENV: &str = "STREAMGRAB_CONFIG";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration; a missing default file means built-in defaults
    info!("Loading configuration from {:?}", config_path);
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound(path)) if std::env::var(CONFIG_PATH_ENV).is_err() => {
            warn!("No config file at {}, using defaults", path);
            Config::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to load config from {:?}", config_path))
        }
    };

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Download directory: {:?}", config.orchestrator.download_dir);
    info!(
        "Max concurrent downloads: {}",
        config.scheduler.max_concurrent_downloads
    );

    // Create SQLite job store
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    // Registry and event fan-out
    let events = EventBroadcaster::new(config.events.buffer_size);
    let registry = JobRegistry::new(store, events.clone());

    // Adapters and resolver
    let capture: Arc<dyn CaptureAdapter> = Arc::new(HttpCapture::new());
    let transfer: Arc<dyn TransferAdapter> = Arc::new(HttpTransfer::new());
    info!(
        "Using capture adapter '{}' and transfer adapter '{}'",
        capture.name(),
        transfer.name()
    );
    let resolver = Arc::new(FallbackResolver::new(
        capture,
        transfer,
        config.resolver.clone(),
    ));

    // Scheduler
    let runner = JobRunner::new(registry, resolver, config.orchestrator.clone());
    let scheduler = DownloadScheduler::new(config.scheduler.clone(), runner);
    scheduler
        .start()
        .context("Failed to start download scheduler")?;
    info!("Download scheduler started");

    // Create app state and router
    let state = Arc::new(AppState::new(config.clone(), scheduler.clone(), events));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping download scheduler...");
    scheduler.stop().await;
    info!("Server shut down");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
