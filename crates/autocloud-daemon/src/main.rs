//! AutoCloud Daemon - Background mirroring service
//!
//! This binary runs as a user service and:
//! - Loads and validates the YAML configuration
//! - Indexes and watches every configured folder
//! - Mirrors them onto the remote store on a fixed period
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! All collaborators are built here and handed to the
//! [`SyncOrchestrator`], whose loop is controlled by a `CancellationToken`
//! that is triggered on receipt of SIGTERM or SIGINT.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use autocloud_core::config::{Config, LoggingConfig};
use autocloud_core::ports::ILocalFileSystem;
use autocloud_sync::cache::MirrorCache;
use autocloud_sync::connection::ConnectionManager;
use autocloud_sync::filesystem::LocalFileSystemAdapter;
use autocloud_sync::indexer::LocalIndexer;
use autocloud_sync::orchestrator::{SyncOptions, SyncOrchestrator};
use autocloud_sync::remote_dir::MountedDirectoryStorage;
use autocloud_sync::tracker::LocalTracker;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configuration file location
const CONFIG_ENV: &str = "AUTOCLOUD_CONFIG";

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the configuration and the shutdown token
struct DaemonService {
    config: Config,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: Config, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    /// Wires the adapters and runs the sync loop until shutdown
    async fn run(&self) -> Result<()> {
        let mut orchestrator = self.build_orchestrator().await?;

        if let Err(e) = orchestrator.initialize().await {
            // The loop retries initialization at the start of every cycle.
            warn!(error = %e, "Initial mirror build failed");
        }

        orchestrator.run(self.shutdown.clone()).await;
        Ok(())
    }

    async fn build_orchestrator(&self) -> Result<SyncOrchestrator> {
        let config = &self.config;
        let fs: Arc<dyn ILocalFileSystem> = Arc::new(LocalFileSystemAdapter::new());
        let indexer = LocalIndexer::new(
            Arc::clone(&fs),
            config.local.path_filter(),
            config.sync.max_depth,
        );

        let mut trackers = Vec::with_capacity(config.local.watched_folders.len());
        for folder in &config.local.watched_folders {
            match LocalTracker::start(folder, indexer.clone(), config.sync.local_refresh).await {
                Ok(tracker) => trackers.push(tracker),
                Err(e) => error!(folder = %folder.display(), error = %e, "Cannot track folder"),
            }
        }
        if trackers.is_empty() {
            bail!("none of the watched folders could be tracked");
        }

        let storage = Arc::new(MountedDirectoryStorage::new(
            config.remote.mount_point.clone(),
        ));
        let connection = Arc::new(
            ConnectionManager::new(
                storage,
                config.remote.credentials(),
                config.remote.root_folder.clone(),
            )
            .with_retry_delay(Duration::from_secs(config.sync.reconnect_delay)),
        );

        info!(
            folders = trackers.len(),
            remote_root = %connection.remote_root(),
            mount_point = %config.remote.mount_point.display(),
            "Sync services ready"
        );

        Ok(SyncOrchestrator::new(
            trackers,
            connection,
            fs,
            MirrorCache::in_dir(&config.cache.dir),
            SyncOptions::from(&config.sync),
        ))
    }
}

// ============================================================================
// Configuration and logging
// ============================================================================

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

/// Loads and validates the configuration; any problem is fatal
fn load_config(path: &PathBuf) -> Result<Config> {
    let config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!(
            "Invalid configuration in {}:\n  {}",
            path.display(),
            details.join("\n  ")
        );
    }
    Ok(config)
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = load_config(&path)?;
    init_tracing(&config.logging);

    info!(config_path = %path.display(), "AutoCloud daemon starting (autocloudd)");

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token);
    let result = service.run().await;

    match &result {
        Ok(()) => info!("AutoCloud daemon shut down gracefully"),
        Err(e) => error!(error = %e, "AutoCloud daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
