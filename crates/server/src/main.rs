mod app;
mod metrics;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use harvester_core::config::LoggingConfig;
use harvester_core::{load_config, validate_config, SanitizedConfig};

use app::App;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("HARVESTER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration before logging so the filter can come from it
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&LoggingConfig::default());
            return Err(e).with_context(|| format!("Failed to load config from {:?}", config_path));
        }
    };

    init_logging(&config.logging);
    info!("Loaded configuration from {:?}", config_path);

    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = SanitizedConfig::from(&config);
    info!(
        config = %serde_json::to_string(&sanitized).unwrap_or_default(),
        "Configuration validated"
    );

    // Compute config hash for history
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let mut app = App::build(config).context("Failed to build service")?;
    app.start(VERSION, config_hash_short);

    serve_until_shutdown(&app, &config_path).await;

    info!("Service shutting down...");
    app.shutdown("graceful_shutdown").await;
    info!("Service stopped");

    Ok(())
}

/// RUST_LOG wins over the configured filter.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Reload the configuration on SIGHUP until a shutdown signal arrives.
async fn serve_until_shutdown(app: &App, config_path: &Path) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    #[cfg(unix)]
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => Some(hangup),
        Err(e) => {
            warn!(error = %e, "Failed to install SIGHUP handler, reload disabled");
            None
        }
    };

    loop {
        #[cfg(unix)]
        let reload = async {
            let received = match hangup.as_mut() {
                Some(hangup) => hangup.recv().await.is_some(),
                None => false,
            };
            if !received {
                std::future::pending::<()>().await;
            }
        };
        #[cfg(not(unix))]
        let reload = std::future::pending::<()>();

        tokio::select! {
            _ = &mut shutdown => return,
            _ = reload => reload_config(app, config_path),
        }
    }
}

/// A failed reload keeps the running configuration.
fn reload_config(app: &App, config_path: &Path) {
    info!("Reloading configuration from {:?}", config_path);
    let result = load_config(config_path)
        .map_err(anyhow::Error::from)
        .and_then(|config| app.reload(config));
    if let Err(e) = result {
        error!("Configuration reload failed: {:#}", e);
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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
