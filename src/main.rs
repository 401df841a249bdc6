use std::path::PathBuf;
use std::sync::Arc;

use care_monitor::config::{self, EngineConfig};
use care_monitor::db::SqliteStore;
use care_monitor::monitor::{MonitorEngine, MonitorError};

/// Config path from the first argument, else `CARE_MONITOR_CONFIG`.
fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(config::CONFIG_ENV).map(PathBuf::from))
}

fn database_path() -> PathBuf {
    std::env::var_os(config::DATABASE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(config::default_database_path)
}

async fn run() -> Result<(), MonitorError> {
    let engine_config = match config_path() {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            EngineConfig::from_path(&path)?
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            EngineConfig::default()
        }
    };

    let db_path = database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %db_path.display(), "Opening database");
    let store = SqliteStore::open(&db_path)?;
    store.set_busy_timeout(engine_config.store_timeout())?;
    let store = Arc::new(store);

    let engine = MonitorEngine::from_config(store, engine_config)?;
    engine.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    engine.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    care_monitor::init_tracing();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    if let Err(e) = run().await {
        tracing::error!(error = %e, "care-monitor exited with an error");
        std::process::exit(1);
    }
}
