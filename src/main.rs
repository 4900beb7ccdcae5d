// src/main.rs

use anyhow::{Context, Result};
use drover::config::Config;
use drover::core::state::ServerState;
use drover::core::store::snapshot;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        region = %config.region,
        "starting drover server"
    );

    let snapshot_path = PathBuf::from(&config.persistence.data_dir).join("state.snap");
    let snapshot_on_shutdown = config.persistence.snapshot_on_shutdown;
    std::fs::create_dir_all(&config.persistence.data_dir)
        .with_context(|| format!("failed to create data dir '{}'", config.persistence.data_dir))?;

    let init = ServerState::initialize(config).context("failed to initialize server state")?;
    let state = init.state.clone();

    if snapshot_path.exists() {
        snapshot::restore(&state.store, &snapshot_path).context("failed to restore snapshot")?;
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = drover::server::spawn(init, &shutdown_tx);

    // A single-server deployment leads immediately; in a cluster this signal
    // comes from the raft election.
    state.raft.set_leader(true);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "background task did not stop cleanly");
        }
    }

    if snapshot_on_shutdown {
        snapshot::persist(&state.store, &snapshot_path).context("failed to persist snapshot")?;
    }

    info!("drover server stopped");
    Ok(())
}
