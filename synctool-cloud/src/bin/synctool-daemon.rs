//! Long-running sync daemon.
//!
//! Reads a JSON [`SyncConfig`] from `$SYNCTOOL_CONFIG` (default
//! `synctool.json`), syncs once at startup, then keeps syncing on the
//! configured interval until Ctrl-C.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use synctool_cloud::{
    create_sync_driver, open_sync_root, telemetry, FileKeyring, S3Gateway, SyncConfig,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let config_path = std::env::var_os("SYNCTOOL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("synctool.json"));
    let config = SyncConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let gateway = S3Gateway::connect(&config.remote)
        .await
        .context("connecting to the remote store")?;
    let keyring = FileKeyring::open(config.keyring_path())
        .await
        .context("opening keyring")?;
    let (reconciler, snapshots) = open_sync_root(&config, Arc::new(gateway), Arc::new(keyring))
        .context("opening sync root")?;

    let (handle, mut driver) = create_sync_driver(
        reconciler,
        snapshots,
        config.sync_interval(),
        config.snapshot_interval(),
    );
    let driver_task = tokio::spawn(async move { driver.run().await });

    match handle.sync_now().await {
        Ok(report) => info!(
            "initial pass: {} changes, {} failures",
            report.changes(),
            report.failures.len()
        ),
        Err(e) => warn!("initial pass failed: {e}"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down");
    handle.stop().await?;
    driver_task.await?;
    Ok(())
}
