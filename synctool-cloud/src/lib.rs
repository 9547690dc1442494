//! Sync engine for synctool.
//!
//! Mirrors a local directory tree onto a remote object store:
//! - Tree walker producing a fresh snapshot of the filesystem each pass
//! - Reconciler diffing that tree against the DuckDB state store
//! - Transfer engine encrypting each file under its own secret
//! - Snapshot exports of the state store and restore from them
//! - Driver running passes and snapshots on timers
//!
//! The remote store and the secret keyring are traits ([`RemoteGateway`],
//! [`Keyring`]); [`S3Gateway`], [`MemoryKeyring`] and [`FileKeyring`] are
//! the shipped implementations.

pub mod config;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod keyring;
pub mod reconciler;
pub mod s3_gateway;
pub mod snapshot;
pub mod telemetry;
pub mod transfer;
pub mod types;
pub mod walker;

pub use config::{DeletePolicy, RemoteConfig, SyncConfig};
pub use driver::{create_sync_driver, SyncDriver, SyncHandle};
pub use error::{CloudError, CloudResult};
pub use gateway::RemoteGateway;
pub use keyring::{FileKeyring, Keyring, MemoryKeyring};
pub use reconciler::Reconciler;
pub use s3_gateway::S3Gateway;
pub use snapshot::SnapshotManager;
pub use transfer::TransferEngine;
pub use types::*;

use std::sync::Arc;
use synctool_storage::StateStore;

/// Opens the state store for `config` and wires a reconciler and snapshot
/// manager over the given collaborators.
pub fn open_sync_root(
    config: &SyncConfig,
    gateway: Arc<dyn RemoteGateway>,
    keyring: Arc<dyn Keyring>,
) -> CloudResult<(Arc<Reconciler>, Arc<SnapshotManager>)> {
    config.validate()?;
    let store = StateStore::open(&config.state_path())?;
    let transfer = Arc::new(TransferEngine::new(gateway, keyring, config.staging_dir()));

    let reconciler = Reconciler::new(config.sync_root.clone(), store.clone(), transfer.clone())
        .with_concurrency(config.transfer_concurrency)
        .with_delete_policy(config.delete_policy);
    let snapshots = SnapshotManager::new(store, transfer, config.snapshot_dir())
        .with_concurrency(config.transfer_concurrency);

    Ok((Arc::new(reconciler), Arc::new(snapshots)))
}
