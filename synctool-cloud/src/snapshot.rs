//! Timestamped exports of the state store and restore from them.
//!
//! A snapshot is a standalone DuckDB file `<epoch-ms>.table` in the snapshot
//! directory. Restoring downloads every live file it records, so a snapshot
//! stays restorable only while the remote objects it names still exist.

use crate::error::{CloudError, CloudResult};
use crate::reconciler::DEFAULT_TRANSFER_CONCURRENCY;
use crate::transfer::TransferEngine;
use crate::types::{RestoreReport, SnapshotInfo};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synctool_storage::{FileRecord, StateStore};
use tracing::{debug, info, warn};

const SNAPSHOT_EXTENSION: &str = "table";

/// Parses `<epoch-ms>.table`, ignoring anything else.
pub fn parse_snapshot_name(name: &str) -> Option<i64> {
    let stem = name.strip_suffix(SNAPSHOT_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

pub struct SnapshotManager {
    store: StateStore,
    transfer: Arc<TransferEngine>,
    snapshot_dir: PathBuf,
    concurrency: usize,
}

impl SnapshotManager {
    pub fn new(store: StateStore, transfer: Arc<TransferEngine>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            transfer,
            snapshot_dir: snapshot_dir.into(),
            concurrency: DEFAULT_TRANSFER_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    fn path_for(&self, timestamp: i64) -> PathBuf {
        self.snapshot_dir
            .join(format!("{timestamp}.{SNAPSHOT_EXTENSION}"))
    }

    /// Exports the current records. Two snapshots in the same millisecond
    /// get consecutive timestamps.
    pub async fn snapshot(&self) -> CloudResult<SnapshotInfo> {
        tokio::fs::create_dir_all(&self.snapshot_dir).await?;

        let mut timestamp = Utc::now().timestamp_millis();
        let mut path = self.path_for(timestamp);
        while tokio::fs::try_exists(&path).await? {
            timestamp += 1;
            path = self.path_for(timestamp);
        }

        let store = self.store.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || store.export_to(&target)).await??;

        info!("snapshot {timestamp} written to {}", path.display());
        Ok(SnapshotInfo { timestamp, path })
    }

    /// Snapshots on disk, oldest first.
    pub async fn list_snapshots(&self) -> CloudResult<Vec<SnapshotInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.snapshot_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(timestamp) = parse_snapshot_name(&name.to_string_lossy()) else {
                continue;
            };
            if entry.file_type().await?.is_file() {
                snapshots.push(SnapshotInfo {
                    timestamp,
                    path: entry.path(),
                });
            }
        }
        snapshots.sort();
        Ok(snapshots)
    }

    /// Downloads every live file of a snapshot under `destination`, keeping
    /// paths relative to the snapshot's root.
    pub async fn restore_snapshot(
        &self,
        timestamp: i64,
        destination: &Path,
    ) -> CloudResult<RestoreReport> {
        let path = self.path_for(timestamp);
        if !tokio::fs::try_exists(&path).await? {
            return Err(CloudError::SnapshotNotFound(timestamp));
        }

        let (root, files) = tokio::task::spawn_blocking(move || {
            let snapshot = StateStore::open_read_only(&path)?;
            let root = snapshot.root_directory()?;
            let files = snapshot.all_files()?;
            Ok::<_, CloudError>((root, files))
        })
        .await??;
        let root = root.ok_or_else(|| {
            CloudError::NotFound(format!("root directory record in snapshot {timestamp}"))
        })?;

        let mut report = RestoreReport::default();
        let mut pending = Vec::new();
        for file in files {
            if file.is_live() && file.remote_file_id.is_some() {
                pending.push(file);
            } else {
                debug!("skipping {} (not synced at snapshot time)", file.path);
                report.skipped += 1;
            }
        }

        info!(
            "restoring {} files from snapshot {timestamp} into {}",
            pending.len(),
            destination.display()
        );

        let root_path = PathBuf::from(&root.path);
        let root_path = root_path.as_path();
        let downloads: Vec<BoxFuture<'_, (String, CloudResult<u64>)>> = pending
            .into_iter()
            .map(move |file| {
                async move {
                    let outcome = self.restore_file(&file, root_path, destination).await;
                    (file.path, outcome)
                }
                .boxed()
            })
            .collect();
        let outcomes: Vec<(String, CloudResult<u64>)> = stream::iter(downloads)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (path, outcome) in outcomes {
            match outcome {
                Ok(_) => report.restored += 1,
                Err(e) => {
                    warn!("restore of {path} failed: {e}");
                    report.failures.push(format!("{path}: {e}"));
                }
            }
        }
        Ok(report)
    }

    async fn restore_file(
        &self,
        file: &FileRecord,
        root: &Path,
        destination: &Path,
    ) -> CloudResult<u64> {
        let relative = Path::new(&file.path).strip_prefix(root).map_err(|_| {
            CloudError::NotFound(format!("{} is outside the snapshot root", file.path))
        })?;
        let object_id = file
            .remote_file_id
            .as_deref()
            .ok_or_else(|| CloudError::NotFound(format!("remote object for {}", file.path)))?;
        self.transfer
            .download(&file.container_id, object_id, &destination.join(relative))
            .await
    }
}
