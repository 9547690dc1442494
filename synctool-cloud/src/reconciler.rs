//! Tree diff against the state store.
//!
//! A pass walks the live tree, compares every node with its record and
//! drives the transfer engine to converge the remote store:
//!
//! - new directory: provision a container, record it, sync its subtree fresh
//! - new file: upload, record
//! - tombstoned file that reappeared: re-upload, revive the record
//! - live file with a different mtime: delete the old object, re-upload
//! - recorded live file missing from the walk: delete the object, tombstone
//!
//! Failures are per node. A failed node is reported and retried by the next
//! pass, which re-derives everything from the filesystem and the store.

use crate::config::DeletePolicy;
use crate::error::{CloudError, CloudResult};
use crate::transfer::TransferEngine;
use crate::types::PassReport;
use crate::walker::{self, path_string, TreeNode, Walk};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use synctool_storage::{DirectoryRecord, FileCurrent, FileRecord, StateStore};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default number of concurrent file operations per directory.
pub const DEFAULT_TRANSFER_CONCURRENCY: usize = 6;

/// Whether a subtree is known to be absent from the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Directory was just provisioned; skip lookups.
    Fresh,
    Incremental,
}

#[derive(Debug)]
enum FileOutcome {
    Uploaded,
    Reuploaded,
    Reborn,
    Unchanged,
    Deleted,
}

fn record_outcome(report: &mut PassReport, path: &str, outcome: CloudResult<FileOutcome>) {
    match outcome {
        Ok(FileOutcome::Uploaded) => report.uploaded += 1,
        Ok(FileOutcome::Reuploaded) => report.reuploaded += 1,
        Ok(FileOutcome::Reborn) => report.reborn += 1,
        Ok(FileOutcome::Unchanged) => report.unchanged += 1,
        Ok(FileOutcome::Deleted) => report.deleted += 1,
        Err(e) => {
            warn!("sync of {path} failed: {e}");
            report.failures.push(format!("{path}: {e}"));
        }
    }
}

/// Reconciles one sync root against its state store.
pub struct Reconciler {
    root: PathBuf,
    store: StateStore,
    transfer: Arc<TransferEngine>,
    concurrency: usize,
    delete_policy: DeletePolicy,
    pass_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(root: impl Into<PathBuf>, store: StateStore, transfer: Arc<TransferEngine>) -> Self {
        Self {
            root: root.into(),
            store,
            transfer,
            concurrency: DEFAULT_TRANSFER_CONCURRENCY,
            delete_policy: DeletePolicy::default(),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Initial upload of a root that has never been synced.
    pub async fn first_sync(&self) -> CloudResult<PassReport> {
        let _pass = self.pass_lock.try_lock().map_err(|_| CloudError::PassInProgress)?;

        if let Some(existing) = self.store.root_directory()? {
            return Err(CloudError::AlreadyInitialized(existing.path));
        }

        let walk = walker::walk(&self.root).await?;
        info!("first sync of {}", self.root.display());

        let mut report = PassReport::default();
        let root_record = self.provision_directory(&walk.root, None).await?;
        report.created_dirs += 1;
        self.reconcile_dir(&walk.root, &root_record, Mode::Fresh, &mut report)
            .await;

        info!(
            "first sync finished: {} dirs, {} files, {} failures",
            report.created_dirs,
            report.uploaded,
            report.failures.len()
        );
        Ok(report)
    }

    /// Incremental pass. Provisions the root first if it has no record.
    pub async fn sync(&self) -> CloudResult<PassReport> {
        let _pass = self.pass_lock.try_lock().map_err(|_| CloudError::PassInProgress)?;

        let walk = walker::walk(&self.root).await?;
        let mut report = PassReport::default();

        match self.store.find_directory(&path_string(&walk.root.path))? {
            Some(root_record) => {
                self.reconcile_dir(&walk.root, &root_record, Mode::Incremental, &mut report)
                    .await;
            }
            None => {
                info!("no record for {}, provisioning root", self.root.display());
                let root_record = self.provision_directory(&walk.root, None).await?;
                report.created_dirs += 1;
                self.reconcile_dir(&walk.root, &root_record, Mode::Fresh, &mut report)
                    .await;
            }
        }

        self.detect_deletions(&walk, &mut report).await;

        if report.changes() > 0 || !report.is_clean() {
            info!(
                "sync pass: {} dirs, {} new, {} modified, {} reborn, {} deleted, {} failures",
                report.created_dirs,
                report.uploaded,
                report.reuploaded,
                report.reborn,
                report.deleted,
                report.failures.len()
            );
        } else {
            debug!("sync pass: {} files unchanged", report.unchanged);
        }
        Ok(report)
    }

    fn reconcile_dir<'a>(
        &'a self,
        node: &'a TreeNode,
        dir: &'a DirectoryRecord,
        mode: Mode,
        report: &'a mut PassReport,
    ) -> BoxFuture<'a, ()> {
        async move {
            let children = node.children.as_deref().unwrap_or_default();
            let (subdirs, files): (Vec<&TreeNode>, Vec<&TreeNode>) =
                children.iter().partition(|c| c.is_dir());

            let pending: Vec<BoxFuture<'a, (String, CloudResult<FileOutcome>)>> = files
                .into_iter()
                .map(move |file| {
                    async move {
                        (path_string(&file.path), self.reconcile_file(file, dir, mode).await)
                    }
                    .boxed()
                })
                .collect();
            let outcomes: Vec<(String, CloudResult<FileOutcome>)> = stream::iter(pending)
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
            for (path, outcome) in outcomes {
                record_outcome(report, &path, outcome);
            }

            for child in subdirs {
                match self.resolve_directory(child, dir, mode).await {
                    Ok((record, created)) => {
                        let child_mode = if created {
                            report.created_dirs += 1;
                            Mode::Fresh
                        } else {
                            mode
                        };
                        self.reconcile_dir(child, &record, child_mode, report).await;
                    }
                    Err(e) => {
                        let path = path_string(&child.path);
                        warn!("skipping directory {path}: {e}");
                        report.failures.push(format!("{path}: {e}"));
                    }
                }
            }
        }
        .boxed()
    }

    /// Returns the directory's record and whether it was created now.
    async fn resolve_directory(
        &self,
        node: &TreeNode,
        parent: &DirectoryRecord,
        mode: Mode,
    ) -> CloudResult<(DirectoryRecord, bool)> {
        if mode == Mode::Incremental {
            if let Some(existing) = self.store.find_directory(&path_string(&node.path))? {
                return Ok((existing, false));
            }
        }
        let record = self.provision_directory(node, Some(parent)).await?;
        Ok((record, true))
    }

    async fn provision_directory(
        &self,
        node: &TreeNode,
        parent: Option<&DirectoryRecord>,
    ) -> CloudResult<DirectoryRecord> {
        let container_id = self.transfer.gateway().create_container().await?;
        let record = DirectoryRecord {
            path: path_string(&node.path),
            name: node.name.clone(),
            container_id,
            parent_path: parent.map(|p| p.path.clone()),
        };
        self.store.insert_directory(&record)?;
        debug!("provisioned {} in container {}", record.path, record.container_id);

        // An existing record wins over the container just created.
        Ok(self.store.find_directory(&record.path)?.unwrap_or(record))
    }

    async fn reconcile_file(
        &self,
        node: &TreeNode,
        dir: &DirectoryRecord,
        mode: Mode,
    ) -> CloudResult<FileOutcome> {
        let path = path_string(&node.path);
        let mtime = local_mtime(&node.path).await?;

        let existing = match mode {
            Mode::Fresh => None,
            Mode::Incremental => self.store.find_file(&path)?,
        };

        let Some(record) = existing else {
            let uploaded = self.transfer.upload(&dir.container_id, &node.path).await?;
            self.store.insert_file(&FileRecord {
                path,
                name: node.name.clone(),
                parent_path: dir.path.clone(),
                container_id: dir.container_id.clone(),
                remote_file_id: Some(uploaded.remote_object_id),
                current: Some(FileCurrent {
                    mtime,
                    synced_at: now_ms(),
                }),
                snapshots: Vec::new(),
            })?;
            return Ok(FileOutcome::Uploaded);
        };

        match record.current {
            None => {
                self.reupload(&record, &node.path, mtime).await?;
                Ok(FileOutcome::Reborn)
            }
            Some(current) if current.mtime == mtime => Ok(FileOutcome::Unchanged),
            Some(_) => {
                if let Some(old) = record.remote_file_id.as_deref() {
                    self.delete_remote(&record.container_id, old).await?;
                }
                self.reupload(&record, &node.path, mtime).await?;
                Ok(FileOutcome::Reuploaded)
            }
        }
    }

    async fn reupload(&self, record: &FileRecord, local: &Path, mtime: i64) -> CloudResult<()> {
        let uploaded = self.transfer.upload(&record.container_id, local).await?;
        let current = FileCurrent {
            mtime,
            synced_at: now_ms(),
        };
        if !self
            .store
            .record_upload(&record.path, &uploaded.remote_object_id, current)?
        {
            warn!("record for {} vanished during re-upload", record.path);
            if let Err(e) = self
                .transfer
                .delete(&record.container_id, &uploaded.remote_object_id)
                .await
            {
                warn!("could not remove unrecorded upload of {}: {e}", record.path);
            }
            return Err(CloudError::NotFound(format!("file record {}", record.path)));
        }
        Ok(())
    }

    /// Deletes a superseded object, honouring the delete policy.
    async fn delete_remote(&self, container_id: &str, object_id: &str) -> CloudResult<()> {
        match self.transfer.delete(container_id, object_id).await {
            Ok(()) => Ok(()),
            Err(e) => match self.delete_policy {
                DeletePolicy::BestEffort => {
                    warn!("could not delete {container_id}/{object_id}, continuing: {e}");
                    Ok(())
                }
                DeletePolicy::RequireConfirmed => Err(e),
            },
        }
    }

    /// Tombstones live records under the root that the walk did not see.
    async fn detect_deletions(&self, walk: &Walk, report: &mut PassReport) {
        let records = match self.store.all_files() {
            Ok(records) => records,
            Err(e) => {
                warn!("deletion pass skipped, cannot list file records: {e}");
                report.failures.push(format!("deletion pass: {e}"));
                return;
            }
        };

        let pending: Vec<BoxFuture<'_, (String, CloudResult<FileOutcome>)>> =
            deletion_candidates(records, walk)
                .into_iter()
                .map(move |record| {
                    async move {
                        let outcome = self.tombstone(&record).await;
                        (record.path, outcome)
                    }
                    .boxed()
                })
                .collect();
        let outcomes: Vec<(String, CloudResult<FileOutcome>)> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        for (path, outcome) in outcomes {
            record_outcome(report, &path, outcome);
        }
    }

    async fn tombstone(&self, record: &FileRecord) -> CloudResult<FileOutcome> {
        if let Some(object_id) = record.remote_file_id.as_deref() {
            self.delete_remote(&record.container_id, object_id).await?;
        }
        self.store.update_current(&record.path, None)?;
        debug!("tombstoned {}", record.path);
        Ok(FileOutcome::Deleted)
    }
}

/// Live records under the walked root that the walk did not find.
///
/// Records below a directory the walk could not read are kept: their files
/// are unknown, not gone.
fn deletion_candidates(records: Vec<FileRecord>, walk: &Walk) -> Vec<FileRecord> {
    let live = walk.live_files();
    let root_prefix = dir_prefix(&walk.root.path);
    let unknown: Vec<String> = walk.unreadable.iter().map(|p| dir_prefix(p)).collect();

    records
        .into_iter()
        .filter(|r| {
            r.is_live()
                && r.path.starts_with(&root_prefix)
                && !live.contains(&r.path)
                && !unknown.iter().any(|prefix| r.path.starts_with(prefix))
        })
        .collect()
}

fn dir_prefix(path: &Path) -> String {
    let mut prefix = path_string(path);
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    prefix
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Modification time in epoch milliseconds.
async fn local_mtime(path: &Path) -> CloudResult<i64> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(system_time_ms(modified))
}

fn system_time_ms(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}
