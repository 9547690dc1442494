//! Periodic sync driver.
//!
//! Runs reconciler passes on a fixed timer, optional snapshots on a second
//! timer, and on-demand commands from a [`SyncHandle`]. Passes run inline in
//! the loop, so the driver itself never overlaps two passes.

use crate::error::{CloudError, CloudResult};
use crate::reconciler::Reconciler;
use crate::snapshot::SnapshotManager;
use crate::types::{PassReport, SnapshotInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Commands accepted by a running driver.
#[derive(Debug)]
pub enum SyncCommand {
    SyncNow(oneshot::Sender<CloudResult<PassReport>>),
    Snapshot(oneshot::Sender<CloudResult<SnapshotInfo>>),
    Stop,
}

/// Handle for sending commands to the driver.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    /// Runs a pass now and waits for its report.
    pub async fn sync_now(&self) -> CloudResult<PassReport> {
        let (reply, rx) = oneshot::channel();
        self.send(SyncCommand::SyncNow(reply)).await?;
        rx.await.map_err(|_| CloudError::DriverStopped)?
    }

    pub async fn snapshot(&self) -> CloudResult<SnapshotInfo> {
        let (reply, rx) = oneshot::channel();
        self.send(SyncCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| CloudError::DriverStopped)?
    }

    pub async fn stop(&self) -> CloudResult<()> {
        self.send(SyncCommand::Stop).await
    }

    async fn send(&self, command: SyncCommand) -> CloudResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| CloudError::DriverStopped)
    }
}

pub struct SyncDriver {
    reconciler: Arc<Reconciler>,
    snapshots: Arc<SnapshotManager>,
    command_rx: mpsc::Receiver<SyncCommand>,
    sync_interval: Duration,
    snapshot_interval: Option<Duration>,
}

/// Creates a driver and its command handle.
pub fn create_sync_driver(
    reconciler: Arc<Reconciler>,
    snapshots: Arc<SnapshotManager>,
    sync_interval: Duration,
    snapshot_interval: Option<Duration>,
) -> (SyncHandle, SyncDriver) {
    let (command_tx, command_rx) = mpsc::channel(16);
    let driver = SyncDriver {
        reconciler,
        snapshots,
        command_rx,
        sync_interval,
        snapshot_interval,
    };
    (SyncHandle { command_tx }, driver)
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl SyncDriver {
    /// Runs until [`SyncHandle::stop`] is called or every handle is dropped.
    pub async fn run(&mut self) {
        info!(
            "sync driver started for {} (every {:?})",
            self.reconciler.root().display(),
            self.sync_interval
        );

        let mut sync_timer = ticker(self.sync_interval);
        let mut snapshot_timer = self.snapshot_interval.map(ticker);

        // Skip first immediate tick
        sync_timer.tick().await;
        if let Some(timer) = snapshot_timer.as_mut() {
            timer.tick().await;
        }

        loop {
            tokio::select! {
                _ = sync_timer.tick() => {
                    self.run_pass().await;
                }
                _ = next_tick(&mut snapshot_timer) => {
                    if let Err(e) = self.snapshots.snapshot().await {
                        error!("scheduled snapshot failed: {e}");
                    }
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SyncCommand::SyncNow(reply)) => {
                            let result = self.reconciler.sync().await;
                            if let Err(e) = &result {
                                warn!("requested sync pass failed: {e}");
                            }
                            let _ = reply.send(result);
                        }
                        Some(SyncCommand::Snapshot(reply)) => {
                            let _ = reply.send(self.snapshots.snapshot().await);
                        }
                        Some(SyncCommand::Stop) => {
                            info!("sync driver stopping");
                            break;
                        }
                        None => {
                            info!("command channel closed, stopping sync driver");
                            break;
                        }
                    }
                }
            }
        }

        info!("sync driver stopped");
    }

    async fn run_pass(&self) {
        match self.reconciler.sync().await {
            Ok(report) if report.is_clean() => {
                debug!("scheduled pass finished with {} changes", report.changes());
            }
            Ok(report) => {
                warn!(
                    "scheduled pass finished with {} failures",
                    report.failures.len()
                );
            }
            Err(CloudError::PassInProgress) => {
                debug!("scheduled pass skipped, another pass is running");
            }
            Err(e) => error!("scheduled pass failed: {e}"),
        }
    }
}
