//! Sync engine configuration.

use crate::error::{CloudError, CloudResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the reserved directory holding engine state inside a sync root.
pub const STATE_DIR_NAME: &str = ".synctool";

/// What a pass does when deleting a superseded remote object fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Log the failure and tombstone or re-upload anyway. The orphaned
    /// remote object is never retried.
    #[default]
    BestEffort,
    /// Leave the record untouched so the next pass retries the delete.
    RequireConfirmed,
}

/// Configuration for one synchronized root.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory mirrored to the remote store.
    pub sync_root: PathBuf,

    /// Overrides `<sync_root>/.synctool`.
    pub state_dir: Option<PathBuf>,

    /// Seconds between reconciler passes.
    pub sync_interval_secs: u64,

    /// Seconds between automatic snapshots; `None` disables them.
    pub snapshot_interval_secs: Option<u64>,

    /// Maximum concurrent file operations within one directory.
    pub transfer_concurrency: usize,

    pub delete_policy: DeletePolicy,

    pub remote: RemoteConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_root: PathBuf::new(),
            state_dir: None,
            sync_interval_secs: 10,
            snapshot_interval_secs: None,
            transfer_concurrency: 6,
            delete_policy: DeletePolicy::default(),
            remote: RemoteConfig::default(),
        }
    }
}

/// Where the remote object store lives and how to authenticate to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Endpoint override (MinIO, LocalStack). `None` uses AWS.
    pub endpoint_url: Option<String>,

    pub region: String,

    /// JSON file with static credentials. `None` falls back to the default
    /// AWS provider chain.
    pub credentials_path: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: "us-east-1".to_string(),
            credentials_path: None,
        }
    }
}

impl SyncConfig {
    /// Config with defaults for the given root.
    pub fn for_root(sync_root: impl Into<PathBuf>) -> Self {
        Self {
            sync_root: sync_root.into(),
            ..Self::default()
        }
    }

    /// Loads and validates a JSON config file.
    pub fn load(path: &Path) -> CloudResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CloudResult<()> {
        if self.sync_root.as_os_str().is_empty() {
            return Err(CloudError::Config("sync_root must be set".into()));
        }
        if self.sync_interval_secs == 0 {
            return Err(CloudError::Config("sync_interval_secs must be positive".into()));
        }
        if self.snapshot_interval_secs == Some(0) {
            return Err(CloudError::Config(
                "snapshot_interval_secs must be positive when set".into(),
            ));
        }
        if self.transfer_concurrency == 0 {
            return Err(CloudError::Config("transfer_concurrency must be positive".into()));
        }
        if self.remote.region.is_empty() {
            return Err(CloudError::Config("remote.region must be set".into()));
        }
        if let Some(state_dir) = &self.state_dir {
            let reserved = self.sync_root.join(STATE_DIR_NAME);
            if state_dir.starts_with(&self.sync_root) && !state_dir.starts_with(&reserved) {
                return Err(CloudError::Config(format!(
                    "state_dir {} is inside sync_root; use {} or a path outside it",
                    state_dir.display(),
                    reserved.display()
                )));
            }
        }
        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.sync_root.join(STATE_DIR_NAME))
    }

    /// The DuckDB state store file.
    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join("state")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.state_dir().join("snapshots")
    }

    /// Where uploads stage their encrypted copies.
    pub fn staging_dir(&self) -> PathBuf {
        self.state_dir().join("staging")
    }

    pub fn keyring_path(&self) -> PathBuf {
        self.state_dir().join("keyring.json")
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn snapshot_interval(&self) -> Option<Duration> {
        self.snapshot_interval_secs.map(Duration::from_secs)
    }
}
