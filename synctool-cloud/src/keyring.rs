//! Per-object secret storage.
//!
//! Every uploaded object is sealed under its own [`FileSecret`]. The keyring
//! maps remote object ids to those secrets; losing an entry makes the object
//! unreadable unless it was published under an announced key.

use crate::error::CloudResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synctool_crypto::FileSecret;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait Keyring: Send + Sync {
    async fn get(&self, object_id: &str) -> CloudResult<Option<FileSecret>>;
    async fn set(&self, object_id: &str, secret: FileSecret) -> CloudResult<()>;
    /// Removes an entry. Removing an absent entry is not an error.
    async fn del(&self, object_id: &str) -> CloudResult<()>;
}

/// Process-local keyring.
#[derive(Clone, Default)]
pub struct MemoryKeyring {
    secrets: Arc<RwLock<HashMap<String, FileSecret>>>,
}

impl MemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.secrets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.secrets.read().await.is_empty()
    }
}

#[async_trait]
impl Keyring for MemoryKeyring {
    async fn get(&self, object_id: &str) -> CloudResult<Option<FileSecret>> {
        Ok(self.secrets.read().await.get(object_id).cloned())
    }

    async fn set(&self, object_id: &str, secret: FileSecret) -> CloudResult<()> {
        self.secrets
            .write()
            .await
            .insert(object_id.to_string(), secret);
        Ok(())
    }

    async fn del(&self, object_id: &str) -> CloudResult<()> {
        self.secrets.write().await.remove(object_id);
        Ok(())
    }
}

#[derive(Default, Serialize, Deserialize)]
struct KeyringFile {
    secrets: BTreeMap<String, FileSecret>,
}

/// Keyring persisted as JSON.
///
/// Every mutation rewrites the whole file through a temporary sibling and a
/// rename, so a crash leaves either the old or the new contents.
pub struct FileKeyring {
    path: PathBuf,
    secrets: RwLock<BTreeMap<String, FileSecret>>,
}

impl FileKeyring {
    /// Loads the keyring at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> CloudResult<Self> {
        let path = path.into();
        let secrets = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<KeyringFile>(&raw)?.secrets,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("loaded {} keyring entries from {}", secrets.len(), path.display());
        Ok(Self {
            path,
            secrets: RwLock::new(secrets),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.secrets.read().await.len()
    }

    async fn persist(&self, secrets: &BTreeMap<String, FileSecret>) -> CloudResult<()> {
        let body = serde_json::to_vec_pretty(&KeyringFile {
            secrets: secrets.clone(),
        })?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Keyring for FileKeyring {
    async fn get(&self, object_id: &str) -> CloudResult<Option<FileSecret>> {
        Ok(self.secrets.read().await.get(object_id).cloned())
    }

    async fn set(&self, object_id: &str, secret: FileSecret) -> CloudResult<()> {
        let mut secrets = self.secrets.write().await;
        secrets.insert(object_id.to_string(), secret);
        self.persist(&secrets).await
    }

    async fn del(&self, object_id: &str) -> CloudResult<()> {
        let mut secrets = self.secrets.write().await;
        if secrets.remove(object_id).is_some() {
            self.persist(&secrets).await?;
        }
        Ok(())
    }
}
