//! Shared helpers for sync engine integration tests.
//!
//! `FakeGateway` keeps every container in memory, logs each call and can be
//! told to fail puts, deletes or streams.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;
use synctool_cloud::{
    CloudError, CloudResult, DeletePolicy, MemoryKeyring, ObjectStream, Reconciler,
    RemoteGateway, SnapshotManager, StoredObject, TransferDirection, TransferEngine,
    TransferToken,
};
use synctool_storage::StateStore;
use tempfile::TempDir;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateContainer(String),
    Token(String),
    Put { container: String, object: String },
    Get { container: String, object: String },
    Delete { container: String, object: String },
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    containers: HashMap<String, HashMap<String, Vec<u8>>>,
    announced: HashMap<String, Vec<u8>>,
    calls: Vec<Call>,
    failing_puts: HashSet<String>,
    failing_streams: HashSet<String>,
    fail_deletes: bool,
    fail_containers: bool,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Rejects uploads of files with this name.
    pub fn fail_put_for(&self, file_name: &str) {
        self.state().failing_puts.insert(file_name.to_string());
    }

    pub fn clear_put_failures(&self) {
        self.state().failing_puts.clear();
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    pub fn set_fail_containers(&self, fail: bool) {
        self.state().fail_containers = fail;
    }

    /// Makes the stream of `object_id` error after its first bytes.
    pub fn break_stream(&self, object_id: &str) {
        self.state().failing_streams.insert(object_id.to_string());
    }

    pub fn announce_key(&self, object_id: &str, public_key: &[u8]) {
        self.state()
            .announced
            .insert(object_id.to_string(), public_key.to_vec());
    }

    /// Stores raw bytes as a new object, bypassing the transfer engine.
    pub fn insert_object(&self, container_id: &str, bytes: Vec<u8>) -> String {
        let mut state = self.state();
        state.next_id += 1;
        let object_id = format!("obj-{}", state.next_id);
        state
            .containers
            .entry(container_id.to_string())
            .or_default()
            .insert(object_id.clone(), bytes);
        object_id
    }

    /// Stores raw bytes under a caller-chosen object id.
    pub fn insert_object_as(&self, container_id: &str, object_id: &str, bytes: Vec<u8>) {
        self.state()
            .containers
            .entry(container_id.to_string())
            .or_default()
            .insert(object_id.to_string(), bytes);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    pub fn object_count(&self) -> usize {
        self.state().containers.values().map(HashMap::len).sum()
    }

    pub fn has_object(&self, container_id: &str, object_id: &str) -> bool {
        self.state()
            .containers
            .get(container_id)
            .is_some_and(|c| c.contains_key(object_id))
    }

    pub fn object_bytes(&self, container_id: &str, object_id: &str) -> Option<Vec<u8>> {
        self.state()
            .containers
            .get(container_id)
            .and_then(|c| c.get(object_id).cloned())
    }

    pub fn put_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Put { .. }))
            .count()
    }

    pub fn delete_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Delete { .. }))
            .count()
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn create_container(&self) -> CloudResult<String> {
        let mut state = self.state();
        if state.fail_containers {
            return Err(CloudError::Remote("container quota exhausted".into()));
        }
        state.next_id += 1;
        let id = format!("bucket-{}", state.next_id);
        state.containers.insert(id.clone(), HashMap::new());
        state.calls.push(Call::CreateContainer(id.clone()));
        Ok(id)
    }

    async fn create_transfer_token(
        &self,
        container_id: &str,
        direction: TransferDirection,
    ) -> CloudResult<TransferToken> {
        let mut state = self.state();
        if !state.containers.contains_key(container_id) {
            return Err(CloudError::NotFound(format!("container {container_id}")));
        }
        state.calls.push(Call::Token(container_id.to_string()));
        Ok(TransferToken {
            token: format!("token-{container_id}"),
            container_id: container_id.to_string(),
            direction,
            object_id: None,
            expires_at: Utc::now() + Duration::minutes(5),
        })
    }

    async fn put_object(
        &self,
        container_id: &str,
        _token: &TransferToken,
        encrypted_path: &Path,
    ) -> CloudResult<StoredObject> {
        let bytes = std::fs::read(encrypted_path)?;
        // Staging files are named `<uuid>.<source name>.crypt`.
        let source_name = encrypted_path
            .file_name()
            .map(|n| n.to_string_lossy().trim_end_matches(".crypt").to_string())
            .and_then(|n| n.split_once('.').map(|(_, source)| source.to_string()))
            .unwrap_or_default();

        let mut state = self.state();
        if state.failing_puts.contains(&source_name) {
            return Err(CloudError::Remote(format!("upload of {source_name} refused")));
        }
        state.next_id += 1;
        let object_id = format!("obj-{}", state.next_id);
        let size = bytes.len() as u64;
        state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| CloudError::NotFound(format!("container {container_id}")))?
            .insert(object_id.clone(), bytes);
        state.calls.push(Call::Put {
            container: container_id.to_string(),
            object: object_id.clone(),
        });
        Ok(StoredObject {
            object_id,
            size,
            etag: None,
        })
    }

    async fn get_object_stream(
        &self,
        container_id: &str,
        object_id: &str,
        _exclude: &[String],
    ) -> CloudResult<ObjectStream> {
        let mut state = self.state();
        state.calls.push(Call::Get {
            container: container_id.to_string(),
            object: object_id.to_string(),
        });
        let bytes = state
            .containers
            .get(container_id)
            .and_then(|c| c.get(object_id).cloned())
            .ok_or_else(|| CloudError::NotFound(format!("{container_id}/{object_id}")))?;
        let length = bytes.len() as u64;
        let announced_key = state.announced.get(object_id).cloned();

        let mut pieces: Vec<CloudResult<Vec<u8>>> =
            bytes.chunks(1000).map(|c| Ok(c.to_vec())).collect();
        if state.failing_streams.contains(object_id) {
            pieces.truncate(1);
            pieces.push(Err(CloudError::Remote("connection reset by mirror".into())));
        }

        Ok(ObjectStream {
            length: Some(length),
            announced_key,
            body: Box::pin(futures::stream::iter(pieces)),
        })
    }

    async fn delete_object(&self, container_id: &str, object_id: &str) -> CloudResult<()> {
        let mut state = self.state();
        if state.fail_deletes {
            return Err(CloudError::Remote(format!("delete of {object_id} timed out")));
        }
        state.calls.push(Call::Delete {
            container: container_id.to_string(),
            object: object_id.to_string(),
        });
        state
            .containers
            .get_mut(container_id)
            .and_then(|c| c.remove(object_id))
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("{container_id}/{object_id}")))
    }
}

/// A sync root in a temp dir wired to a fake gateway and memory keyring.
pub struct Harness {
    pub dir: TempDir,
    pub root: PathBuf,
    pub gateway: Arc<FakeGateway>,
    pub keyring: Arc<MemoryKeyring>,
    pub store: StateStore,
    pub transfer: Arc<TransferEngine>,
    pub reconciler: Arc<Reconciler>,
    pub snapshots: Arc<SnapshotManager>,
}

pub fn harness() -> Harness {
    harness_with(DeletePolicy::BestEffort)
}

pub fn harness_with(policy: DeletePolicy) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    std::fs::create_dir_all(&root).unwrap();

    let gateway = Arc::new(FakeGateway::new());
    let keyring = Arc::new(MemoryKeyring::new());
    let store = StateStore::open(&root.join(".synctool").join("state")).unwrap();
    let transfer = Arc::new(TransferEngine::new(
        gateway.clone(),
        keyring.clone(),
        root.join(".synctool").join("staging"),
    ));
    let reconciler = Arc::new(
        Reconciler::new(root.clone(), store.clone(), transfer.clone())
            .with_concurrency(3)
            .with_delete_policy(policy),
    );
    let snapshots = Arc::new(SnapshotManager::new(
        store.clone(),
        transfer.clone(),
        root.join(".synctool").join("snapshots"),
    ));

    Harness {
        dir,
        root,
        gateway,
        keyring,
        store,
        transfer,
        reconciler,
        snapshots,
    }
}

impl Harness {
    pub fn write(&self, rel: &str, contents: &[u8]) -> PathBuf {
        write_file(&self.root, rel, contents)
    }

    pub fn path(&self, rel: &str) -> String {
        path_str(&self.root.join(rel))
    }
}

/// Entries currently in `dir`; empty if it does not exist.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub fn write_file(root: &Path, rel: &str, contents: &[u8]) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

/// Sets a file's mtime to `ms` milliseconds after the epoch.
pub fn set_mtime(path: &Path, ms: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + std::time::Duration::from_millis(ms))
        .unwrap();
}

pub fn mtime_ms(path: &Path) -> i64 {
    std::fs::metadata(path)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
