//! Shared types for transfers, passes and snapshots.

use crate::error::CloudResult;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use synctool_crypto::FileSecret;

/// Direction a transfer token authorizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferDirection {
    Push,
    Pull,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Push => "PUSH",
            TransferDirection::Pull => "PULL",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short-lived authorization to move one object in or out of a container.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferToken {
    /// Opaque credential; for S3 a presigned URL.
    pub token: String,
    pub container_id: String,
    pub direction: TransferDirection,
    /// Object id reserved by the gateway for a push, if it assigns ids up front.
    pub object_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl TransferToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Acknowledgement of a stored object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub object_id: String,
    /// Encrypted size in bytes.
    pub size: u64,
    pub etag: Option<String>,
}

/// Encrypted bytes of a remote object, delivered incrementally.
pub struct ObjectStream {
    /// Total encrypted length, when the remote reports it.
    pub length: Option<u64>,
    /// Public key the object was published under, if any.
    pub announced_key: Option<Vec<u8>>,
    pub body: BoxStream<'static, CloudResult<Vec<u8>>>,
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream")
            .field("length", &self.length)
            .field("announced_key", &self.announced_key.as_ref().map(|k| k.len()))
            .finish_non_exhaustive()
    }
}

/// Result of a successful upload.
#[derive(Clone, Debug)]
pub struct UploadedObject {
    pub remote_object_id: String,
    pub secret: FileSecret,
}

/// Outcome counts of one reconciler pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub created_dirs: usize,
    /// Files seen for the first time.
    pub uploaded: usize,
    /// Live files whose mtime changed.
    pub reuploaded: usize,
    /// Tombstoned files that reappeared.
    pub reborn: usize,
    pub unchanged: usize,
    /// Files tombstoned by the deletion pass.
    pub deleted: usize,
    pub failures: Vec<String>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of nodes whose remote or recorded state changed.
    pub fn changes(&self) -> usize {
        self.created_dirs + self.uploaded + self.reuploaded + self.reborn + self.deleted
    }
}

/// A snapshot export on disk.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Epoch milliseconds; also the file stem.
    pub timestamp: i64,
    pub path: PathBuf,
}

impl SnapshotInfo {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// Outcome of restoring a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    /// Tombstoned records or records that never finished uploading.
    pub skipped: usize,
    pub failures: Vec<String>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
