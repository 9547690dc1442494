//! Directory and file records mirrored from the synchronized tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discriminates the two record variants sharing the `records` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Dir,
    File,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Dir => "dir",
            RecordKind::File => "file",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dir" => Ok(RecordKind::Dir),
            "file" => Ok(RecordKind::File),
            other => Err(format!("unknown record kind '{other}'")),
        }
    }
}

/// A directory and the remote container holding its immediate files.
///
/// `container_id` is assigned when the directory is first observed and
/// never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub path: String,
    pub name: String,
    pub container_id: String,
    /// `None` only for the synchronized root.
    pub parent_path: Option<String>,
}

impl DirectoryRecord {
    pub fn is_root(&self) -> bool {
        self.parent_path.is_none()
    }
}

/// Sync state of a file that is present both locally and remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCurrent {
    /// Local modification time, epoch milliseconds.
    pub mtime: i64,
    /// When the upload completed, epoch milliseconds.
    pub synced_at: i64,
}

/// A file ever observed under the root.
///
/// File records are never removed; a file that disappears locally keeps its
/// record with `current == None` (a tombstone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    pub parent_path: String,
    pub container_id: String,
    /// Set once the remote store acknowledged the upload.
    pub remote_file_id: Option<String>,
    pub current: Option<FileCurrent>,
    /// Historical pointers, reserved.
    #[serde(default)]
    pub snapshots: Vec<String>,
}

impl FileRecord {
    pub fn is_tombstone(&self) -> bool {
        self.current.is_none()
    }

    pub fn is_live(&self) -> bool {
        self.current.is_some()
    }
}

/// Either variant, as returned by kind-parameterized lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Directory(DirectoryRecord),
    File(FileRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Directory(_) => RecordKind::Dir,
            Record::File(_) => RecordKind::File,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Record::Directory(d) => &d.path,
            Record::File(f) => &f.path,
        }
    }

    pub fn into_directory(self) -> Option<DirectoryRecord> {
        match self {
            Record::Directory(d) => Some(d),
            Record::File(_) => None,
        }
    }

    pub fn into_file(self) -> Option<FileRecord> {
        match self {
            Record::File(f) => Some(f),
            Record::Directory(_) => None,
        }
    }
}
