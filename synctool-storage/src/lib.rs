//! DuckDB state store for synctool.
//!
//! Persists the ledger the reconciler diffs the live filesystem against:
//! one directory record per synchronized directory (with the remote container
//! holding its files) and one file record per file ever observed.
//!
//! # Architecture
//!
//! - One store per sync root, at `<root>/.synctool/state`
//! - Records are keyed by `(path, kind)`; writes are idempotent upserts
//! - File records are tombstoned, never deleted
//! - Snapshots are standalone copies produced by [`StateStore::export_to`]

mod error;
mod records;
mod state_store;

pub use error::{StorageError, StorageResult};
pub use records::{DirectoryRecord, FileCurrent, FileRecord, Record, RecordKind};
pub use state_store::StateStore;
