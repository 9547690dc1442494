//! Path-keyed ledger of synchronized directories and files.
//!
//! Both record kinds live in one `records` table with primary key
//! `(path, kind)`. Every write is idempotent on that key so repeated or
//! overlapping passes converge instead of duplicating rows.

use crate::error::{StorageError, StorageResult};
use crate::records::{DirectoryRecord, FileCurrent, FileRecord, Record, RecordKind};
use duckdb::{params, AccessMode, Config, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

// Per-store DuckDB limits.
const MEMORY_LIMIT: &str = "128MB";
const THREADS: u32 = 1;

const SELECT_COLUMNS: &str = "SELECT path, kind, name, parent_path, container_id, remote_file_id, \
     mtime_ms, synced_at_ms, snapshots_json FROM records";

/// State store backed by DuckDB.
#[derive(Clone)]
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
}

impl StateStore {
    /// Opens or creates a state store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_recovering_wal(path)?;
        conn.execute_batch(&format!(
            "PRAGMA memory_limit='{MEMORY_LIMIT}'; PRAGMA threads={THREADS};"
        ))?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory state store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an existing store (typically a snapshot export) without write access.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(path, config)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("recovering from poisoned state store mutex");
            poisoned.into_inner()
        })
    }

    /// Inserts a directory record. An existing record for the same path wins,
    /// so a directory's container never changes.
    pub fn insert_directory(&self, record: &DirectoryRecord) -> StorageResult<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO records (
                path, kind, name, parent_path, container_id
            ) VALUES (?, 'dir', ?, ?, ?)
            "#,
            params![
                record.path,
                record.name,
                record.parent_path.as_deref(),
                record.container_id,
            ],
        )?;
        Ok(())
    }

    /// Inserts (upserts) a file record.
    pub fn insert_file(&self, record: &FileRecord) -> StorageResult<()> {
        let snapshots_json = serde_json::to_string(&record.snapshots)?;
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO records (
                path, kind, name, parent_path, container_id,
                remote_file_id, mtime_ms, synced_at_ms, snapshots_json
            ) VALUES (?, 'file', ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (path, kind) DO UPDATE SET
                remote_file_id = excluded.remote_file_id,
                mtime_ms = excluded.mtime_ms,
                synced_at_ms = excluded.synced_at_ms
            "#,
            params![
                record.path,
                record.name,
                record.parent_path,
                record.container_id,
                record.remote_file_id.as_deref(),
                record.current.map(|c| c.mtime),
                record.current.map(|c| c.synced_at),
                snapshots_json,
            ],
        )?;
        Ok(())
    }

    /// Looks up a record of the given kind.
    pub fn find_by_path(&self, path: &str, kind: RecordKind) -> StorageResult<Option<Record>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE path = ? AND kind = ?"))?;
        let mut rows = stmt
            .query_map(params![path, kind.as_str()], RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        match rows.pop() {
            Some(raw) => Ok(Some(raw.into_record()?)),
            None => Ok(None),
        }
    }

    pub fn find_directory(&self, path: &str) -> StorageResult<Option<DirectoryRecord>> {
        Ok(self
            .find_by_path(path, RecordKind::Dir)?
            .and_then(Record::into_directory))
    }

    pub fn find_file(&self, path: &str) -> StorageResult<Option<FileRecord>> {
        Ok(self
            .find_by_path(path, RecordKind::File)?
            .and_then(Record::into_file))
    }

    /// Replaces a file's `current` state; `None` tombstones it.
    ///
    /// Returns `false` if no file record exists at `path`.
    pub fn update_current(&self, path: &str, current: Option<FileCurrent>) -> StorageResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE records SET mtime_ms = ?, synced_at_ms = ? WHERE path = ? AND kind = 'file'",
            params![current.map(|c| c.mtime), current.map(|c| c.synced_at), path],
        )?;
        Ok(changed > 0)
    }

    /// Records a completed re-upload: new remote object and fresh `current`.
    pub fn record_upload(
        &self,
        path: &str,
        remote_file_id: &str,
        current: FileCurrent,
    ) -> StorageResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE records SET remote_file_id = ?, mtime_ms = ?, synced_at_ms = ? \
             WHERE path = ? AND kind = 'file'",
            params![remote_file_id, current.mtime, current.synced_at, path],
        )?;
        Ok(changed > 0)
    }

    /// All file records, live and tombstoned, ordered by path.
    pub fn all_files(&self) -> StorageResult<Vec<FileRecord>> {
        self.load_kind(RecordKind::File)?
            .into_iter()
            .map(|r| {
                r.into_file().ok_or_else(|| StorageError::InvalidRecord {
                    path: String::new(),
                    reason: "expected a file record".into(),
                })
            })
            .collect()
    }

    /// All directory records, ordered by path.
    pub fn all_directories(&self) -> StorageResult<Vec<DirectoryRecord>> {
        self.load_kind(RecordKind::Dir)?
            .into_iter()
            .map(|r| {
                r.into_directory().ok_or_else(|| StorageError::InvalidRecord {
                    path: String::new(),
                    reason: "expected a directory record".into(),
                })
            })
            .collect()
    }

    /// The directory record without a parent, if the root was provisioned.
    pub fn root_directory(&self) -> StorageResult<Option<DirectoryRecord>> {
        Ok(self.all_directories()?.into_iter().find(|d| d.is_root()))
    }

    fn load_kind(&self, kind: RecordKind) -> StorageResult<Vec<Record>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE kind = ? ORDER BY path"))?;
        let raws = stmt
            .query_map(params![kind.as_str()], RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRecord::into_record).collect()
    }

    /// Counts records of one kind.
    pub fn count(&self, kind: RecordKind) -> StorageResult<usize> {
        let conn = self.conn();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE kind = ?",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Writes every record into a new standalone DuckDB file at `target`.
    ///
    /// The export is a point-in-time copy; later writes to this store do not
    /// reach it.
    pub fn export_to(&self, target: &Path) -> StorageResult<()> {
        if target.exists() {
            return Err(StorageError::ExportTargetExists(target.display().to_string()));
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let target_sql = target.to_string_lossy().replace('\'', "''");

        let conn = self.conn();
        conn.execute_batch(&format!("ATTACH '{target_sql}' AS snapshot_export;"))?;
        let copied = conn.execute_batch(
            "CREATE TABLE snapshot_export.records AS SELECT * FROM records ORDER BY kind, path;",
        );
        let detached = conn.execute_batch("DETACH snapshot_export;");
        copied?;
        detached?;
        debug!("exported state store to {}", target.display());
        Ok(())
    }

    /// Flushes the WAL into the main database file.
    pub fn checkpoint(&self) -> StorageResult<()> {
        self.conn().execute_batch("CHECKPOINT;")?;
        Ok(())
    }
}

/// Row shape shared by both kinds before validation.
struct RawRecord {
    path: String,
    kind: String,
    name: String,
    parent_path: Option<String>,
    container_id: String,
    remote_file_id: Option<String>,
    mtime_ms: Option<i64>,
    synced_at_ms: Option<i64>,
    snapshots_json: Option<String>,
}

impl RawRecord {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            path: row.get(0)?,
            kind: row.get(1)?,
            name: row.get(2)?,
            parent_path: row.get(3)?,
            container_id: row.get(4)?,
            remote_file_id: row.get(5)?,
            mtime_ms: row.get(6)?,
            synced_at_ms: row.get(7)?,
            snapshots_json: row.get(8)?,
        })
    }

    fn into_record(self) -> StorageResult<Record> {
        let kind: RecordKind = self.kind.parse().map_err(|reason| StorageError::InvalidRecord {
            path: self.path.clone(),
            reason,
        })?;

        match kind {
            RecordKind::Dir => Ok(Record::Directory(DirectoryRecord {
                path: self.path,
                name: self.name,
                container_id: self.container_id,
                parent_path: self.parent_path,
            })),
            RecordKind::File => {
                let parent_path = self.parent_path.ok_or_else(|| StorageError::InvalidRecord {
                    path: self.path.clone(),
                    reason: "file record without parent directory".into(),
                })?;
                let current = match (self.mtime_ms, self.synced_at_ms) {
                    (Some(mtime), Some(synced_at)) => Some(FileCurrent { mtime, synced_at }),
                    _ => None,
                };
                let snapshots = match self.snapshots_json.as_deref() {
                    Some(json) => serde_json::from_str(json)?,
                    None => Vec::new(),
                };
                Ok(Record::File(FileRecord {
                    path: self.path,
                    name: self.name,
                    parent_path,
                    container_id: self.container_id,
                    remote_file_id: self.remote_file_id,
                    current,
                    snapshots,
                }))
            }
        }
    }
}

/// Opens `path`, discarding a stale `<file>.wal` once if the first open fails.
fn open_recovering_wal(path: &Path) -> StorageResult<Connection> {
    let first_err = match Connection::open(path) {
        Ok(conn) => return Ok(conn),
        Err(e) => e,
    };

    let mut wal = path.as_os_str().to_owned();
    wal.push(".wal");
    let wal = std::path::PathBuf::from(wal);
    if !wal.exists() {
        return Err(first_err.into());
    }

    warn!("state store open failed ({first_err}), removing stale WAL {}", wal.display());
    std::fs::remove_file(&wal)?;
    Ok(Connection::open(path)?)
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            path VARCHAR NOT NULL,
            kind VARCHAR NOT NULL,
            name VARCHAR NOT NULL,
            parent_path VARCHAR,
            container_id VARCHAR NOT NULL,
            remote_file_id VARCHAR,
            mtime_ms BIGINT,
            synced_at_ms BIGINT,
            snapshots_json TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (path, kind)
        );
        "#,
    )?;
    Ok(())
}
