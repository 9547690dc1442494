//! Storage error types.

use thiserror::Error;

/// Result type for state store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing the state store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid record at {path}: {reason}")]
    InvalidRecord { path: String, reason: String },

    #[error("export target already exists: {0}")]
    ExportTargetExists(String),
}
