//! Sync engine error types.

use thiserror::Error;

/// Result type for sync engine operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur while syncing, transferring or restoring.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("remote operation failed: {0}")]
    Remote(String),

    #[error("no secret available for object {0}")]
    SecretNotFound(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("a sync pass is already running for this root")]
    PassInProgress,

    #[error("sync root already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("no snapshot with timestamp {0}")]
    SnapshotNotFound(i64),

    #[error("tree walk failed: {0}")]
    Walk(String),

    #[error("background task failed: {0}")]
    TaskJoin(String),

    #[error("sync driver is not running")]
    DriverStopped,

    #[error("crypto error: {0}")]
    Crypto(#[from] synctool_crypto::CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] synctool_storage::StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<tokio::task::JoinError> for CloudError {
    fn from(err: tokio::task::JoinError) -> Self {
        CloudError::TaskJoin(err.to_string())
    }
}
