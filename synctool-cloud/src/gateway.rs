//! Remote object store interface.

use crate::error::CloudResult;
use crate::types::{ObjectStream, StoredObject, TransferDirection, TransferToken};
use async_trait::async_trait;
use std::path::Path;

/// Container lifecycle and object transfer against a remote store.
///
/// Implementations own retries, timeouts and authentication. Every method
/// may fail transiently; callers treat a failure as "try again next pass".
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Provisions an empty container and returns its id.
    async fn create_container(&self) -> CloudResult<String>;

    async fn create_transfer_token(
        &self,
        container_id: &str,
        direction: TransferDirection,
    ) -> CloudResult<TransferToken>;

    /// Uploads an already encrypted file.
    async fn put_object(
        &self,
        container_id: &str,
        token: &TransferToken,
        encrypted_path: &Path,
    ) -> CloudResult<StoredObject>;

    /// Opens an object for reading. `exclude` names mirrors the caller
    /// already failed to read from; stores without mirrors ignore it.
    async fn get_object_stream(
        &self,
        container_id: &str,
        object_id: &str,
        exclude: &[String],
    ) -> CloudResult<ObjectStream>;

    async fn delete_object(&self, container_id: &str, object_id: &str) -> CloudResult<()>;
}
