//! Encrypted upload and download of single files.
//!
//! Uploads encrypt into a staging file under the engine's own staging
//! directory and push that; downloads decrypt the object stream straight into
//! the destination without staging.

use crate::error::{CloudError, CloudResult};
use crate::gateway::RemoteGateway;
use crate::keyring::Keyring;
use crate::types::{ObjectStream, TransferDirection, UploadedObject};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synctool_crypto::{encrypt_file, CryptoError, FileSecret, StreamDecryptor};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Suffix of staging files. The tree walker never reports names ending in it.
pub const STAGING_SUFFIX: &str = ".crypt";

/// Fresh staging path for an upload of `source` inside `staging_dir`.
///
/// Names are `<uuid>.<source name>.crypt`, so concurrent uploads of the same
/// file never share a staging file and nothing outside `staging_dir` is touched.
pub fn staging_path(staging_dir: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    staging_dir.join(format!("{}.{name}{STAGING_SUFFIX}", Uuid::new_v4().simple()))
}

/// Removes the staging file when the upload finishes, fails or is dropped.
struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove staging file {}: {e}", self.path.display()),
        }
    }
}

/// Moves single files between the local tree and the remote store.
pub struct TransferEngine {
    gateway: Arc<dyn RemoteGateway>,
    keyring: Arc<dyn Keyring>,
    staging_dir: PathBuf,
}

impl TransferEngine {
    /// `staging_dir` must lie outside the synced tree or inside the reserved
    /// state directory.
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        keyring: Arc<dyn Keyring>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            keyring,
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn gateway(&self) -> &Arc<dyn RemoteGateway> {
        &self.gateway
    }

    pub fn keyring(&self) -> &Arc<dyn Keyring> {
        &self.keyring
    }

    /// Encrypts `local_path` under a fresh secret and stores it in `container_id`.
    ///
    /// The secret reaches the keyring only after the remote store
    /// acknowledged the object.
    pub async fn upload(&self, container_id: &str, local_path: &Path) -> CloudResult<UploadedObject> {
        let secret = FileSecret::generate();
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let path = staging_path(&self.staging_dir, local_path);

        let encrypted = {
            let secret = secret.clone();
            let src = local_path.to_path_buf();
            let dst = path.clone();
            tokio::task::spawn_blocking(move || encrypt_file(&secret, &src, &dst)).await?
        };
        // A file already at `path` is not ours to remove.
        if let Err(CryptoError::Io(e)) = &encrypted {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                return Err(CloudError::Io(std::io::Error::new(
                    e.kind(),
                    format!("staging file {} already exists", path.display()),
                )));
            }
        }
        let staging = StagingFile { path };
        let sealed = encrypted?;
        debug!("encrypted {} into {sealed} bytes", local_path.display());

        let token = self
            .gateway
            .create_transfer_token(container_id, TransferDirection::Push)
            .await?;
        let stored = self
            .gateway
            .put_object(container_id, &token, staging.path())
            .await?;

        self.keyring.set(&stored.object_id, secret.clone()).await?;
        debug!(
            "uploaded {} as {}/{} ({} bytes)",
            local_path.display(),
            container_id,
            stored.object_id,
            stored.size
        );

        Ok(UploadedObject {
            remote_object_id: stored.object_id,
            secret,
        })
    }

    /// Streams an object into `destination`, returning the plaintext size.
    ///
    /// A partially written destination is removed if the stream or the
    /// decryption fails.
    pub async fn download(
        &self,
        container_id: &str,
        object_id: &str,
        destination: &Path,
    ) -> CloudResult<u64> {
        let stream = self
            .gateway
            .get_object_stream(container_id, object_id, &[])
            .await?;
        let secret = self
            .resolve_secret(container_id, object_id, stream.announced_key.as_deref())
            .await?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match write_decrypted(stream, &secret, destination).await {
            Ok(written) => {
                debug!("downloaded {container_id}/{object_id} to {}", destination.display());
                Ok(written)
            }
            Err(e) => {
                warn!("download of {container_id}/{object_id} failed: {e}");
                match tokio::fs::remove_file(destination).await {
                    Ok(()) => {}
                    Err(rm) if rm.kind() == std::io::ErrorKind::NotFound => {}
                    Err(rm) => warn!(
                        "failed to remove partial download {}: {rm}",
                        destination.display()
                    ),
                }
                Err(e)
            }
        }
    }

    /// Deletes a remote object and forgets its secret.
    ///
    /// An object the remote no longer has counts as deleted.
    pub async fn delete(&self, container_id: &str, object_id: &str) -> CloudResult<()> {
        match self.gateway.delete_object(container_id, object_id).await {
            Ok(()) => {}
            Err(CloudError::NotFound(what)) => {
                debug!("{what} already gone, treating delete as done");
            }
            Err(e) => return Err(e),
        }
        if let Err(e) = self.keyring.del(object_id).await {
            warn!("deleted {container_id}/{object_id} but could not drop its secret: {e}");
        }
        debug!("deleted {container_id}/{object_id}");
        Ok(())
    }

    async fn resolve_secret(
        &self,
        container_id: &str,
        object_id: &str,
        announced_key: Option<&[u8]>,
    ) -> CloudResult<FileSecret> {
        if let Some(secret) = self.keyring.get(object_id).await? {
            return Ok(secret);
        }
        match announced_key {
            Some(public_key) => {
                debug!("deriving secret for {object_id} from announced key");
                Ok(FileSecret::derive_from_public_key(public_key, container_id, object_id))
            }
            None => Err(CloudError::SecretNotFound(object_id.to_string())),
        }
    }
}

async fn write_decrypted(
    stream: ObjectStream,
    secret: &FileSecret,
    destination: &Path,
) -> CloudResult<u64> {
    let ObjectStream {
        length, mut body, ..
    } = stream;
    let mut file = tokio::fs::File::create(destination).await?;
    let mut decryptor = StreamDecryptor::new(secret);
    let mut received = 0u64;
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        received += chunk.len() as u64;
        match length {
            Some(total) => debug!("received {received} of {total} bytes"),
            None => debug!("received {received} bytes"),
        }
        let plain = decryptor.update(&chunk)?;
        file.write_all(&plain).await?;
        written += plain.len() as u64;
    }

    let plain = decryptor.finish()?;
    file.write_all(&plain).await?;
    written += plain.len() as u64;
    file.flush().await?;
    Ok(written)
}
