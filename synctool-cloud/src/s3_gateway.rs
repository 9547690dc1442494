//! S3-backed [`RemoteGateway`].
//!
//! Containers are buckets named `synctool-<uuid>`. Push tokens are presigned
//! PUT URLs for a freshly reserved object key; the encrypted file is sent to
//! that URL with `reqwest`. Reads and deletes go through the authenticated
//! SDK client, so pull tokens are not issued.

use crate::config::RemoteConfig;
use crate::error::{CloudError, CloudResult};
use crate::gateway::RemoteGateway;
use crate::types::{ObjectStream, StoredObject, TransferDirection, TransferToken};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Object metadata key carrying a base64 public key for announced objects.
pub const PUBLIC_KEY_METADATA: &str = "synctool-public-key";

const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Static credentials file referenced by [`RemoteConfig::credentials_path`].
#[derive(Deserialize)]
struct CredentialsFile {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
}

pub struct S3Gateway {
    client: S3Client,
    http: reqwest::Client,
    region: String,
    token_ttl: Duration,
}

impl S3Gateway {
    /// Builds a gateway from config. Without a credentials file the default
    /// AWS provider chain is used.
    pub async fn connect(config: &RemoteConfig) -> CloudResult<Self> {
        let region = aws_types::region::Region::new(config.region.clone());

        let mut builder = match &config.credentials_path {
            Some(path) => {
                let raw = tokio::fs::read(path).await?;
                let file: CredentialsFile = serde_json::from_slice(&raw)?;
                let credentials = aws_credential_types::Credentials::new(
                    file.access_key_id,
                    file.secret_access_key,
                    file.session_token,
                    None,
                    "synctool-credentials-file",
                );
                aws_sdk_s3::Config::builder()
                    .region(region)
                    .credentials_provider(credentials)
                    .behavior_version_latest()
            }
            None => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::from_client(
            S3Client::from_conf(builder.build()),
            config.region.clone(),
        ))
    }

    pub fn from_client(client: S3Client, region: String) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
            region,
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }
}

#[async_trait]
impl RemoteGateway for S3Gateway {
    async fn create_container(&self) -> CloudResult<String> {
        let bucket = format!("synctool-{}", Uuid::new_v4().simple());

        let mut request = self.client.create_bucket().bucket(&bucket);
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| CloudError::Remote(format!("create bucket {bucket} failed: {e}")))?;

        debug!("created bucket {bucket}");
        Ok(bucket)
    }

    async fn create_transfer_token(
        &self,
        container_id: &str,
        direction: TransferDirection,
    ) -> CloudResult<TransferToken> {
        if direction == TransferDirection::Pull {
            return Err(CloudError::Config(
                "S3 reads are authorized per request; pull tokens are not issued".into(),
            ));
        }

        let object_id = Uuid::new_v4().to_string();
        let presign = PresigningConfig::expires_in(self.token_ttl)
            .map_err(|e| CloudError::Config(format!("invalid token lifetime: {e}")))?;
        let request = self
            .client
            .put_object()
            .bucket(container_id)
            .key(&object_id)
            .presigned(presign)
            .await
            .map_err(|e| {
                CloudError::Remote(format!("presign PUT {container_id}/{object_id} failed: {e}"))
            })?;

        let ttl = chrono::Duration::from_std(self.token_ttl)
            .map_err(|e| CloudError::Config(format!("invalid token lifetime: {e}")))?;
        Ok(TransferToken {
            token: request.uri().to_string(),
            container_id: container_id.to_string(),
            direction,
            object_id: Some(object_id),
            expires_at: Utc::now() + ttl,
        })
    }

    async fn put_object(
        &self,
        container_id: &str,
        token: &TransferToken,
        encrypted_path: &Path,
    ) -> CloudResult<StoredObject> {
        if token.direction != TransferDirection::Push || token.container_id != container_id {
            return Err(CloudError::Config(format!(
                "token does not authorize a push into {container_id}"
            )));
        }
        if token.is_expired() {
            return Err(CloudError::Remote("transfer token expired".into()));
        }
        let object_id = token
            .object_id
            .clone()
            .ok_or_else(|| CloudError::Config("push token without an object key".into()))?;

        let file = tokio::fs::File::open(encrypted_path).await?;
        let size = file.metadata().await?.len();

        let response = self
            .http
            .put(&token.token)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(reqwest::Body::from(file))
            .send()
            .await?;

        let status = response.status();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::Remote(format!(
                "upload of {container_id}/{object_id} rejected with {status}: {body}"
            )));
        }

        debug!("uploaded {size} bytes to s3://{container_id}/{object_id}");
        Ok(StoredObject {
            object_id,
            size,
            etag,
        })
    }

    async fn get_object_stream(
        &self,
        container_id: &str,
        object_id: &str,
        exclude: &[String],
    ) -> CloudResult<ObjectStream> {
        if !exclude.is_empty() {
            debug!("ignoring {} excluded mirrors, S3 has none", exclude.len());
        }

        let response = self
            .client
            .get_object()
            .bucket(container_id)
            .key(object_id)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    CloudError::NotFound(format!("s3://{container_id}/{object_id}"))
                } else {
                    CloudError::Remote(format!(
                        "download failed for {container_id}/{object_id}: {service_err}"
                    ))
                }
            })?;

        let announced_key = response
            .metadata()
            .and_then(|m| m.get(PUBLIC_KEY_METADATA))
            .map(|encoded| BASE64.decode(encoded))
            .transpose()
            .map_err(|e| CloudError::Remote(format!("malformed announced key on {object_id}: {e}")))?;
        let length = response.content_length().and_then(|l| u64::try_from(l).ok());

        let body = futures::stream::unfold(Some(response.body), |state| async move {
            let mut body = state?;
            match body.try_next().await {
                Ok(Some(bytes)) => Some((Ok(bytes.to_vec()), Some(body))),
                Ok(None) => None,
                Err(e) => Some((
                    Err(CloudError::Remote(format!("object stream failed: {e}"))),
                    None,
                )),
            }
        })
        .boxed();

        Ok(ObjectStream {
            length,
            announced_key,
            body,
        })
    }

    async fn delete_object(&self, container_id: &str, object_id: &str) -> CloudResult<()> {
        self.client
            .delete_object()
            .bucket(container_id)
            .key(object_id)
            .send()
            .await
            .map_err(|e| {
                CloudError::Remote(format!("delete failed for {container_id}/{object_id}: {e}"))
            })?;
        debug!("deleted s3://{container_id}/{object_id}");
        Ok(())
    }
}
