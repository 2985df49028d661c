use crate::config::S3Config;
use crate::error::ReelError;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Media handed to the store, either already in memory or on local disk.
///
/// The store never deletes a file payload; removing it after a successful
/// upload is the caller's job.
#[derive(Debug, Clone)]
pub enum Payload {
    Bytes(Bytes),
    File(PathBuf),
}

impl Payload {
    async fn into_byte_stream(self) -> Result<ByteStream, ReelError> {
        match self {
            Payload::Bytes(bytes) => Ok(ByteStream::from(bytes)),
            Payload::File(path) => ByteStream::from_path(&path).await.map_err(|e| {
                ReelError::UploadFailed(format!("cannot read {}: {e}", path.display()))
            }),
        }
    }
}

/// Bucket-like storage that hands back time-limited retrieval URLs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `payload` under `key` and return a signed GET URL for it
    async fn upload(&self, payload: Payload, key: &str) -> Result<String, ReelError>;
}

/// Cloudflare R2 (S3 API) implementation of [`ObjectStore`]
pub struct R2Store {
    client: S3Client,
    bucket: String,
    presigned_url_expiry: Duration,
}

impl R2Store {
    /// Create the client once; it is shared by every request afterwards
    pub async fn new(config: &S3Config) -> Result<Self, ReelError> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "reel-webhook",
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let endpoint = config.endpoint();
        let s3_config = S3ConfigBuilder::from(&sdk_config)
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .build();

        info!(
            bucket = %config.bucket,
            endpoint = %endpoint,
            "Object store initialized"
        );

        Ok(Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            presigned_url_expiry: Duration::from_secs(config.presigned_url_expiry_secs),
        })
    }

    async fn presign_get(&self, key: &str) -> Result<String, ReelError> {
        let presigning_config = PresigningConfig::expires_in(self.presigned_url_expiry)
            .map_err(|e| ReelError::Unexpected(format!("invalid presign expiry: {e}")))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| ReelError::StorageUnavailable(format!("presigning failed: {e}")))?;

        Ok(presigned.uri().to_string())
    }

    /// Check that the bucket is reachable with the configured credentials
    pub async fn check_connection(&self) -> Result<(), ReelError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| ReelError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for R2Store {
    #[instrument(skip(self, payload), fields(bucket = %self.bucket))]
    async fn upload(&self, payload: Payload, key: &str) -> Result<String, ReelError> {
        let body = payload.into_byte_stream().await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type_for(key))
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service_error) => ReelError::UploadFailed(service_error.to_string()),
                None => ReelError::StorageUnavailable(e.to_string()),
            })?;

        debug!(key = %key, "Object uploaded");

        self.presign_get(key).await
    }
}

/// Content type derived from the object key's extension
fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next().map(str::to_lowercase).as_deref() {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}
