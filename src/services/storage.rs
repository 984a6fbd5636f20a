use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Resolves a stored photo to a URL the AI service can fetch.
#[async_trait]
pub trait PhotoUrls: Send + Sync {
    async fn photo_url(&self, storage_key: &str) -> Result<String, StorageError>;
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
    url_ttl_secs: u32,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        url_ttl_secs: u32,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            url_ttl_secs,
        })
    }
}

#[async_trait]
impl PhotoUrls for R2Client {
    /// Presigned GET URL valid for the configured lifetime.
    async fn photo_url(&self, storage_key: &str) -> Result<String, StorageError> {
        if storage_key.is_empty() {
            return Err(StorageError::Config("photo has no storage key".to_string()));
        }
        self.bucket
            .presign_get(storage_key, self.url_ttl_secs, None)
            .await
            .map_err(StorageError::S3)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
