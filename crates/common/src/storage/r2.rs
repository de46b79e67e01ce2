//! S3-compatible media store (Cloudflare R2)

use super::{validate_key, MediaStore};
use crate::config::R2Config;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct R2MediaStore {
    client: Client,
    bucket: String,
    presign_ttl: Duration,
}

impl R2MediaStore {
    /// R2 ignores the region but the SDK requires one; `auto` is the documented value.
    pub async fn new(config: &R2Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.access_key_secret.clone(),
            None,
            None,
            "r2-static",
        );

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(config.endpoint_url())
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            presign_ttl: Duration::from_secs(config.presign_ttl_secs),
        }
    }

    async fn presign_get(&self, key: &str) -> Result<String> {
        let presigning = PresigningConfig::expires_in(self.presign_ttl).map_err(|e| {
            AppError::Storage {
                message: format!("presign config: {}", e),
            }
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::Storage {
                message: format!("presign {}: {}", key, DisplayErrorContext(&e)),
            })?;

        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl MediaStore for R2MediaStore {
    fn backend_name(&self) -> &'static str {
        "r2"
    }

    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        validate_key(key)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AppError::Storage {
                message: format!("put {}: {}", key, DisplayErrorContext(&e)),
            })?;

        debug!(key, "Uploaded object");
        self.presign_get(key).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::Storage {
                message: format!("get {}: {}", key, DisplayErrorContext(&e)),
            })?;

        let data = object.body.collect().await.map_err(|e| AppError::Storage {
            message: format!("read body of {}: {}", key, e),
        })?;

        Ok(data.into_bytes().to_vec())
    }

    async fn url_for(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        self.presign_get(key).await
    }
}
