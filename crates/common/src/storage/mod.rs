//! Media storage
//!
//! Generated illustrations and narration clips end up either on the local
//! media root (served by the gateway's static mount) or in an S3-compatible
//! bucket such as Cloudflare R2.

mod local;
mod r2;

pub use local::LocalMediaStore;
pub use r2::R2MediaStore;

use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::path::{Component, Path};
use std::sync::Arc;
use tracing::info;

/// Pluggable media backend
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Short name used in logs
    fn backend_name(&self) -> &'static str;

    /// Store `bytes` under `key` and return a location clients can fetch
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Read back the bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Location for an already stored key
    async fn url_for(&self, key: &str) -> Result<String>;
}

/// Build the configured store: R2 when `storage.r2` is present, local disk otherwise
pub async fn create_media_store(config: &StorageConfig) -> Result<Arc<dyn MediaStore>> {
    match &config.r2 {
        Some(r2) => {
            info!(bucket = %r2.bucket, endpoint = %r2.endpoint_url(), "Using R2 media store");
            Ok(Arc::new(R2MediaStore::new(r2).await))
        }
        None => {
            info!(root = %config.media_root, "Using local media store");
            Ok(Arc::new(LocalMediaStore::new(
                &config.media_root,
                &config.public_prefix,
            )?))
        }
    }
}

/// MIME type guessed from the key's extension
pub fn content_type_for(key: &str) -> &'static str {
    let ext = Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Keys are relative, slash-separated and may not climb out of the root
pub fn validate_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

    if !valid {
        return Err(AppError::Validation {
            message: format!("invalid storage key: {:?}", key),
            field: Some("key".to_string()),
        });
    }
    Ok(())
}
