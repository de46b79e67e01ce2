//! Filesystem media store under the configured media root

use super::{validate_key, MediaStore};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

pub struct LocalMediaStore {
    root: PathBuf,
    public_prefix: String,
}

impl LocalMediaStore {
    /// Creates the root directory if it doesn't exist.
    pub fn new(root: impl AsRef<Path>, public_prefix: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| AppError::Storage {
            message: format!("cannot create media root {}: {}", root.display(), e),
        })?;

        Ok(Self {
            root,
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_prefix, key)
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| AppError::Storage {
            message: format!("write {}: {}", path.display(), e),
        })?;

        debug!(path = %path.display(), "Stored media file");
        Ok(self.public_url(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| AppError::Storage {
            message: format!("read {}: {}", path.display(), e),
        })
    }

    async fn url_for(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        Ok(self.public_url(key))
    }
}
