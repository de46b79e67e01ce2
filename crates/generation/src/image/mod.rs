//! Chapter illustration generation
//!
//! Two vendors sit behind [`ImageGenerator`]:
//! - Doubao Seedream (synchronous, bearer auth)
//! - Jimeng (asynchronous task API, HMAC-signed requests)

mod jimeng;
mod seedream;
pub mod signing;

pub use jimeng::JimengClient;
pub use seedream::SeedreamClient;

use async_trait::async_trait;
use fairytale_common::config::{ImageConfig, ImageProvider};
use fairytale_common::errors::Result;
use std::sync::Arc;

/// Trait for image generation
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Vendor name for logs and metrics
    fn provider_name(&self) -> &'static str;

    /// Generate one image and return its URL.
    ///
    /// With `reference_url` the vendor keeps the style and characters of
    /// the referenced image.
    async fn generate(&self, prompt: &str, reference_url: Option<&str>) -> Result<String>;
}

/// Create the configured image generator
pub fn create_image_generator(config: &ImageConfig) -> Result<Arc<dyn ImageGenerator>> {
    match config.provider {
        ImageProvider::Seedream => Ok(Arc::new(SeedreamClient::new(&config.seedream)?)),
        ImageProvider::Jimeng => Ok(Arc::new(JimengClient::new(&config.jimeng)?)),
    }
}

/// Image generator returning predictable URLs, for tests
pub struct MockImageGenerator {
    base_url: String,
    calls: std::sync::Mutex<Vec<(String, Option<String>)>>,
    fail_on_call: Option<usize>,
}

impl MockImageGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            calls: std::sync::Mutex::new(Vec::new()),
            fail_on_call: None,
        }
    }

    /// Fail the `n`th call (zero based)
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// `(prompt, reference_url)` for every call so far
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    fn provider_name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, prompt: &str, reference_url: Option<&str>) -> Result<String> {
        let index = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| fairytale_common::AppError::Internal {
                    message: "mock call log poisoned".to_string(),
                })?;
            calls.push((prompt.to_string(), reference_url.map(String::from)));
            calls.len() - 1
        };

        if self.fail_on_call == Some(index) {
            return Err(fairytale_common::AppError::upstream("mock", "image refused"));
        }
        Ok(format!("{}/image-{}.jpeg", self.base_url, index))
    }
}
