//! Doubao Seedream image generation

use super::ImageGenerator;
use async_trait::async_trait;
use fairytale_common::config::SeedreamConfig;
use fairytale_common::errors::{AppError, Result};
use fairytale_common::metrics::record_vendor_request;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const SERVICE: &str = "seedream";

#[derive(Debug, Serialize)]
struct SeedreamRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
    size: &'a str,
    sequential_image_generation: &'static str,
    stream: bool,
    response_format: &'static str,
    watermark: bool,
}

#[derive(Debug, Deserialize)]
struct SeedreamResponse {
    #[serde(default)]
    data: Vec<SeedreamImage>,
}

#[derive(Debug, Deserialize)]
struct SeedreamImage {
    url: String,
}

pub struct SeedreamClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    size: String,
}

impl SeedreamClient {
    pub fn new(config: &SeedreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            url: config.base_url.clone(),
            model: config.model.clone(),
            size: config.size.clone(),
        })
    }

    fn request<'a>(&'a self, prompt: &'a str, reference_url: Option<&'a str>) -> SeedreamRequest<'a> {
        SeedreamRequest {
            model: &self.model,
            prompt,
            image: reference_url.filter(|u| !u.is_empty()),
            size: &self.size,
            sequential_image_generation: "disabled",
            stream: false,
            response_format: "url",
            watermark: false,
        }
    }

    async fn call(&self, prompt: &str, reference_url: Option<&str>) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt, reference_url))
            .send()
            .await
            .map_err(|e| AppError::upstream(SERVICE, format!("Request failed: {}", e)))?;

        if response.status() != reqwest::StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(
                SERVICE,
                format!("API error {}: {}", status, body),
            ));
        }

        let body: SeedreamResponse = response
            .json()
            .await
            .map_err(|e| AppError::malformed(SERVICE, format!("Failed to parse response: {}", e)))?;

        first_url(body)
    }
}

fn first_url(response: SeedreamResponse) -> Result<String> {
    response
        .data
        .into_iter()
        .next()
        .map(|image| image.url)
        .ok_or_else(|| AppError::malformed(SERVICE, "no images generated"))
}

#[async_trait]
impl ImageGenerator for SeedreamClient {
    fn provider_name(&self) -> &'static str {
        SERVICE
    }

    #[instrument(skip(self, prompt), fields(with_reference = reference_url.is_some()))]
    async fn generate(&self, prompt: &str, reference_url: Option<&str>) -> Result<String> {
        let result = self.call(prompt, reference_url).await;
        record_vendor_request(SERVICE, result.is_ok());
        if let Ok(url) = &result {
            debug!(url = %url, "Seedream image ready");
        }
        result
    }
}
