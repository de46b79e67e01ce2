//! Configuration management for Fairytale Studio
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Every field has a default so the gateway boots with an empty
//! environment; vendor credentials are only checked when a vendor is called.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Login credentials and session settings
    pub auth: AuthConfig,

    /// Relational database configuration
    pub database: DatabaseConfig,

    /// Which backend stories are persisted to
    pub persistence: PersistenceConfig,

    /// Cloudflare D1 (SQL over HTTP) configuration
    pub d1: D1Config,

    /// Story text generation (DeepSeek)
    pub text: TextConfig,

    /// Chapter illustration generation
    pub image: ImageConfig,

    /// Narration synthesis (CosyVoice)
    pub speech: SpeechConfig,

    /// Media, snapshot and object storage locations
    pub storage: StorageConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds. Story creation runs the whole pipeline
    /// inside the request, so this is generous.
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Operator username
    pub username: String,

    /// Operator password. Empty rejects every login.
    pub password: String,

    /// Session lifetime in seconds
    pub session_ttl_secs: u64,

    /// Name of the session cookie
    pub session_cookie: String,

    /// Guard story and voice routes behind a logged-in session
    pub require_login: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL (mysql://... or sqlite://...)
    pub url: String,

    /// Maximum number of connections
    pub max_connections: u32,

    /// Minimum number of connections
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,

    /// How long to keep retrying the startup connect, in seconds
    pub connect_retry_secs: u64,
}

/// Where generated stories are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    /// Relational database through SeaORM
    #[default]
    Database,
    /// Cloudflare D1 over its HTTP query API
    D1,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackend,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct D1Config {
    pub account_id: String,
    pub database_id: String,
    pub api_key: String,

    /// Cloudflare API base URL
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TextConfig {
    /// API key for the chat completion service
    pub api_key: String,

    /// API base URL
    pub base_url: String,

    /// Model to use
    pub model: String,

    pub temperature: f32,

    pub max_tokens: u32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Image generation vendor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageProvider {
    #[default]
    Seedream,
    Jimeng,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageConfig {
    pub provider: ImageProvider,

    /// Download each generated image and re-upload it to media storage.
    /// Vendor URLs expire, stored copies do not.
    pub mirror_to_storage: bool,

    pub seedream: SeedreamConfig,

    pub jimeng: JimengConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SeedreamConfig {
    pub api_key: String,

    /// Full generation endpoint URL
    pub base_url: String,

    pub model: String,

    /// Output size, `WIDTHxHEIGHT`
    pub size: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JimengConfig {
    pub access_key_id: String,
    pub secret_access_key: String,

    /// Visual API endpoint (scheme + host)
    pub endpoint: String,

    pub region: String,
    pub service: String,

    /// Seconds between result polls
    pub poll_interval_secs: u64,

    /// Give up polling after this many seconds
    pub max_wait_secs: u64,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub api_key: String,

    /// Inference WebSocket URL
    pub ws_url: String,

    pub model: String,
    pub voice: String,

    /// Audio container, also used as the file extension
    pub format: String,

    pub sample_rate: u32,
    pub volume: u32,
    pub rate: f32,
    pub pitch: f32,

    /// Upper bound for one synthesis session in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory served under `public_prefix`
    pub media_root: String,

    /// Directory receiving one JSON snapshot per generation run
    pub story_root: String,

    /// Scratch directory for in-progress voice clips
    pub scratch_dir: String,

    /// URL prefix of the static media mount
    pub public_prefix: String,

    /// S3-compatible object storage; local media root when absent
    pub r2: Option<R2Config>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct R2Config {
    pub account_id: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub bucket: String,

    /// Override for the derived `https://{account_id}.r2.cloudflarestorage.com`
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Lifetime of presigned GET URLs in seconds
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (debug, info, warn, error or a full EnvFilter)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logging: bool,

    /// Expose Prometheus metrics at /metrics
    pub metrics_enabled: bool,

    /// Service name for logs
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Story creations allowed per minute
    pub stories_per_minute: u32,

    /// Burst capacity
    pub burst: u32,

    /// Enable rate limiting
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 9700 }
fn default_request_timeout() -> u64 { 1800 }
fn default_shutdown_timeout() -> u64 { 5 }
fn default_username() -> String { "admin".to_string() }
fn default_session_ttl() -> u64 { 86_400 }
fn default_session_cookie() -> String { "session".to_string() }
fn default_database_url() -> String { "mysql://root@localhost:3306/fairytale".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_connect_retry() -> u64 { 60 }
fn default_d1_base_url() -> String { "https://api.cloudflare.com/client/v4".to_string() }
fn default_d1_timeout() -> u64 { 30 }
fn default_text_base_url() -> String { "https://api.deepseek.com".to_string() }
fn default_text_model() -> String { "deepseek-chat".to_string() }
fn default_temperature() -> f32 { 0.8 }
fn default_max_tokens() -> u32 { 8000 }
fn default_text_timeout() -> u64 { 300 }
fn default_seedream_url() -> String {
    "https://ark.cn-beijing.volces.com/api/v3/images/generations".to_string()
}
fn default_seedream_model() -> String { "doubao-seedream-4-0-250828".to_string() }
fn default_image_size() -> String { "1440x2560".to_string() }
fn default_image_timeout() -> u64 { 30 }
fn default_jimeng_endpoint() -> String { "https://visual.volcengineapi.com".to_string() }
fn default_jimeng_region() -> String { "cn-north-1".to_string() }
fn default_jimeng_service() -> String { "cv".to_string() }
fn default_poll_interval() -> u64 { 2 }
fn default_max_wait() -> u64 { 300 }
fn default_speech_url() -> String { "wss://dashscope.aliyuncs.com/api-ws/v1/inference/".to_string() }
fn default_speech_model() -> String { "cosyvoice-v2".to_string() }
fn default_voice() -> String { "longyuan_v2".to_string() }
fn default_audio_format() -> String { "mp3".to_string() }
fn default_sample_rate() -> u32 { 22_050 }
fn default_volume() -> u32 { 50 }
fn default_speech_timeout() -> u64 { 120 }
fn default_media_root() -> String { "media".to_string() }
fn default_story_root() -> String { "stories".to_string() }
fn default_scratch_dir() -> String { "tmp".to_string() }
fn default_public_prefix() -> String { "/v1/resource".to_string() }
fn default_presign_ttl() -> u64 { 7 * 24 * 3600 }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "fairytale".to_string() }
fn default_stories_per_minute() -> u32 { 2 }
fn default_burst() -> u32 { 2 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: String::new(),
            session_ttl_secs: default_session_ttl(),
            session_cookie: default_session_cookie(),
            require_login: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            connect_retry_secs: default_connect_retry(),
        }
    }
}

impl Default for D1Config {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            database_id: String::new(),
            api_key: String::new(),
            base_url: default_d1_base_url(),
            timeout_secs: default_d1_timeout(),
        }
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_text_base_url(),
            model: default_text_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_text_timeout(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: ImageProvider::default(),
            mirror_to_storage: true,
            seedream: SeedreamConfig::default(),
            jimeng: JimengConfig::default(),
        }
    }
}

impl Default for SeedreamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_seedream_url(),
            model: default_seedream_model(),
            size: default_image_size(),
            timeout_secs: default_image_timeout(),
        }
    }
}

impl Default for JimengConfig {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            endpoint: default_jimeng_endpoint(),
            region: default_jimeng_region(),
            service: default_jimeng_service(),
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
            timeout_secs: default_image_timeout(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            ws_url: default_speech_url(),
            model: default_speech_model(),
            voice: default_voice(),
            format: default_audio_format(),
            sample_rate: default_sample_rate(),
            volume: default_volume(),
            rate: 1.0,
            pitch: 1.0,
            timeout_secs: default_speech_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            story_root: default_story_root(),
            scratch_dir: default_scratch_dir(),
            public_prefix: default_public_prefix(),
            r2: None,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: true,
            metrics_enabled: true,
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            stories_per_minute: default_stories_per_minute(),
            burst: default_burst(),
            enabled: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__TEXT__API_KEY=sk-...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// `host:port` the gateway binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl R2Config {
    /// S3 endpoint for this account
    pub fn endpoint_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.r2.cloudflarestorage.com", self.account_id))
    }
}
