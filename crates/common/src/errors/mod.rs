//! Error types for Fairytale Studio
//!
//! Provides a single error enum with:
//! - Distinct variants per failure source (vendor, storage, database)
//! - HTTP status code mapping
//! - Machine-readable error codes
//! - The static user-facing message rendered in the response envelope

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// User-facing messages. Every failure collapses into one of these.
pub mod messages {
    pub const BAD_REQUEST: &str = "请求有误";
    pub const LOGIN_REQUIRED: &str = "请登录后再试";
    pub const LOGIN_FAILED: &str = "用户名或密码错误";
    pub const NOT_FOUND: &str = "资源不存在";
    pub const RATE_LIMITED: &str = "请求过于频繁，请稍候再试";
    pub const STORY_FAILED: &str = "生成故事失败";
    pub const STORY_SAVE_FAILED: &str = "添加故事失败";
    pub const VOICE_FAILED: &str = "生成语音失败";
    pub const INTERNAL: &str = "服务器报错，请稍候再试";

    pub const LOGIN_OK: &str = "登录成功";
    pub const STORY_CREATED: &str = "生成故事成功";
    pub const VOICE_CREATED: &str = "生成语音成功";
    pub const OK: &str = "ok";
}

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,

    // Resource errors (4xxx)
    StoryNotFound,

    // Rate limiting (6xxx)
    RateLimited,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    RemoteSqlError,

    // External service errors (8xxx)
    UpstreamError,
    UpstreamTimeout,
    MalformedUpstreamResponse,
    StorageError,
    StreamError,

    // Pipeline errors (85xx)
    StoryGenerationFailed,
    StoryPersistenceFailed,
    VoiceGenerationFailed,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::Unauthorized => 2001,

            ErrorCode::StoryNotFound => 4002,

            ErrorCode::RateLimited => 6001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::RemoteSqlError => 7004,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::UpstreamTimeout => 8002,
            ErrorCode::MalformedUpstreamResponse => 8003,
            ErrorCode::StorageError => 8007,
            ErrorCode::StreamError => 8008,

            ErrorCode::StoryGenerationFailed => 8501,
            ErrorCode::StoryPersistenceFailed => 8502,
            ErrorCode::VoiceGenerationFailed => 8503,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Resource errors
    #[error("Story not found: {id}")]
    StoryNotFound { id: i32 },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} stories per minute")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Remote SQL error: {message}")]
    RemoteSql { message: String },

    // External service errors
    #[error("{service} error: {message}")]
    Upstream { service: String, message: String },

    #[error("{service} timed out after {timeout_ms}ms")]
    UpstreamTimeout { service: String, timeout_ms: u64 },

    #[error("{service} returned an unusable response: {message}")]
    MalformedResponse { service: String, message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Stream error: {message}")]
    Stream { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Pipeline outcomes surfaced to HTTP callers
    #[error("Story generation failed: {message}")]
    StoryGeneration { message: String },

    #[error("Story persistence failed: {message}")]
    StoryPersistence { message: String },

    #[error("Voice generation failed: {message}")]
    VoiceGeneration { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a vendor-side failure
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Upstream {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a vendor response that could not be interpreted
    pub fn malformed(service: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::MalformedResponse {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::StoryNotFound { .. } => ErrorCode::StoryNotFound,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::RemoteSql { .. } => ErrorCode::RemoteSqlError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::UpstreamTimeout { .. } => ErrorCode::UpstreamTimeout,
            AppError::MalformedResponse { .. } => ErrorCode::MalformedUpstreamResponse,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::Stream { .. } => ErrorCode::StreamError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::StoryGeneration { .. } => ErrorCode::StoryGenerationFailed,
            AppError::StoryPersistence { .. } => ErrorCode::StoryPersistenceFailed,
            AppError::VoiceGeneration { .. } => ErrorCode::VoiceGenerationFailed,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            AppError::StoryNotFound { .. } => StatusCode::NOT_FOUND,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_) |
            AppError::DatabaseConnection { .. } |
            AppError::Storage { .. } |
            AppError::StoryPersistence { .. } |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::RemoteSql { .. } |
            AppError::Upstream { .. } |
            AppError::MalformedResponse { .. } |
            AppError::Stream { .. } |
            AppError::HttpClient(_) |
            AppError::StoryGeneration { .. } |
            AppError::VoiceGeneration { .. } => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            AppError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Static message shown to the caller
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Validation { .. } | AppError::InvalidFormat { .. } => messages::BAD_REQUEST,
            AppError::Unauthorized { .. } => messages::LOGIN_REQUIRED,
            AppError::StoryNotFound { .. } => messages::NOT_FOUND,
            AppError::RateLimited { .. } => messages::RATE_LIMITED,
            AppError::StoryGeneration { .. } => messages::STORY_FAILED,
            AppError::StoryPersistence { .. } => messages::STORY_SAVE_FAILED,
            AppError::VoiceGeneration { .. } => messages::VOICE_FAILED,
            _ => messages::INTERNAL,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Response envelope shared by every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl<T> ApiResponse<T> {
    /// Successful envelope carrying `data`
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            data: Some(data),
            message: message.into(),
            error: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let detail = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %detail,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %detail,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body: ApiResponse<serde_json::Value> = ApiResponse {
            data: None,
            message: self.user_message().to_string(),
            error: Some(ErrorDetails { code, detail }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
    }
}
