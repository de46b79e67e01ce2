//! Fairytale Studio Common Library
//!
//! Shared code for the gateway and the generation pipeline:
//! - Configuration management
//! - Error types and handling
//! - Relational persistence (SeaORM) and the D1 SQL-over-HTTP client
//! - Media storage (local media root or S3-compatible object storage)
//! - Session authentication
//! - Metrics and observability
//! - Daily theme selection and JSON extraction helpers

pub mod auth;
pub mod config;
pub mod d1;
pub mod db;
pub mod errors;
pub mod json;
pub mod metrics;
pub mod storage;
pub mod theme;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository, StoryStore};
pub use errors::{AppError, Result};
pub use storage::MediaStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
