//! Database layer for Fairytale Studio
//!
//! Provides:
//! - SeaORM entity models for `story` and `chapter`
//! - The [`StoryStore`] persistence seam and its relational implementation
//! - Connection management with startup retries and table creation

pub mod models;
mod repository;
mod store;

pub use repository::Repository;
pub use store::{
    validate_page, ChapterView, NewChapter, NewStory, StoryDetail, StoryPage, StoryStore,
    StorySummary, MAX_PAGE_SIZE,
};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use models::{ChapterEntity, StoryEntity};
use backoff::{future::retry_notify, ExponentialBackoff};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityName, Schema,
};
use std::time::Duration;
use tracing::{info, warn};

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Connect using the configured URL.
    ///
    /// The database container often comes up after the service, so failed
    /// connects are retried with exponential backoff for up to
    /// `connect_retry_secs`.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let policy = connect_backoff(config);

        let conn = retry_notify(
            policy,
            || async {
                Database::connect(opts.clone())
                    .await
                    .map_err(backoff::Error::transient)
            },
            |e: DbErr, wait: Duration| {
                warn!(error = %e, retry_in_ms = wait.as_millis() as u64, "Database not reachable yet");
            },
        )
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("gave up after {}s: {}", config.connect_retry_secs, e),
        })?;

        info!("Database connection established");
        Ok(Self { conn })
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Create the `story` and `chapter` tables if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        let schema = Schema::new(backend);

        let mut story = schema.create_table_from_entity(StoryEntity);
        story.if_not_exists();
        self.conn.execute(backend.build(&story)).await?;

        let mut chapter = schema.create_table_from_entity(ChapterEntity);
        chapter.if_not_exists();
        self.conn.execute(backend.build(&chapter)).await?;

        info!(
            story = StoryEntity.table_name(),
            chapter = ChapterEntity.table_name(),
            "Schema ready"
        );
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Retry policy for the startup connect; zero seconds means a single attempt
fn connect_backoff(config: &DatabaseConfig) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(5),
        max_elapsed_time: Some(Duration::from_secs(config.connect_retry_secs)),
        ..Default::default()
    }
}
