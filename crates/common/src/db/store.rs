//! Backend-neutral story persistence
//!
//! The pipeline and the gateway only see [`StoryStore`]; the relational
//! [`Repository`](super::Repository) and the remote [`D1Store`](crate::d1::D1Store)
//! both implement it.

use crate::db::models::ReviewStatus;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Largest page size accepted by `list_stories`
pub const MAX_PAGE_SIZE: u64 = 100;

/// A generated story ready to be written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStory {
    pub title: String,
    pub author: String,
    pub description: String,
    pub music_style: String,
    pub status: ReviewStatus,
    pub chapters: Vec<NewChapter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChapter {
    pub title: String,
    pub content: String,
    pub image_prompt: String,
    pub image_path: String,
    pub voice_path: String,
}

/// One row of the story listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySummary {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub description: String,
    pub music_style: String,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterView {
    pub id: i32,
    pub title: String,
    pub content: String,
    pub image_prompt: String,
    pub image_path: String,
    pub voice_path: String,
}

/// A story together with its chapters, ordered by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryDetail {
    #[serde(flatten)]
    pub story: StorySummary,
    pub chapters: Vec<ChapterView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryPage {
    pub items: Vec<StorySummary>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

/// Persistence seam for generated stories
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Short name used in logs and metrics labels
    fn backend_name(&self) -> &'static str;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<()>;

    /// Insert the story row, then every chapter row pointing at it.
    /// Returns the new story id.
    async fn save(&self, story: &NewStory) -> Result<i32>;

    /// Stories newest first
    async fn list_stories(&self, offset: u64, limit: u64) -> Result<StoryPage>;

    async fn find_story(&self, id: i32) -> Result<Option<StoryDetail>>;
}

/// Reject page sizes the backends should never see
pub fn validate_page(limit: u64) -> Result<()> {
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(AppError::Validation {
            message: format!("limit must be between 1 and {}", MAX_PAGE_SIZE),
            field: Some("limit".to_string()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_page() {
        assert!(validate_page(1).is_ok());
        assert!(validate_page(MAX_PAGE_SIZE).is_ok());
        assert!(validate_page(0).is_err());
        assert!(validate_page(MAX_PAGE_SIZE + 1).is_err());
    }

    #[test]
    fn test_detail_serializes_flat() {
        let detail = StoryDetail {
            story: StorySummary {
                id: 3,
                title: "月亮船".to_string(),
                author: "AI".to_string(),
                description: "d".to_string(),
                music_style: "lullaby".to_string(),
                status: ReviewStatus::Pending,
                created_at: Utc::now(),
            },
            chapters: vec![],
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["status"], "pending");
        assert!(value["chapters"].as_array().unwrap().is_empty());
    }
}
