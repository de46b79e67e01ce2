//! Relational story repository
//!
//! Writes a story and its chapters in a single transaction so a failed
//! chapter insert never leaves an orphaned story row.

use crate::db::models::*;
use crate::db::store::{
    validate_page, ChapterView, NewStory, StoryDetail, StoryPage, StoryStore, StorySummary,
};
use crate::db::DbPool;
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, instrument};

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    // ========================================================================
    // Story Operations
    // ========================================================================

    /// Insert a story and all of its chapters
    #[instrument(skip(self, story), fields(title = %story.title, chapters = story.chapters.len()))]
    pub async fn create_story_with_chapters(&self, story: &NewStory) -> Result<Story> {
        let now = chrono::Utc::now();
        let txn = self.conn().begin().await?;

        let saved = StoryActiveModel {
            title: Set(story.title.clone()),
            author: Set(story.author.clone()),
            description: Set(story.description.clone()),
            music_style: Set(story.music_style.clone()),
            status: Set(story.status),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        for chapter in &story.chapters {
            ChapterActiveModel {
                story_id: Set(saved.id),
                title: Set(chapter.title.clone()),
                content: Set(chapter.content.clone()),
                image_prompt: Set(chapter.image_prompt.clone()),
                image_path: Set(chapter.image_path.clone()),
                voice_path: Set(chapter.voice_path.clone()),
                created_at: Set(now),
                updated_at: Set(now),
                deleted_at: Set(None),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        debug!(story_id = saved.id, "Story committed");
        Ok(saved)
    }

    /// Find a story by ID, skipping soft-deleted rows
    pub async fn find_story_by_id(&self, id: i32) -> Result<Option<Story>> {
        StoryEntity::find_by_id(id)
            .filter(StoryColumn::DeletedAt.is_null())
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Chapters of a story in insertion order
    pub async fn get_chapters_by_story(&self, story_id: i32) -> Result<Vec<Chapter>> {
        ChapterEntity::find()
            .filter(ChapterColumn::StoryId.eq(story_id))
            .order_by_asc(ChapterColumn::Id)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Page of stories, newest first, plus the total row count
    pub async fn list_story_rows(&self, offset: u64, limit: u64) -> Result<(Vec<Story>, u64)> {
        let total = StoryEntity::find()
            .filter(StoryColumn::DeletedAt.is_null())
            .count(self.conn())
            .await?;

        let rows = StoryEntity::find()
            .filter(StoryColumn::DeletedAt.is_null())
            .order_by_desc(StoryColumn::Id)
            .offset(offset)
            .limit(limit)
            .all(self.conn())
            .await?;

        Ok((rows, total))
    }
}

impl From<Story> for StorySummary {
    fn from(story: Story) -> Self {
        Self {
            id: story.id,
            title: story.title,
            author: story.author,
            description: story.description,
            music_style: story.music_style,
            status: story.status,
            created_at: story.created_at,
        }
    }
}

impl From<Chapter> for ChapterView {
    fn from(chapter: Chapter) -> Self {
        Self {
            id: chapter.id,
            title: chapter.title,
            content: chapter.content,
            image_prompt: chapter.image_prompt,
            image_path: chapter.image_path,
            voice_path: chapter.voice_path,
        }
    }
}

#[async_trait]
impl StoryStore for Repository {
    fn backend_name(&self) -> &'static str {
        "database"
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    async fn save(&self, story: &NewStory) -> Result<i32> {
        let saved = self.create_story_with_chapters(story).await?;
        Ok(saved.id)
    }

    async fn list_stories(&self, offset: u64, limit: u64) -> Result<StoryPage> {
        validate_page(limit)?;
        let (rows, total) = self.list_story_rows(offset, limit).await?;

        Ok(StoryPage {
            items: rows.into_iter().map(StorySummary::from).collect(),
            total,
            offset,
            limit,
        })
    }

    async fn find_story(&self, id: i32) -> Result<Option<StoryDetail>> {
        let Some(story) = self.find_story_by_id(id).await? else {
            return Ok(None);
        };
        let chapters = self.get_chapters_by_story(id).await?;

        Ok(Some(StoryDetail {
            story: story.into(),
            chapters: chapters.into_iter().map(ChapterView::from).collect(),
        }))
    }
}
