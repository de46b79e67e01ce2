//! Cloudflare D1 persistence
//!
//! D1 exposes SQLite over a JSON HTTP API. Every statement is one POST to
//! `/accounts/{account}/d1/database/{database}/query`, so a story save is a
//! sequence of independent calls: the story row first, then one call per
//! chapter carrying the story's `last_row_id`.

use crate::config::D1Config;
use crate::db::models::ReviewStatus;
use crate::db::{
    validate_page, ChapterView, NewStory, StoryDetail, StoryPage, StoryStore, StorySummary,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

const SERVICE: &str = "d1";

const INSERT_STORY: &str = "INSERT INTO story (title, author, description, music_style, status, created_at, updated_at, deleted_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_CHAPTER: &str = "INSERT INTO chapter (story_id, title, content, image_prompt, image_path, voice_path, created_at, updated_at, deleted_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

const COUNT_STORIES: &str = "SELECT COUNT(*) AS total FROM story WHERE deleted_at IS NULL";

const LIST_STORIES: &str = "SELECT id, title, author, description, music_style, status, created_at FROM story WHERE deleted_at IS NULL ORDER BY id DESC LIMIT ? OFFSET ?";

const FIND_STORY: &str = "SELECT id, title, author, description, music_style, status, created_at FROM story WHERE id = ? AND deleted_at IS NULL";

const FIND_CHAPTERS: &str = "SELECT id, title, content, image_prompt, image_path, voice_path FROM chapter WHERE story_id = ? ORDER BY id ASC";

#[derive(Debug, Serialize)]
struct D1QueryRequest<'a> {
    sql: &'a str,
    params: &'a [Value],
}

/// Envelope returned by the query endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct D1QueryResponse {
    #[serde(default)]
    pub errors: Vec<D1Message>,
    #[serde(default)]
    pub messages: Vec<D1Message>,
    #[serde(default)]
    pub result: Vec<D1QueryResult>,
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct D1Message {
    pub code: i64,
    pub message: String,
}

/// Outcome of one statement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct D1QueryResult {
    #[serde(default)]
    pub meta: D1Meta,
    #[serde(default)]
    pub results: Vec<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct D1Meta {
    #[serde(default)]
    pub changed_db: bool,
    #[serde(default)]
    pub changes: i64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub last_row_id: i64,
    #[serde(default)]
    pub rows_read: i64,
    #[serde(default)]
    pub rows_written: i64,
    #[serde(default)]
    pub size_after: i64,
}

impl D1QueryResponse {
    /// Fold the envelope into the first statement result or an error
    pub fn into_result(self) -> Result<D1QueryResult> {
        if !self.success {
            let detail = self
                .errors
                .first()
                .map(|e| format!("{} (code {})", e.message, e.code))
                .unwrap_or_else(|| "query failed without an error message".to_string());
            return Err(AppError::RemoteSql { message: detail });
        }

        self.result.into_iter().next().ok_or_else(|| AppError::RemoteSql {
            message: "query succeeded but returned no result".to_string(),
        })
    }
}

/// Thin client for the D1 query endpoint
pub struct D1Client {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl D1Client {
    pub fn new(config: &D1Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: query_endpoint(config),
            api_key: config.api_key.clone(),
        })
    }

    /// Run one parameterised statement
    #[instrument(skip(self, params), fields(sql = %sql))]
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<D1QueryResult> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&D1QueryRequest { sql, params })
            .send()
            .await
            .map_err(|e| AppError::upstream(SERVICE, format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = %status, "D1 responded");

        // Failed statements still come back with a JSON envelope
        let envelope: D1QueryResponse = serde_json::from_str(&body).map_err(|e| {
            AppError::malformed(SERVICE, format!("status {}: {} ({})", status, e, body))
        })?;

        envelope.into_result()
    }
}

/// `{base_url}/accounts/{account}/d1/database/{database}/query`
pub fn query_endpoint(config: &D1Config) -> String {
    format!(
        "{}/accounts/{}/d1/database/{}/query",
        config.base_url.trim_end_matches('/'),
        config.account_id,
        config.database_id
    )
}

/// [`StoryStore`] backed by D1
pub struct D1Store {
    client: D1Client,
}

impl D1Store {
    pub fn new(client: D1Client) -> Self {
        Self { client }
    }
}

fn story_params(story: &NewStory, now: i64) -> Vec<Value> {
    vec![
        json!(story.title),
        json!(story.author),
        json!(story.description),
        json!(story.music_style),
        json!(story.status.code()),
        json!(now),
        json!(now),
        Value::Null,
    ]
}

#[derive(Debug, Deserialize)]
struct StoryRow {
    id: i32,
    title: String,
    author: String,
    description: String,
    music_style: String,
    status: i64,
    created_at: i64,
}

#[derive(Debug, Deserialize)]
struct ChapterRow {
    id: i32,
    title: String,
    content: String,
    image_prompt: String,
    image_path: String,
    voice_path: String,
}

impl TryFrom<StoryRow> for StorySummary {
    type Error = AppError;

    fn try_from(row: StoryRow) -> Result<Self> {
        let status = ReviewStatus::from_code(row.status).ok_or_else(|| {
            AppError::malformed(SERVICE, format!("unknown story status {}", row.status))
        })?;
        let created_at = DateTime::<Utc>::from_timestamp(row.created_at, 0).ok_or_else(|| {
            AppError::malformed(SERVICE, format!("bad timestamp {}", row.created_at))
        })?;

        Ok(Self {
            id: row.id,
            title: row.title,
            author: row.author,
            description: row.description,
            music_style: row.music_style,
            status,
            created_at,
        })
    }
}

impl From<ChapterRow> for ChapterView {
    fn from(row: ChapterRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            content: row.content,
            image_prompt: row.image_prompt,
            image_path: row.image_path,
            voice_path: row.voice_path,
        }
    }
}

fn decode_rows<T: serde::de::DeserializeOwned>(result: D1QueryResult) -> Result<Vec<T>> {
    result
        .results
        .into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row))
                .map_err(|e| AppError::malformed(SERVICE, format!("unexpected row: {}", e)))
        })
        .collect()
}

#[async_trait]
impl StoryStore for D1Store {
    fn backend_name(&self) -> &'static str {
        "d1"
    }

    async fn ping(&self) -> Result<()> {
        self.client.query("SELECT 1", &[]).await.map(|_| ())
    }

    #[instrument(skip(self, story), fields(title = %story.title))]
    async fn save(&self, story: &NewStory) -> Result<i32> {
        let now = Utc::now().timestamp();

        let inserted = self.client.query(INSERT_STORY, &story_params(story, now)).await?;
        let story_id = i32::try_from(inserted.meta.last_row_id).map_err(|_| {
            AppError::malformed(SERVICE, format!("last_row_id {} out of range", inserted.meta.last_row_id))
        })?;
        if story_id <= 0 {
            return Err(AppError::malformed(SERVICE, "story insert returned no row id"));
        }

        for chapter in &story.chapters {
            let params = [
                json!(story_id),
                json!(chapter.title),
                json!(chapter.content),
                json!(chapter.image_prompt),
                json!(chapter.image_path),
                json!(chapter.voice_path),
                json!(now),
                json!(now),
                Value::Null,
            ];
            self.client.query(INSERT_CHAPTER, &params).await?;
        }

        debug!(story_id, chapters = story.chapters.len(), "Story written to D1");
        Ok(story_id)
    }

    async fn list_stories(&self, offset: u64, limit: u64) -> Result<StoryPage> {
        validate_page(limit)?;

        let counted = self.client.query(COUNT_STORIES, &[]).await?;
        let total = counted
            .results
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let rows = self
            .client
            .query(LIST_STORIES, &[json!(limit), json!(offset)])
            .await?;
        let items = decode_rows::<StoryRow>(rows)?
            .into_iter()
            .map(StorySummary::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(StoryPage {
            items,
            total,
            offset,
            limit,
        })
    }

    async fn find_story(&self, id: i32) -> Result<Option<StoryDetail>> {
        let found = self.client.query(FIND_STORY, &[json!(id)]).await?;
        let Some(row) = decode_rows::<StoryRow>(found)?.into_iter().next() else {
            return Ok(None);
        };

        let chapters = self.client.query(FIND_CHAPTERS, &[json!(id)]).await?;
        let chapters = decode_rows::<ChapterRow>(chapters)?
            .into_iter()
            .map(ChapterView::from)
            .collect();

        Ok(Some(StoryDetail {
            story: row.try_into()?,
            chapters,
        }))
    }
}
