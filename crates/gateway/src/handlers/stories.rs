//! Story handlers

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use serde::Deserialize;

use super::bad_request;
use crate::AppState;
use fairytale_common::{
    db::{StoryDetail, StoryPage},
    errors::{messages, AppError, ApiResponse, Result},
};
use fairytale_generation::GeneratedStory;

const DEFAULT_PAGE_SIZE: u64 = 20;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub offset: u64,

    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    DEFAULT_PAGE_SIZE
}

/// Run the pipeline for today's theme.
///
/// Synchronous: the response is sent once the story is persisted.
pub async fn add_story(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<GeneratedStory>>> {
    let story = state.pipeline.run_today().await.map_err(|e| {
        tracing::error!(stage = e.stage(), error = %e, "Story run failed");
        AppError::from(e)
    })?;

    tracing::info!(
        story_id = ?story.story_id,
        title = %story.title,
        "Story added"
    );

    Ok(Json(ApiResponse::ok(story, messages::STORY_CREATED)))
}

/// Newest stories first
pub async fn list_stories(
    State(state): State<AppState>,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<StoryPage>>> {
    let Query(query) = query.map_err(bad_request)?;

    let page = state
        .pipeline
        .store()
        .list_stories(query.offset, query.limit)
        .await?;

    Ok(Json(ApiResponse::ok(page, messages::OK)))
}

/// One story with its chapters
pub async fn get_story(
    State(state): State<AppState>,
    id: std::result::Result<Path<i32>, PathRejection>,
) -> Result<Json<ApiResponse<StoryDetail>>> {
    let Path(id) = id.map_err(bad_request)?;

    let story = state
        .pipeline
        .store()
        .find_story(id)
        .await?
        .ok_or(AppError::StoryNotFound { id })?;

    Ok(Json(ApiResponse::ok(story, messages::OK)))
}
