//! Pipeline failures, tagged with the stage that failed

use fairytale_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("story text: {0}")]
    StoryText(#[source] AppError),

    #[error("image for chapter {chapter}: {source}")]
    ChapterImage {
        chapter: usize,
        #[source]
        source: AppError,
    },

    #[error("media upload: {0}")]
    MediaUpload(#[source] AppError),

    #[error("snapshot: {0}")]
    Snapshot(#[source] AppError),

    #[error("persist: {0}")]
    Persist(#[source] AppError),
}

impl GenerationError {
    /// Stage label, matching the pipeline metrics
    pub fn stage(&self) -> &'static str {
        match self {
            GenerationError::StoryText(_) => "story_text",
            GenerationError::ChapterImage { .. } => "chapter_image",
            GenerationError::MediaUpload(_) => "media_upload",
            GenerationError::Snapshot(_) => "snapshot",
            GenerationError::Persist(_) => "persist",
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Persist(_) => AppError::StoryPersistence {
                message: err.to_string(),
            },
            _ => AppError::StoryGeneration {
                message: err.to_string(),
            },
        }
    }
}
