//! JSON snapshot of each generated story, written before persistence

use crate::text::GeneratedStory;
use chrono::NaiveDate;
use fairytale_common::errors::{AppError, Result};
use fairytale_common::json::unescape_ampersands;
use std::path::{Path, PathBuf};
use tracing::info;

/// `{story_root}/story_{YYYY-MM-DD}.json`
pub fn snapshot_path(story_root: &Path, date: NaiveDate) -> PathBuf {
    story_root.join(format!("story_{}.json", date.format("%Y-%m-%d")))
}

/// Write the pretty-printed story, creating `story_root` if needed.
///
/// A second run on the same day overwrites the earlier snapshot.
pub async fn write_snapshot(
    story_root: &Path,
    story: &GeneratedStory,
    date: NaiveDate,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(story_root).await.map_err(|e| AppError::Storage {
        message: format!("create {}: {}", story_root.display(), e),
    })?;

    let json = unescape_ampersands(&serde_json::to_string_pretty(story)?);
    let path = snapshot_path(story_root, date);
    tokio::fs::write(&path, json).await.map_err(|e| AppError::Storage {
        message: format!("write {}: {}", path.display(), e),
    })?;

    info!(path = %path.display(), title = %story.title, "Story snapshot written");
    Ok(path)
}
