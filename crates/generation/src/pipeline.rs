//! Story generation pipeline
//!
//! story text -> for each chapter { image -> voice } -> snapshot -> persist
//!
//! Runs sequentially. Image failures abort the run; narration failures
//! only leave the chapter without a voice clip. Media produced before a
//! failure is left in place.

use crate::errors::GenerationError;
use crate::image::ImageGenerator;
use crate::snapshot::write_snapshot;
use crate::speech::SpeechSynthesizer;
use crate::text::{GeneratedStory, StoryWriter};
use chrono::{Local, NaiveDate};
use fairytale_common::config::AppConfig;
use fairytale_common::db::models::ReviewStatus;
use fairytale_common::db::{NewChapter, NewStory, StoryStore};
use fairytale_common::errors::{AppError, Result};
use fairytale_common::metrics::{record_story_generated, record_vendor_request, StageTimer};
use fairytale_common::storage::{content_type_for, validate_key, MediaStore};
use fairytale_common::theme::{daily_theme, illustration_styles};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Prepended to every chapter prompt after the first so the vendor keeps
/// the first illustration's style and characters
pub const CONSISTENCY_PREFIX: &str =
    "与所给图片中的风格以及人物保持一致，场景无需保持一致。绘制如下场景：";

const MIRROR_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "webp", "gif"];

/// Filesystem and mirroring settings
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub story_root: PathBuf,
    pub scratch_dir: PathBuf,
    pub media_root: PathBuf,
    pub mirror_images: bool,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            story_root: PathBuf::from(&config.storage.story_root),
            scratch_dir: PathBuf::from(&config.storage.scratch_dir),
            media_root: PathBuf::from(&config.storage.media_root),
            mirror_images: config.image.mirror_to_storage,
        }
    }
}

/// Vendor seams the pipeline drives
#[derive(Clone)]
pub struct PipelineVendors {
    pub writer: Arc<dyn StoryWriter>,
    pub images: Arc<dyn ImageGenerator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub media: Arc<dyn MediaStore>,
    pub store: Arc<dyn StoryStore>,
}

/// Prompt actually sent for a chapter
pub fn chapter_prompt(prompt: &str, has_reference: bool) -> String {
    if has_reference {
        format!("{}{}", CONSISTENCY_PREFIX, prompt)
    } else {
        prompt.to_string()
    }
}

/// Storage key for a mirrored image; keeps a known extension from the URL
pub fn mirror_key(image_url: &str) -> String {
    let ext = url::Url::parse(image_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()))
        .filter(|ext| MIRROR_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "jpeg".to_string());

    format!("images/{}.{}", Uuid::new_v4(), ext)
}

fn to_new_story(story: &GeneratedStory) -> NewStory {
    NewStory {
        title: story.title.clone(),
        author: story.author.clone(),
        description: story.description.clone(),
        music_style: story.music_style.clone(),
        status: ReviewStatus::Pending,
        chapters: story
            .chapters
            .iter()
            .map(|chapter| NewChapter {
                title: chapter.title.clone(),
                content: chapter.content.clone(),
                image_prompt: chapter.image_prompt.clone(),
                image_path: chapter.image_path.clone(),
                voice_path: chapter.voice_path.clone(),
            })
            .collect(),
    }
}

pub struct StoryPipeline {
    vendors: PipelineVendors,
    settings: PipelineSettings,
    http: reqwest::Client,
}

impl StoryPipeline {
    pub fn new(vendors: PipelineVendors, settings: PipelineSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            vendors,
            settings,
            http,
        })
    }

    pub fn store(&self) -> &Arc<dyn StoryStore> {
        &self.vendors.store
    }

    /// Generate, snapshot and persist today's story
    pub async fn run_today(&self) -> std::result::Result<GeneratedStory, GenerationError> {
        self.run(Local::now().date_naive()).await
    }

    #[instrument(skip(self), fields(theme = daily_theme(date)))]
    pub async fn run(&self, date: NaiveDate) -> std::result::Result<GeneratedStory, GenerationError> {
        let run_timer = StageTimer::start("run");
        let theme = daily_theme(date);

        let timer = StageTimer::start("story_text");
        let mut story = self
            .vendors
            .writer
            .write_story(theme, date, illustration_styles())
            .await
            .map_err(GenerationError::StoryText)?;
        timer.finish();
        info!(title = %story.title, chapters = story.chapters.len(), "Story text ready");

        // Vendor URL of the first illustration, used as the style reference
        let mut reference: Option<String> = None;

        for (index, chapter) in story.chapters.iter_mut().enumerate() {
            let number = index + 1;
            let prompt = chapter_prompt(&chapter.image_prompt, reference.is_some());

            let timer = StageTimer::start("chapter_image");
            let image_url = self
                .vendors
                .images
                .generate(&prompt, reference.as_deref())
                .await
                .map_err(|source| GenerationError::ChapterImage {
                    chapter: number,
                    source,
                })?;
            timer.finish();

            chapter.image_path = if self.settings.mirror_images {
                self.mirror_image(&image_url)
                    .await
                    .map_err(GenerationError::MediaUpload)?
            } else {
                image_url.clone()
            };

            if reference.is_none() {
                reference = Some(image_url);
            }

            let timer = StageTimer::start("chapter_voice");
            match self.narrate(&chapter.content).await {
                Ok(location) => chapter.voice_path = location,
                Err(e) => warn!(chapter = number, error = %e, "Narration failed, continuing without voice"),
            }
            timer.finish();
        }

        let timer = StageTimer::start("snapshot");
        write_snapshot(&self.settings.story_root, &story, date)
            .await
            .map_err(GenerationError::Snapshot)?;
        timer.finish();

        let timer = StageTimer::start("persist");
        let story_id = self
            .vendors
            .store
            .save(&to_new_story(&story))
            .await
            .map_err(GenerationError::Persist)?;
        timer.finish();

        story.story_id = Some(story_id);
        record_story_generated(self.vendors.store.backend_name());
        info!(
            story_id,
            elapsed_secs = run_timer.finish(),
            "Story generated"
        );
        Ok(story)
    }

    /// Copy a vendor image into media storage
    async fn mirror_image(&self, image_url: &str) -> Result<String> {
        let response = self
            .http
            .get(image_url)
            .send()
            .await
            .map_err(|e| AppError::upstream("image-download", format!("{}: {}", image_url, e)))?;

        let ok = response.status().is_success();
        record_vendor_request("image-download", ok);
        if !ok {
            return Err(AppError::upstream(
                "image-download",
                format!("{} returned {}", image_url, response.status()),
            ));
        }

        let bytes = response.bytes().await?.to_vec();
        let key = mirror_key(image_url);
        self.vendors
            .media
            .put(&key, bytes, content_type_for(&key))
            .await
    }

    /// Synthesize into the scratch dir, upload, then drop the scratch file
    async fn narrate(&self, text: &str) -> Result<String> {
        let name = format!("{}.{}", Uuid::new_v4(), self.vendors.speech.format());
        let scratch = self.settings.scratch_dir.join(&name);

        let synthesized = self
            .vendors
            .speech
            .synthesize(&[text.to_string()], &scratch)
            .await;
        let uploaded = match synthesized {
            Ok(()) => {
                let key = format!("voices/{}", name);
                match tokio::fs::read(&scratch).await {
                    Ok(bytes) => self.vendors.media.put(&key, bytes, content_type_for(&key)).await,
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e),
        };

        remove_scratch(&scratch).await;
        uploaded
    }

    /// Synthesize arbitrary text to `{media_root}/{filename}`
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn generate_voice(&self, text: &str, filename: &str) -> Result<PathBuf> {
        if text.trim().is_empty() {
            return Err(AppError::Validation {
                message: "text must not be empty".to_string(),
                field: Some("text".to_string()),
            });
        }
        validate_key(filename)?;

        let output = self.settings.media_root.join(filename);
        let timer = StageTimer::start("voice");
        self.vendors
            .speech
            .synthesize(&[text.to_string()], &output)
            .await
            .map_err(|e| AppError::VoiceGeneration {
                message: e.to_string(),
            })?;
        timer.finish();

        info!(path = %output.display(), "Voice generated");
        Ok(output)
    }
}

async fn remove_scratch(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not remove scratch file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MockImageGenerator;
    use crate::speech::MockSpeechSynthesizer;
    use crate::text::MockStoryWriter;
    use async_trait::async_trait;
    use fairytale_common::db::{StoryDetail, StoryPage};
    use fairytale_common::storage::LocalMediaStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory store capturing saved stories
    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<NewStory>>,
        fail: bool,
    }

    #[async_trait]
    impl StoryStore for RecordingStore {
        fn backend_name(&self) -> &'static str {
            "memory"
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn save(&self, story: &NewStory) -> Result<i32> {
            if self.fail {
                return Err(AppError::RemoteSql {
                    message: "no such table: story".to_string(),
                });
            }
            let mut saved = self.saved.lock().unwrap();
            saved.push(story.clone());
            Ok(saved.len() as i32)
        }

        async fn list_stories(&self, offset: u64, limit: u64) -> Result<StoryPage> {
            Ok(StoryPage {
                items: vec![],
                total: 0,
                offset,
                limit,
            })
        }

        async fn find_story(&self, _id: i32) -> Result<Option<StoryDetail>> {
            Ok(None)
        }
    }

    struct Fixture {
        dir: TempDir,
        images: Arc<MockImageGenerator>,
        store: Arc<RecordingStore>,
        pipeline: StoryPipeline,
    }

    fn fixture(
        writer: MockStoryWriter,
        images: MockImageGenerator,
        speech: MockSpeechSynthesizer,
        store: RecordingStore,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = PipelineSettings {
            story_root: dir.path().join("stories"),
            scratch_dir: dir.path().join("tmp"),
            media_root: dir.path().join("media"),
            mirror_images: false,
        };
        let images = Arc::new(images);
        let store = Arc::new(store);
        let media = Arc::new(LocalMediaStore::new(&settings.media_root, "/v1/resource").unwrap());

        let pipeline = StoryPipeline::new(
            PipelineVendors {
                writer: Arc::new(writer),
                images: images.clone(),
                speech: Arc::new(speech),
                media,
                store: store.clone(),
            },
            settings,
        )
        .unwrap();

        Fixture {
            dir,
            images,
            store,
            pipeline,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 16).unwrap()
    }

    #[test]
    fn test_chapter_prompt() {
        assert_eq!(chapter_prompt("小猫", false), "小猫");
        assert_eq!(chapter_prompt("小猫", true), format!("{}小猫", CONSISTENCY_PREFIX));
    }

    #[test]
    fn test_mirror_key_extension() {
        assert!(mirror_key("https://cdn.test/a/b/img.PNG?sig=1").ends_with(".png"));
        assert!(mirror_key("https://cdn.test/a/b/img.jpeg").ends_with(".jpeg"));
        assert!(mirror_key("https://cdn.test/a/b/img").ends_with(".jpeg"));
        assert!(mirror_key("https://cdn.test/a/b/img.exe").ends_with(".jpeg"));
        assert!(mirror_key("not a url").starts_with("images/"));
    }

    #[tokio::test]
    async fn test_later_chapters_reference_first_image() {
        let f = fixture(
            MockStoryWriter::new(3),
            MockImageGenerator::new("https://img.test"),
            MockSpeechSynthesizer::new(),
            RecordingStore::default(),
        );

        let story = f.pipeline.run(date()).await.unwrap();
        let calls = f.images.calls();

        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1, None);
        assert!(!calls[0].0.starts_with(CONSISTENCY_PREFIX));
        for call in &calls[1..] {
            assert_eq!(call.1.as_deref(), Some("https://img.test/image-0.jpeg"));
            assert!(call.0.starts_with(CONSISTENCY_PREFIX));
        }

        assert_eq!(story.chapters[0].image_path, "https://img.test/image-0.jpeg");
        assert_eq!(story.chapters[2].image_path, "https://img.test/image-2.jpeg");
        // The stored prompt is the model's, without the instruction prefix
        assert!(!story.chapters[1].image_prompt.starts_with(CONSISTENCY_PREFIX));
    }

    #[tokio::test]
    async fn test_run_persists_and_snapshots() {
        let f = fixture(
            MockStoryWriter::new(2),
            MockImageGenerator::new("https://img.test"),
            MockSpeechSynthesizer::new(),
            RecordingStore::default(),
        );

        let story = f.pipeline.run(date()).await.unwrap();
        assert_eq!(story.story_id, Some(1));
        assert_eq!(story.created_at, "2025-03-16");

        let saved = f.store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].status, ReviewStatus::Pending);
        assert_eq!(saved[0].chapters.len(), 2);

        let snapshot = f.dir.path().join("stories/story_2025-03-16.json");
        assert!(snapshot.exists());

        for chapter in &story.chapters {
            assert!(chapter.voice_path.starts_with("/v1/resource/voices/"));
            let key = chapter.voice_path.trim_start_matches("/v1/resource/");
            assert!(f.dir.path().join("media").join(key).exists());
        }

        // Scratch clips are removed after upload
        let leftovers = std::fs::read_dir(f.dir.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_voice_failure_is_not_fatal() {
        let f = fixture(
            MockStoryWriter::new(2),
            MockImageGenerator::new("https://img.test"),
            MockSpeechSynthesizer::failing(),
            RecordingStore::default(),
        );

        let story = tokio_test::assert_ok!(f.pipeline.run(date()).await);
        assert!(story.chapters.iter().all(|c| c.voice_path.is_empty()));
        assert_eq!(f.store.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_image_failure_aborts_before_persist() {
        let f = fixture(
            MockStoryWriter::new(3),
            MockImageGenerator::new("https://img.test").failing_on(1),
            MockSpeechSynthesizer::new(),
            RecordingStore::default(),
        );

        let err = f.pipeline.run(date()).await.unwrap_err();
        assert!(matches!(err, GenerationError::ChapterImage { chapter: 2, .. }));
        assert_eq!(f.images.calls().len(), 2);
        assert!(f.store.saved.lock().unwrap().is_empty());
        assert!(!f.dir.path().join("stories/story_2025-03-16.json").exists());
    }

    #[tokio::test]
    async fn test_text_failure_stops_everything() {
        let f = fixture(
            MockStoryWriter::failing(),
            MockImageGenerator::new("https://img.test"),
            MockSpeechSynthesizer::new(),
            RecordingStore::default(),
        );

        let err = f.pipeline.run(date()).await.unwrap_err();
        assert_eq!(err.stage(), "story_text");
        assert!(f.images.calls().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_snapshot() {
        let f = fixture(
            MockStoryWriter::new(1),
            MockImageGenerator::new("https://img.test"),
            MockSpeechSynthesizer::new(),
            RecordingStore {
                fail: true,
                ..Default::default()
            },
        );

        let err = f.pipeline.run(date()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Persist(_)));
        assert!(f.dir.path().join("stories/story_2025-03-16.json").exists());
    }

    #[tokio::test]
    async fn test_generate_voice_writes_under_media_root() {
        let f = fixture(
            MockStoryWriter::new(1),
            MockImageGenerator::new("https://img.test"),
            MockSpeechSynthesizer::new(),
            RecordingStore::default(),
        );

        let path = f.pipeline.generate_voice("晚安", "bedtime.mp3").await.unwrap();
        assert_eq!(path, f.dir.path().join("media/bedtime.mp3"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "晚安");
    }

    #[tokio::test]
    async fn test_generate_voice_rejects_bad_input() {
        let f = fixture(
            MockStoryWriter::new(1),
            MockImageGenerator::new("https://img.test"),
            MockSpeechSynthesizer::failing(),
            RecordingStore::default(),
        );

        assert!(matches!(
            f.pipeline.generate_voice("", "a.mp3").await.unwrap_err(),
            AppError::Validation { .. }
        ));
        assert!(matches!(
            f.pipeline.generate_voice("hi", "../a.mp3").await.unwrap_err(),
            AppError::Validation { .. }
        ));
        assert!(matches!(
            f.pipeline.generate_voice("hi", "a.mp3").await.unwrap_err(),
            AppError::VoiceGeneration { .. }
        ));
    }
}
