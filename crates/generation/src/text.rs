//! Story text generation (DeepSeek chat completions)

use async_trait::async_trait;
use chrono::NaiveDate;
use fairytale_common::config::TextConfig;
use fairytale_common::errors::{AppError, Result};
use fairytale_common::json::extract_json_object;
use fairytale_common::metrics::record_vendor_request;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const SERVICE: &str = "deepseek";

/// One chapter as returned by the text model, later enriched with media paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedChapter {
    pub title: String,
    pub content: String,
    pub image_prompt: String,
    #[serde(default)]
    pub chapter_number: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub voice_path: String,
}

/// A whole story; also the snapshot and API response shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedStory {
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    pub chapters: Vec<GeneratedChapter>,
    #[serde(default)]
    pub music_style: String,
    /// Run date, `YYYY-MM-DD`
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<i32>,
}

/// Trait for story text generation
#[async_trait]
pub trait StoryWriter: Send + Sync {
    fn model_name(&self) -> &str;

    /// Write a story about `theme`, dated `date`, whose image prompts pick
    /// their art style from `styles`
    async fn write_story(&self, theme: &str, date: NaiveDate, styles: &[&str])
        -> Result<GeneratedStory>;
}

/// The single user message sent to the model
pub fn build_prompt(theme: &str, date: NaiveDate, styles: &[&str]) -> String {
    format!(
        r#"请以"{theme}"为主题，为小朋友创作一篇童话故事。要求如下：
1. 故事分为3到4个章节，全文约2000字。
2. 每个章节都要附上一段详细的画面描述，供AI绘图使用。
3. 为整篇故事推荐一种背景音乐风格。
4. 今天是{date}，请让故事新颖、不与以往重复，但故事正文里不要出现具体的日期或时间。
5. 画面描述按如下顺序拼接：[主体描述] + [风格设定] + [细节要求] + [视觉氛围] + [图像宽高像素值]，其中宽高像素值固定写作 2560x1440。示例：
   "新中式动漫插画，一个穿着绿色恐龙连体睡衣的小男孩站在雨后初晴的阳台上，好奇地伸手去接屋檐滴落的水珠。天空湛蓝，远处挂着彩虹，被雨水洗过的城市楼宇显得格外葱郁，阳光穿过云层形成丁达尔光束，空气里弥漫着清新湿润的气息。"
6. 画面描述里的风格请根据故事内容，从以下风格中挑选一种：{styles}
请只返回一个JSON对象，包含以下字段：
- title：故事标题
- author：作者（可以虚构）
- description：故事简介
- music_style：背景音乐风格描述
- chapters：章节数组，每个章节包含 title、content、image_prompt、chapter_number"#,
        theme = theme,
        date = date.format("%Y-%m-%d"),
        styles = styles.join("、"),
    )
}

/// Turn the model's reply into a story dated `date`.
///
/// The reply may wrap the object in prose or a code fence.
pub fn parse_story_content(content: &str, date: NaiveDate) -> Result<GeneratedStory> {
    let json = extract_json_object(content)?;
    let mut story: GeneratedStory = serde_json::from_str(json)
        .map_err(|e| AppError::malformed(SERVICE, format!("story JSON: {}", e)))?;

    story.created_at = date.format("%Y-%m-%d").to_string();
    story.story_id = None;
    Ok(story)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

fn first_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| AppError::malformed(SERVICE, "response has no message content"))
}

/// DeepSeek chat completion client
pub struct DeepSeekClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl DeepSeekClient {
    pub fn new(config: &TextConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::upstream(SERVICE, format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(
                SERVICE,
                format!("API error {}: {}", status, body),
            ));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::malformed(SERVICE, format!("Failed to parse response: {}", e)))?;

        first_content(body)
    }
}

#[async_trait]
impl StoryWriter for DeepSeekClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, styles), fields(model = %self.model))]
    async fn write_story(
        &self,
        theme: &str,
        date: NaiveDate,
        styles: &[&str],
    ) -> Result<GeneratedStory> {
        let prompt = build_prompt(theme, date, styles);

        let result = match self.complete(&prompt).await {
            Ok(content) => parse_story_content(&content, date).inspect_err(|e| {
                warn!(error = %e, "Model reply did not contain a usable story");
            }),
            Err(e) => Err(e),
        };

        record_vendor_request(SERVICE, result.is_ok());
        if let Ok(story) = &result {
            debug!(title = %story.title, chapters = story.chapters.len(), "Story text generated");
        }
        result
    }
}

/// Story writer returning a fixed story, for tests
pub struct MockStoryWriter {
    story: Option<GeneratedStory>,
}

impl MockStoryWriter {
    /// Writer producing `chapters` numbered chapters
    pub fn new(chapters: u32) -> Self {
        let story = GeneratedStory {
            title: "小狐狸的礼物".to_string(),
            author: "森林说书人".to_string(),
            description: "小狐狸学会了分享".to_string(),
            music_style: "轻柔的八音盒".to_string(),
            created_at: String::new(),
            story_id: None,
            chapters: (1..=chapters)
                .map(|n| GeneratedChapter {
                    title: format!("第{}章", n),
                    content: format!("第{}章的故事内容。", n),
                    image_prompt: format!("小狐狸+水彩绘本风格+场景{}+温暖+2560x1440", n),
                    chapter_number: n,
                    image_path: String::new(),
                    voice_path: String::new(),
                })
                .collect(),
        };
        Self { story: Some(story) }
    }

    /// Writer that always fails
    pub fn failing() -> Self {
        Self { story: None }
    }
}

#[async_trait]
impl StoryWriter for MockStoryWriter {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn write_story(
        &self,
        _theme: &str,
        date: NaiveDate,
        _styles: &[&str],
    ) -> Result<GeneratedStory> {
        let mut story = self
            .story
            .clone()
            .ok_or_else(|| AppError::upstream("mock", "text model unavailable"))?;
        story.created_at = date.format("%Y-%m-%d").to_string();
        Ok(story)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 16).unwrap()
    }

    #[test]
    fn test_prompt_mentions_inputs() {
        let prompt = build_prompt("勇气与友谊", date(), &["水彩绘本风格", "剪纸拼贴风格"]);
        assert!(prompt.contains("勇气与友谊"));
        assert!(prompt.contains("2025-03-16"));
        assert!(prompt.contains("水彩绘本风格、剪纸拼贴风格"));
        assert!(prompt.contains("2560x1440"));
        assert!(prompt.contains("chapter_number"));
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = r#"好的！以下是故事：
```json
{
  "title": "月亮上的兔子",
  "author": "星星阿姨",
  "description": "一只小兔子去月亮旅行",
  "music_style": "梦幻竖琴",
  "chapters": [
    {"title": "出发", "content": "……", "image_prompt": "小兔子+水彩+火箭+梦幻+2560x1440", "chapter_number": 1},
    {"title": "回家", "content": "……", "image_prompt": "小兔子+水彩+地球+温暖+2560x1440", "chapter_number": 2}
  ]
}
```
祝小朋友们晚安。"#;

        let story = parse_story_content(reply, date()).unwrap();
        assert_eq!(story.title, "月亮上的兔子");
        assert_eq!(story.chapters.len(), 2);
        assert_eq!(story.chapters[1].chapter_number, 2);
        assert_eq!(story.created_at, "2025-03-16");
        assert!(story.chapters[0].image_path.is_empty());
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = parse_story_content("{ not json }", date()).unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse { .. }));
    }

    #[test]
    fn test_parse_rejects_missing_braces() {
        assert!(matches!(
            parse_story_content("抱歉，我无法完成。", date()).unwrap_err(),
            AppError::InvalidFormat { .. }
        ));
    }

    #[test]
    fn test_first_content() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"{}"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_content(response).unwrap(), "{}");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(first_content(empty).is_err());
    }

    #[test]
    fn test_chat_request_body() {
        let body = serde_json::to_value(ChatRequest {
            model: "deepseek-chat",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.8,
            max_tokens: 8000,
        })
        .unwrap();
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 8000);
        assert!((body["temperature"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_serialized_story_omits_empty_paths() {
        let mut story = parse_story_content(
            r#"{"title":"t","chapters":[{"title":"c","content":"x","image_prompt":"p"}]}"#,
            date(),
        )
        .unwrap();
        let value = serde_json::to_value(&story).unwrap();
        assert!(value["chapters"][0].get("voice_path").is_none());
        assert!(value.get("story_id").is_none());

        story.chapters[0].voice_path = "/v1/resource/voices/a.mp3".to_string();
        story.story_id = Some(4);
        let value = serde_json::to_value(&story).unwrap();
        assert_eq!(value["chapters"][0]["voice_path"], "/v1/resource/voices/a.mp3");
        assert_eq!(value["story_id"], 4);
    }

    #[tokio::test]
    async fn test_mock_writer() {
        let story = MockStoryWriter::new(3)
            .write_story("t", date(), &[])
            .await
            .unwrap();
        assert_eq!(story.chapters.len(), 3);
        assert_eq!(story.created_at, "2025-03-16");
        assert!(MockStoryWriter::failing().write_story("t", date(), &[]).await.is_err());
    }
}
