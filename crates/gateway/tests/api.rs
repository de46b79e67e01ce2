//! End-to-end router tests with in-process vendors and SQLite

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use fairytale_common::{
    config::{AppConfig, DatabaseConfig},
    db::{DbPool, Repository},
    storage::LocalMediaStore,
};
use fairytale_gateway::{create_router, AppState};
use fairytale_generation::{
    image::MockImageGenerator, speech::MockSpeechSynthesizer, text::MockStoryWriter,
    PipelineSettings, PipelineVendors, StoryPipeline,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    dir: TempDir,
    router: Router,
}

async fn test_app(tweak: impl FnOnce(&mut AppConfig)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_string_lossy().to_string();

    let mut config = AppConfig::default();
    config.auth.password = "let-me-in".to_string();
    config.database = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connect_retry_secs: 0,
        ..Default::default()
    };
    config.storage.media_root = format!("{}/media", root);
    config.storage.story_root = format!("{}/stories", root);
    config.storage.scratch_dir = format!("{}/tmp", root);
    tweak(&mut config);

    let pool = DbPool::new(&config.database).await.unwrap();
    pool.ensure_schema().await.unwrap();

    let media = LocalMediaStore::new(&config.storage.media_root, &config.storage.public_prefix)
        .unwrap();

    let vendors = PipelineVendors {
        writer: Arc::new(MockStoryWriter::new(2)),
        images: Arc::new(MockImageGenerator::new("https://img.test")),
        speech: Arc::new(MockSpeechSynthesizer::new()),
        media: Arc::new(media),
        store: Arc::new(Repository::new(pool)),
    };
    let pipeline = StoryPipeline::new(vendors, PipelineSettings::from(&config)).unwrap();
    let state = AppState::new(config, pipeline, None).unwrap();

    TestApp {
        dir,
        router: create_router(state),
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value, axum::http::HeaderMap) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body, headers)
    }

    async fn login(&self) -> String {
        let (status, body, headers) = self
            .send(post_json(
                "/v1/user/login",
                json!({"username": "admin", "password": "let-me-in"}),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], true);

        let set_cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }
}

fn post_json(uri: &str, body: Value, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_and_ready() {
    let app = test_app(|_| {}).await;

    let (status, body, _) = app.send(get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body, _) = app.send(get("/ready", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["persistence"]["backend"], "database");
    assert_eq!(body["checks"]["persistence"]["status"], "up");
}

#[tokio::test]
async fn test_metrics_disabled_is_not_found() {
    let app = test_app(|_| {}).await;
    let (status, _, _) = app.send(get("/metrics", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let app = test_app(|_| {}).await;

    let (status, body, _) = app.send(get("/v1/story/list", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "请登录后再试");
    assert!(body["data"].is_null());

    let (status, _, _) = app
        .send(get("/v1/story/list", Some("session=forged")))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app.send(post_json("/v1/story/add", json!({}), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_password_returns_false() {
    let app = test_app(|_| {}).await;

    let (status, body, headers) = app
        .send(post_json(
            "/v1/user/login",
            json!({"username": "admin", "password": "nope"}),
            None,
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], false);
    assert!(headers.get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_malformed_login_is_bad_request() {
    let app = test_app(|_| {}).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/user/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body, _) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "请求有误");
}

#[tokio::test]
async fn test_add_list_and_get_story() {
    let app = test_app(|_| {}).await;
    let cookie = app.login().await;

    let (status, body, _) = app
        .send(post_json("/v1/story/add", json!({}), Some(&cookie)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "生成故事成功");
    assert_eq!(body["data"]["story_id"], 1);
    assert_eq!(body["data"]["chapters"].as_array().unwrap().len(), 2);
    assert_eq!(
        body["data"]["chapters"][1]["image_path"],
        "https://img.test/image-1.jpeg"
    );

    let (status, body, _) = app
        .send(get("/v1/story/list?offset=0&limit=10", Some(&cookie)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["status"], "pending");

    let (status, body, _) = app.send(get("/v1/story/1", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], 1);
    let chapters = body["data"]["chapters"].as_array().unwrap();
    assert_eq!(chapters.len(), 2);

    // Narration clips are served from the media mount
    let voice = chapters[0]["voice_path"].as_str().unwrap().to_string();
    assert!(voice.starts_with("/v1/resource/voices/"));
    let response = app.router.clone().oneshot(get(&voice, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_story_is_not_found() {
    let app = test_app(|_| {}).await;
    let cookie = app.login().await;

    let (status, _, _) = app.send(get("/v1/story/42", Some(&cookie))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body, _) = app.send(get("/v1/story/abc", Some(&cookie))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "请求有误");
}

#[tokio::test]
async fn test_list_rejects_oversized_page() {
    let app = test_app(|_| {}).await;
    let cookie = app.login().await;

    let (status, _, _) = app
        .send(get("/v1/story/list?limit=1000", Some(&cookie)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_generate_voice_and_serve_it() {
    let app = test_app(|_| {}).await;
    let cookie = app.login().await;

    let (status, body, _) = app
        .send(post_json(
            "/v1/story/voice/generate",
            json!({"text": "从前有座山", "filename": "mountain.mp3"}),
            Some(&cookie),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);
    assert_eq!(body["message"], "生成语音成功");
    assert!(app.dir.path().join("media/mountain.mp3").exists());

    let response = app
        .router
        .clone()
        .oneshot(get("/v1/resource/mountain.mp3", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], "从前有座山".as_bytes());
}

#[tokio::test]
async fn test_generate_voice_rejects_bad_request() {
    let app = test_app(|_| {}).await;
    let cookie = app.login().await;

    for payload in [
        json!({"text": "", "filename": "a.mp3"}),
        json!({"text": "hi", "filename": "../escape.mp3"}),
        json!({"text": "hi"}),
    ] {
        let (status, body, _) = app
            .send(post_json("/v1/story/voice/generate", payload, Some(&cookie)))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "请求有误");
    }
}

#[tokio::test]
async fn test_login_can_be_disabled() {
    let app = test_app(|config| config.auth.require_login = false).await;

    let (status, body, _) = app.send(get("/v1/story/list", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn test_story_creation_is_rate_limited() {
    let app = test_app(|config| {
        config.rate_limit.stories_per_minute = 1;
        config.rate_limit.burst = 1;
    })
    .await;
    let cookie = app.login().await;

    let (status, _, _) = app
        .send(post_json("/v1/story/add", json!({}), Some(&cookie)))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = app
        .send(post_json("/v1/story/add", json!({}), Some(&cookie)))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["message"], "请求过于频繁，请稍候再试");
}
