//! Fairytale Studio HTTP gateway
//!
//! Routes:
//! - `POST /v1/user/login` (public)
//! - `POST /v1/story/add`, `GET /v1/story/list`, `GET /v1/story/{id}`,
//!   `POST /v1/story/voice/generate` (session required)
//! - `GET /v1/resource/*` static media
//! - `GET /health`, `GET /ready`, `GET /metrics`

pub mod handlers;
pub mod middleware;
pub mod observability;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use fairytale_common::{
    auth::{require_login, SessionGuard, SessionStore},
    config::AppConfig,
    errors::Result,
};
use fairytale_generation::StoryPipeline;
use metrics_exporter_prometheus::PrometheusHandle;
use middleware::rate_limit::{create_rate_limiter, limit_story_creation, GlobalRateLimiter};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<StoryPipeline>,
    pub sessions: Arc<SessionStore>,
    pub story_limiter: Option<Arc<GlobalRateLimiter>>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        pipeline: StoryPipeline,
        prometheus: Option<PrometheusHandle>,
    ) -> Result<Self> {
        let story_limiter = if config.rate_limit.enabled {
            Some(create_rate_limiter(
                config.rate_limit.stories_per_minute,
                config.rate_limit.burst,
            )?)
        } else {
            None
        };

        Ok(Self {
            sessions: Arc::new(SessionStore::new(config.auth.session_ttl_secs)),
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            story_limiter,
            prometheus,
        })
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let guard = SessionGuard::new(state.sessions.clone(), &state.config.auth);

    // Login is checked before the limiter so anonymous calls spend no quota
    let story_add = Router::new()
        .route("/v1/story/add", post(handlers::stories::add_story))
        .route_layer(from_fn_with_state(state.clone(), limit_story_creation));

    let protected = Router::new()
        .route("/v1/story/list", get(handlers::stories::list_stories))
        .route("/v1/story/{id}", get(handlers::stories::get_story))
        .route("/v1/story/voice/generate", post(handlers::voices::generate_voice))
        .merge(story_add)
        .route_layer(from_fn_with_state(guard, require_login));

    let media = ServeDir::new(&state.config.storage.media_root);

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::health::metrics))
        .route("/v1/user/login", post(handlers::users::login))
        .merge(protected)
        .nest_service("/v1/resource", media)
        .layer(from_fn(middleware::metrics::track_requests))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}
