//! Story creation rate limiting using token bucket algorithm
//!
//! Each story run spends vendor credit, so `/v1/story/add` passes a global
//! limiter before the pipeline starts.

use crate::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use fairytale_common::errors::{AppError, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = DefaultDirectRateLimiter;

/// Create a limiter allowing `per_minute` runs with `burst` capacity
pub fn create_rate_limiter(per_minute: u32, burst: u32) -> Result<Arc<GlobalRateLimiter>> {
    let rate = NonZeroU32::new(per_minute).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.stories_per_minute must be greater than zero".to_string(),
    })?;
    let burst = NonZeroU32::new(burst).unwrap_or(rate);

    Ok(Arc::new(RateLimiter::direct(
        Quota::per_minute(rate).allow_burst(burst),
    )))
}

/// Rate limiting middleware
pub async fn limit_story_creation(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    if let Some(limiter) = &state.story_limiter {
        if limiter.check().is_err() {
            tracing::warn!("Story creation rate limit exceeded");
            return Err(AppError::RateLimited {
                limit: state.config.rate_limit.stories_per_minute,
            });
        }
    }
    Ok(next.run(request).await)
}
