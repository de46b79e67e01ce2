//! Login handler

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use validator::Validate;

use super::{bad_request, invalid};
use crate::AppState;
use fairytale_common::{
    auth::{session_cookie, verify_credentials},
    errors::{messages, ApiResponse, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 128))]
    pub username: String,

    #[validate(length(min = 1, max = 256))]
    pub password: String,
}

/// Check credentials and open a server-side session.
///
/// Wrong credentials are not an error: the envelope carries `false`.
pub async fn login(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = payload.map_err(bad_request)?;
    request.validate().map_err(invalid)?;

    let auth = &state.config.auth;
    if !verify_credentials(auth, &request.username, &request.password) {
        tracing::warn!(username = %request.username, "Login rejected");
        return Ok(Json(ApiResponse::ok(false, messages::LOGIN_FAILED)).into_response());
    }

    let session_id = state.sessions.create().await;
    let cookie = session_cookie(&auth.session_cookie, &session_id, auth.session_ttl_secs);

    tracing::info!(username = %request.username, "Login succeeded");

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::ok(true, messages::LOGIN_OK)),
    )
        .into_response())
}
