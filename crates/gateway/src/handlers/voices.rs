//! Ad hoc narration

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use validator::Validate;

use super::{bad_request, invalid};
use crate::AppState;
use fairytale_common::errors::{messages, ApiResponse, Result};

#[derive(Debug, Deserialize, Validate)]
pub struct VoiceRequest {
    #[validate(length(min = 1, max = 20000))]
    pub text: String,

    /// Written under the media root, served from `/v1/resource/{filename}`
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
}

pub async fn generate_voice(
    State(state): State<AppState>,
    payload: std::result::Result<Json<VoiceRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<bool>>> {
    let Json(request) = payload.map_err(bad_request)?;
    request.validate().map_err(invalid)?;

    state
        .pipeline
        .generate_voice(&request.text, &request.filename)
        .await?;

    Ok(Json(ApiResponse::ok(true, messages::VOICE_CREATED)))
}
