//! Caption generation handler.
//!
//! Routes:
//! - `POST /api/v1/captions` — generate marketing caption candidates.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use promokit_engine::caption::CaptionRequest;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CaptionPayload {
    #[validate(length(min = 1, max = 200))]
    pub business_name: String,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    pub tone: Option<String>,
    pub platform: Option<String>,
    #[serde(default = "default_count")]
    #[validate(range(min = 1, max = 10))]
    pub count: usize,
}

fn default_count() -> usize {
    3
}

#[derive(Debug, Serialize)]
pub struct CaptionsResponse {
    pub captions: Vec<String>,
}

/// POST /api/v1/captions
pub async fn generate_captions(
    State(state): State<AppState>,
    Json(payload): Json<CaptionPayload>,
) -> AppResult<impl IntoResponse> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let request = CaptionRequest {
        business: payload.business_name,
        description: payload.description,
        tone: payload.tone,
        platform: payload.platform,
        count: payload.count,
    };

    let captions = state.captions.generate_captions(&request).await?;
    Ok(Json(DataResponse {
        data: CaptionsResponse { captions },
    }))
}
