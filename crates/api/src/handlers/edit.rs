//! Mode-parameterized remote workflow editing.
//!
//! Routes:
//! - `POST /api/v1/edit/{mode}` — run one named workflow template against
//!   the remote graph server. `mode` is a template id, e.g.
//!   `instruction-edit` or `background-removal-plus-fill`.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use promokit_core::params::GenerationParams;

use crate::error::{AppError, AppResult};
use crate::handlers::generation::{
    base_model_config, decode_image, encode_images, maybe_optimize_prompt, GenerationResponse,
};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct EditPayload {
    /// Base64-encoded PNG input image; required by image-consuming modes.
    pub image: Option<String>,
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Registry short name pinning the checkpoint; defaults to the
    /// configured primary model.
    pub model: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
    pub strength: Option<f64>,
    pub seed: Option<u32>,
}

/// POST /api/v1/edit/{mode}
pub async fn edit_with_workflow(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    Json(payload): Json<EditPayload>,
) -> AppResult<impl IntoResponse> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let image = match &payload.image {
        Some(encoded) => Some(decode_image(encoded)?),
        None => None,
    };

    // Checkpoint selection: an explicitly named registry entry wins,
    // otherwise the request runs on the request-default model.
    let config = match &payload.model {
        Some(name) => state
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| promokit_core::error::CoreError::UnknownModel(name.clone()))?,
        None => base_model_config(&state).await,
    };

    let mut params = GenerationParams::for_model(payload.prompt, &config);
    params.negative_prompt = payload.negative_prompt;
    params.seed = payload.seed;
    if let Some(width) = payload.width {
        params.width = width;
    }
    if let Some(height) = payload.height {
        params.height = height;
    }
    if let Some(steps) = payload.steps {
        params.steps = steps;
    }
    if let Some(guidance) = payload.guidance {
        params.guidance = guidance;
    }
    if let Some(strength) = payload.strength {
        params.denoise = strength;
    }
    let mut params = params.clamped_to(&config);
    params.prompt = maybe_optimize_prompt(&state, params.prompt).await;

    let output = state
        .workflows
        .execute(&mode, Some(&config.id), image.as_deref(), &params)
        .await?;

    Ok(Json(DataResponse {
        data: GenerationResponse {
            images: encode_images(&output.images),
            seed: output.seed,
            model: Some(config.id),
        },
    }))
}
