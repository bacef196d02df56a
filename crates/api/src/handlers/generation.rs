//! Image generation handlers.
//!
//! Routes:
//! - `POST /api/v1/generate/text-to-image` — t2i via the resident backend
//! - `POST /api/v1/generate/image-to-image` — i2i via the resident backend
//!
//! Images travel as base64-encoded PNG in JSON bodies. Requests are
//! clamped to the resident model's declared limits before dispatch; the
//! blocking inference itself runs off the event loop inside the engine.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use validator::Validate;

use promokit_core::params::GenerationParams;
use promokit_core::registry::{ModelConfig, ModelRegistry};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct TextToImagePayload {
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
    pub seed: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ImageToImagePayload {
    /// Base64-encoded PNG input image.
    #[validate(length(min = 1))]
    pub image: String,
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
    /// Denoise strength in `[0, 1]`; low values stay close to the input.
    pub strength: Option<f64>,
    pub seed: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct GenerationResponse {
    /// Base64-encoded PNG outputs.
    pub images: Vec<String>,
    /// The seed the job ran with.
    pub seed: u32,
    /// Short name of the backend that served the request.
    pub model: Option<String>,
}

/// POST /api/v1/generate/text-to-image
pub async fn text_to_image(
    State(state): State<AppState>,
    Json(payload): Json<TextToImagePayload>,
) -> AppResult<impl IntoResponse> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let config = base_model_config(&state).await;
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
    params.prompt = maybe_optimize_prompt(&state, params.prompt).await;

    let output = state.manager.generate(&params).await?;
    let model = state.manager.current().await.map(|info| info.name);

    Ok(Json(DataResponse {
        data: GenerationResponse {
            images: encode_images(&output.images),
            seed: output.seed,
            model,
        },
    }))
}

/// POST /api/v1/generate/image-to-image
pub async fn image_to_image(
    State(state): State<AppState>,
    Json(payload): Json<ImageToImagePayload>,
) -> AppResult<impl IntoResponse> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let image = decode_image(&payload.image)?;

    let config = base_model_config(&state).await;
    let mut params = GenerationParams::for_model(payload.prompt, &config);
    params.negative_prompt = payload.negative_prompt;
    params.seed = payload.seed;
    params.denoise = payload.strength.unwrap_or(0.7);
    if let Some(steps) = payload.steps {
        params.steps = steps;
    }
    if let Some(guidance) = payload.guidance {
        params.guidance = guidance;
    }
    params.prompt = maybe_optimize_prompt(&state, params.prompt).await;

    let output = state.manager.edit(&image, &params).await?;
    let model = state.manager.current().await.map(|info| info.name);

    Ok(Json(DataResponse {
        data: GenerationResponse {
            images: encode_images(&output.images),
            seed: output.seed,
            model,
        },
    }))
}

// ---------------------------------------------------------------------------
// Shared helpers (also used by the edit handler)
// ---------------------------------------------------------------------------

/// Model config whose defaults seed new requests: the resident backend if
/// one is loaded, the configured primary otherwise, the built-in entry as
/// a last resort.
pub(crate) async fn base_model_config(state: &AppState) -> ModelConfig {
    if let Some(info) = state.manager.current().await {
        if let Some(config) = state.registry.get(&info.name) {
            return config.clone();
        }
    }
    if let Some(config) = state.registry.get(state.manager.settings().primary_model()) {
        return config.clone();
    }
    ModelRegistry::builtin_minimal()
        .get(ModelRegistry::BUILTIN_MODEL_NAME)
        .cloned()
        // builtin_minimal always contains its own entry
        .unwrap_or_else(|| unreachable!("built-in registry is never empty"))
}

/// Run the configured prompt-optimization pass, keeping the original
/// prompt on any failure. The rewrite is a quality hint, not a
/// dependency.
pub(crate) async fn maybe_optimize_prompt(state: &AppState, prompt: String) -> String {
    let options = &state.registry.runtime().prompt_optimization;
    if !options.enabled {
        return prompt;
    }
    match state.captions.optimize_prompt(&prompt, options).await {
        Ok(rewritten) => {
            tracing::debug!("Prompt optimization applied");
            rewritten
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prompt optimization failed, using the original prompt");
            prompt
        }
    }
}

pub(crate) fn encode_images(images: &[Vec<u8>]) -> Vec<String> {
    images.iter().map(|bytes| BASE64.encode(bytes)).collect()
}

pub(crate) fn decode_image(encoded: &str) -> Result<Vec<u8>, AppError> {
    BASE64
        .decode(encoded.trim())
        .map_err(|e| AppError::BadRequest(format!("Invalid base64 image payload: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
