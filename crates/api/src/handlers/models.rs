//! Model registry and resident-backend handlers.
//!
//! Routes:
//! - `GET  /api/v1/models`         — registry listing + validation report
//! - `GET  /api/v1/models/current` — resident backend query
//! - `POST /api/v1/models/load`    — explicit model switch
//! - `POST /api/v1/models/unload`  — tear down the resident backend

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use promokit_core::registry::{ModelConfig, ValidationIssue};
use promokit_engine::manager::ResidentInfo;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(flatten)]
    pub config: ModelConfig,
}

#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    pub models: Vec<ModelEntry>,
    pub primary_model: String,
    pub fallback_models: Vec<String>,
    pub enable_fallback: bool,
    /// Aggregate validation report; empty when the registry is clean.
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Serialize)]
pub struct CurrentModelResponse {
    pub loaded: bool,
    pub model: Option<ResidentInfo>,
}

#[derive(Debug, Deserialize)]
pub struct LoadModelPayload {
    pub name: String,
}

/// GET /api/v1/models
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.manager.settings();
    let models = state
        .registry
        .entries()
        .map(|(name, config)| ModelEntry {
            name: name.to_string(),
            config: config.clone(),
        })
        .collect();

    Json(DataResponse {
        data: ModelListResponse {
            models,
            primary_model: settings.primary_model().to_string(),
            fallback_models: settings.fallback_models().to_vec(),
            enable_fallback: settings.fallback_enabled(),
            issues: state.registry.validate(),
        },
    })
}

/// GET /api/v1/models/current
pub async fn current_model(State(state): State<AppState>) -> impl IntoResponse {
    let model = state.manager.current().await;
    Json(DataResponse {
        data: CurrentModelResponse {
            loaded: model.is_some(),
            model,
        },
    })
}

/// POST /api/v1/models/load
pub async fn load_model(
    State(state): State<AppState>,
    Json(payload): Json<LoadModelPayload>,
) -> AppResult<impl IntoResponse> {
    state.manager.load(&payload.name).await?;
    let model = state.manager.current().await;
    Ok(Json(DataResponse {
        data: CurrentModelResponse {
            loaded: model.is_some(),
            model,
        },
    }))
}

/// POST /api/v1/models/unload
pub async fn unload_model(State(state): State<AppState>) -> impl IntoResponse {
    state.manager.unload().await;
    Json(DataResponse {
        data: CurrentModelResponse {
            loaded: false,
            model: None,
        },
    })
}
