use axum::routing::{get, post};
use axum::Router;

use crate::handlers::models;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/models", get(models::list_models))
        .route("/models/current", get(models::current_model))
        .route("/models/load", post(models::load_model))
        .route("/models/unload", post(models::unload_model))
}
