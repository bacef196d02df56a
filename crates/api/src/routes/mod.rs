//! Route registration, one module per resource.

pub mod captions;
pub mod edit;
pub mod generation;
pub mod health;
pub mod models;
pub mod render;

use axum::Router;

use crate::state::AppState;

/// All `/api/v1` routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(captions::router())
        .merge(edit::router())
        .merge(generation::router())
        .merge(models::router())
        .merge(render::router())
}
