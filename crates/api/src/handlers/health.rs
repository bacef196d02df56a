//! Health check handler.
//!
//! Routes:
//! - `GET /health` — liveness, version, remote-server reachability, and
//!   the resident model, if any.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Outcome of the non-fatal pre-flight probe against the graph server.
    pub graph_server_reachable: bool,
    /// Short name of the resident backend, if one is loaded.
    pub resident_model: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let graph_server_reachable = state.workflows.check_connection().await;
    let resident_model = state.manager.current().await.map(|info| info.name);

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        graph_server_reachable,
        resident_model,
    })
}
