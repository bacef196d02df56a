use axum::routing::post;
use axum::Router;

use crate::handlers::render;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/render/text", post(render::render_text))
}
