use axum::routing::post;
use axum::Router;

use crate::handlers::captions;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/captions", post(captions::generate_captions))
}
