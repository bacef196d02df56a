use axum::routing::post;
use axum::Router;

use crate::handlers::edit;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/edit/{mode}", post(edit::edit_with_workflow))
}
