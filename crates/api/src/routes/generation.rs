use axum::routing::post;
use axum::Router;

use crate::handlers::generation;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate/text-to-image", post(generation::text_to_image))
        .route("/generate/image-to-image", post(generation::image_to_image))
}
