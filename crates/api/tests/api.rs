//! Integration tests for the generation, edit, model, and rendering
//! endpoints: error mapping and registry behaviour that need no live
//! model runtime.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, get, post_json};
use serde_json::json;

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[tokio::test]
async fn model_listing_includes_registry_and_settings() {
    let app = build_test_app();
    let response = get(app, "/api/v1/models").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let data = &json["data"];
    assert_eq!(data["primary_model"], "studio");
    assert_eq!(data["enable_fallback"], false);
    assert_eq!(data["models"][0]["name"], "studio");
    assert_eq!(data["models"][0]["type"], "remote-graph");
    assert!(data["issues"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn current_model_is_empty_before_any_load() {
    let app = build_test_app();
    let response = get(app, "/api/v1/models/current").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["loaded"], false);
    assert!(json["data"]["model"].is_null());
}

#[tokio::test]
async fn loading_an_unknown_model_is_404() {
    let app = build_test_app();
    let response = post_json(app, "/api/v1/models/load", json!({"name": "nope"})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["code"], "UNKNOWN_MODEL");
}

#[tokio::test]
async fn unload_succeeds_when_nothing_is_resident() {
    let app = build_test_app();
    let response = post_json(app, "/api/v1/models/unload", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["loaded"], false);
}

// ---------------------------------------------------------------------------
// Generation error mapping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generation_surfaces_load_failure_when_server_unreachable() {
    let app = build_test_app();
    let response = post_json(
        app,
        "/api/v1/generate/text-to-image",
        json!({"prompt": "a bakery storefront"}),
    )
    .await;

    // The only candidate backend cannot connect and fallback is
    // disabled, so the load failure surfaces.
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["code"], "MODEL_LOAD_FAILED");
}

#[tokio::test]
async fn empty_prompt_is_rejected_before_any_backend_work() {
    let app = build_test_app();
    let response = post_json(
        app,
        "/api/v1/generate/text-to-image",
        json!({"prompt": ""}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn image_to_image_rejects_garbage_base64() {
    let app = build_test_app();
    let response = post_json(
        app,
        "/api/v1/generate/image-to-image",
        json!({"image": "%%%", "prompt": "new background"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Edit-with-workflow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_edit_mode_is_404() {
    let app = build_test_app();
    let response = post_json(
        app,
        "/api/v1/edit/makes-coffee",
        json!({"prompt": "irrelevant"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNKNOWN_TEMPLATE");
}

#[tokio::test]
async fn image_modes_require_an_input_image() {
    let app = build_test_app();
    let response = post_json(
        app,
        "/api/v1/edit/instruction-edit",
        json!({"prompt": "make it night time"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INPUT_IMAGE_REQUIRED");
}

// ---------------------------------------------------------------------------
// Captions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn caption_payload_is_validated_before_the_llm_call() {
    let app = build_test_app();
    let response = post_json(
        app,
        "/api/v1/captions",
        json!({"business_name": "", "description": "weekly specials"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn caption_api_unreachable_maps_to_bad_gateway() {
    let app = build_test_app();
    let response = post_json(
        app,
        "/api/v1/captions",
        json!({"business_name": "Rosie's Bakery", "description": "weekly specials"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_json(response).await;
    assert_eq!(json["code"], "CAPTION_API_UNREACHABLE");
}

// ---------------------------------------------------------------------------
// Text rendering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_color_is_rejected() {
    let app = build_test_app();
    let response = post_json(
        app,
        "/api/v1/render/text",
        json!({"text": "SALE", "color": "#not-a-color"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_canvas_is_rejected() {
    let app = build_test_app();
    let response = post_json(
        app,
        "/api/v1/render/text",
        json!({"text": "SALE", "width": 100000}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
