//! Shared helpers for the API integration tests.
//!
//! Builds the real application router (same middleware stack as the
//! production binary) over a test registry, with the remote graph server
//! and caption API pointed at unreachable addresses so no test leaves
//! the process.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use tower::ServiceExt;

use promokit_api::config::ServerConfig;
use promokit_api::router::build_app_router;
use promokit_api::state::AppState;
use promokit_core::registry::{ModelRegistry, RegistrySettings};
use promokit_engine::caption::CaptionClient;
use promokit_engine::loader::DefaultFactory;
use promokit_engine::manager::BackendManager;
use promokit_engine::remote::RemoteWorkflowService;

/// Nothing listens on port 1; connections fail fast.
const UNREACHABLE: &str = "http://127.0.0.1:1";

const TEST_REGISTRY: &str = r#"
models:
  studio:
    id: sd_xl_base_1.0.safetensors
    type: remote-graph
    params:
      default_steps: 20
      max_steps: 50
      guidance_scale: 7.0
      supports_i2i: true
      default_size: [1024, 1024]
      max_size: [1536, 1536]
    description: Remote graph server entry for tests
runtime:
  primary_model: studio
  fallback_models: []
  enable_fallback: false
"#;

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 5,
        models_file: PathBuf::from("unused"),
        graph_server_url: UNREACHABLE.to_string(),
        poll_interval_secs: 1,
        poll_timeout_secs: 1,
        caption_api_url: UNREACHABLE.to_string(),
        caption_api_key: None,
        caption_model: "test-model".to_string(),
        caption_max_tokens: 64,
        font_path: PathBuf::from("/nonexistent/font.ttf"),
    }
}

pub fn build_test_app() -> Router {
    let config = test_config();
    let registry = Arc::new(ModelRegistry::from_yaml(TEST_REGISTRY).expect("test registry parses"));
    let settings = RegistrySettings::resolve_with(registry.runtime(), |_| None);

    let workflows = Arc::new(RemoteWorkflowService::new(
        config.graph_server_url.clone(),
        config.poll_config(),
    ));
    let factory = Arc::new(DefaultFactory::new(Arc::clone(&workflows)));
    let manager = Arc::new(BackendManager::new(
        Arc::clone(&registry),
        settings,
        factory,
    ));
    let captions = Arc::new(CaptionClient::new(
        config.caption_api_url.clone(),
        config.caption_api_key.clone(),
        config.caption_model.clone(),
        config.caption_max_tokens,
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        manager,
        workflows,
        captions,
    };
    build_app_router(state, &config)
}

pub async fn get(app: Router, path: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .uri(path)
            .body(Body::empty())
            .expect("request builds"),
    )
    .await
    .expect("request succeeds")
}

pub async fn post_json(app: Router, path: &str, body: serde_json::Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds"),
    )
    .await
    .expect("request succeeds")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    use http_body_util::BodyExt;
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}
