use std::sync::Arc;

use promokit_core::registry::ModelRegistry;
use promokit_engine::caption::CaptionClient;
use promokit_engine::manager::BackendManager;
use promokit_engine::remote::RemoteWorkflowService;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Parsed model registry (immutable for the process lifetime).
    pub registry: Arc<ModelRegistry>,
    /// Resident-backend manager.
    pub manager: Arc<BackendManager>,
    /// Remote workflow execution (the mode-parameterized edit endpoint).
    pub workflows: Arc<RemoteWorkflowService>,
    /// Caption / prompt-optimization LLM client.
    pub captions: Arc<CaptionClient>,
}
