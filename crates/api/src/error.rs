use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use promokit_comfyui::client::WorkflowClientError;
use promokit_comfyui::templates::TemplateError;
use promokit_core::error::CoreError;
use promokit_engine::backend::GenerateError;
use promokit_engine::caption::CaptionError;
use promokit_engine::loader::ModelLoadError;
use promokit_engine::manager::EngineError;
use promokit_engine::remote::RemoteWorkflowError;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain error taxonomy and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses
/// of the shape `{"error": <message>, "code": <stable code>}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Load(#[from] ModelLoadError),

    #[error(transparent)]
    Workflow(#[from] RemoteWorkflowError),

    #[error(transparent)]
    Caption(#[from] CaptionError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core(core),
            AppError::Engine(engine) => match engine {
                EngineError::Load(load) => classify_load(load),
                EngineError::Generate(generate) => classify_generate(generate),
            },
            AppError::Load(load) => classify_load(load),
            AppError::Workflow(workflow) => classify_workflow(workflow),
            AppError::Caption(caption) => classify_caption(caption),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::UnknownModel(name) => (
            StatusCode::NOT_FOUND,
            "UNKNOWN_MODEL",
            format!("Unknown model: {name}"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Configuration(msg) => {
            tracing::error!(error = %msg, "Configuration error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
                msg.clone(),
            )
        }
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

/// Map a load failure to a response.
///
/// GPU memory exhaustion gets its own distinct response so clients can
/// tell "try a smaller model" apart from generic failures.
fn classify_load(err: &ModelLoadError) -> (StatusCode, &'static str, String) {
    match err {
        ModelLoadError::UnknownModel(name) => (
            StatusCode::NOT_FOUND,
            "UNKNOWN_MODEL",
            format!("Unknown model: {name}"),
        ),
        ModelLoadError::Auth(msg) => (
            StatusCode::BAD_GATEWAY,
            "MODEL_AUTH_REQUIRED",
            format!("Authentication required to fetch model weights: {msg}"),
        ),
        ModelLoadError::OutOfMemory(_) => insufficient_gpu_memory(),
        ModelLoadError::LocalUnavailable => (
            StatusCode::NOT_IMPLEMENTED,
            "LOCAL_INFERENCE_UNAVAILABLE",
            err.to_string(),
        ),
        ModelLoadError::Failed(msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "MODEL_LOAD_FAILED",
            format!("Failed to load model: {msg}"),
        ),
        ModelLoadError::Exhausted => (
            StatusCode::SERVICE_UNAVAILABLE,
            "NO_BACKEND_AVAILABLE",
            "All candidate backends failed to load".to_string(),
        ),
    }
}

fn classify_generate(err: &GenerateError) -> (StatusCode, &'static str, String) {
    match err {
        GenerateError::EditUnsupported => (
            StatusCode::BAD_REQUEST,
            "I2I_UNSUPPORTED",
            err.to_string(),
        ),
        GenerateError::Workflow(workflow) => classify_workflow_client(workflow),
        GenerateError::Inference(msg) if mentions_gpu_oom(msg) => insufficient_gpu_memory(),
        GenerateError::Inference(msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INFERENCE_FAILED",
            format!("Inference failed: {msg}"),
        ),
    }
}

fn classify_workflow(err: &RemoteWorkflowError) -> (StatusCode, &'static str, String) {
    match err {
        RemoteWorkflowError::Template(TemplateError::Unknown(name)) => (
            StatusCode::NOT_FOUND,
            "UNKNOWN_TEMPLATE",
            format!("Unknown template: {name}"),
        ),
        RemoteWorkflowError::Client(client) => classify_workflow_client(client),
        RemoteWorkflowError::InputImageRequired(mode) => (
            StatusCode::BAD_REQUEST,
            "INPUT_IMAGE_REQUIRED",
            format!("Mode '{mode}' requires an input image"),
        ),
    }
}

fn classify_workflow_client(err: &WorkflowClientError) -> (StatusCode, &'static str, String) {
    match err {
        WorkflowClientError::Submission { .. } => (
            StatusCode::BAD_GATEWAY,
            "SUBMISSION_FAILED",
            err.to_string(),
        ),
        WorkflowClientError::RemoteExecution(msg) if mentions_gpu_oom(msg) => {
            insufficient_gpu_memory()
        }
        WorkflowClientError::RemoteExecution(msg) => (
            StatusCode::BAD_GATEWAY,
            "REMOTE_EXECUTION_FAILED",
            format!("Remote execution failed: {msg}"),
        ),
        WorkflowClientError::Timeout(budget) => (
            StatusCode::GATEWAY_TIMEOUT,
            "REMOTE_TIMEOUT",
            format!("Remote workflow did not complete within {budget:?}"),
        ),
        WorkflowClientError::NoOutput => (
            StatusCode::BAD_GATEWAY,
            "NO_OUTPUT",
            err.to_string(),
        ),
        WorkflowClientError::Transport(transport) => (
            StatusCode::BAD_GATEWAY,
            "REMOTE_UNREACHABLE",
            transport.to_string(),
        ),
    }
}

fn classify_caption(err: &CaptionError) -> (StatusCode, &'static str, String) {
    match err {
        CaptionError::Api { status, body } => (
            StatusCode::BAD_GATEWAY,
            "CAPTION_API_ERROR",
            format!("Chat API error ({status}): {body}"),
        ),
        CaptionError::Request(e) => (
            StatusCode::BAD_GATEWAY,
            "CAPTION_API_UNREACHABLE",
            e.to_string(),
        ),
        CaptionError::EmptyCompletion => (
            StatusCode::BAD_GATEWAY,
            "CAPTION_EMPTY",
            err.to_string(),
        ),
    }
}

/// The distinct "insufficient GPU memory" response.
fn insufficient_gpu_memory() -> (StatusCode, &'static str, String) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "INSUFFICIENT_GPU_MEMORY",
        "Insufficient GPU memory for this request; try a smaller model or resolution".to_string(),
    )
}

/// Pattern match GPU memory exhaustion out of an underlying message.
fn mentions_gpu_oom(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("out of memory")
        || lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == "oom")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oom_load_failures_map_to_the_distinct_response() {
        let (status, code, _) =
            classify_load(&ModelLoadError::OutOfMemory("CUDA out of memory".into()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "INSUFFICIENT_GPU_MEMORY");
    }

    #[test]
    fn remote_oom_messages_map_to_the_distinct_response() {
        let err = WorkflowClientError::RemoteExecution("torch: CUDA out of memory".into());
        let (status, code, _) = classify_workflow_client(&err);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "INSUFFICIENT_GPU_MEMORY");
    }

    #[test]
    fn other_remote_failures_surface_the_message_verbatim() {
        let err = WorkflowClientError::RemoteExecution("node 5 exploded".into());
        let (status, code, message) = classify_workflow_client(&err);
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(code, "REMOTE_EXECUTION_FAILED");
        assert!(message.contains("node 5 exploded"));
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = WorkflowClientError::Timeout(std::time::Duration::from_secs(180));
        let (status, code, _) = classify_workflow_client(&err);
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(code, "REMOTE_TIMEOUT");
    }

    #[test]
    fn unknown_template_maps_to_not_found() {
        let err = RemoteWorkflowError::Template(TemplateError::Unknown("x".into()));
        let (status, code, _) = classify_workflow(&err);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "UNKNOWN_TEMPLATE");
    }
}
