//! Backend construction and load-failure classification.
//!
//! [`PipelineFactory`] is the construction seam: the manager asks it for
//! a built backend and never cares which family the model belongs to.
//! [`DefaultFactory`] dispatches on the declared backend type: local
//! flux/sdxl pipelines (behind the `local` feature) or the remote
//! node-graph backend.

use std::sync::Arc;

use async_trait::async_trait;

use promokit_core::registry::{BackendKind, MemoryOptions, ModelConfig};

use crate::backend::DiffusionBackend;
use crate::plan::{plan_for, HintOutcome};
use crate::remote::{RemoteGraphBackend, RemoteWorkflowService};

/// Errors from loading a backend.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    /// The requested short name is not in the registry.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Weight download was refused for lack of credentials.
    #[error("Authentication required to fetch model weights: {0}")]
    Auth(String),

    /// The device ran out of memory while loading.
    #[error("Insufficient GPU memory while loading model: {0}")]
    OutOfMemory(String),

    /// A local-family model was requested but the binary was built
    /// without the `local` feature.
    #[error("Local inference support is not compiled in (enable the `local` feature)")]
    LocalUnavailable,

    /// Any other load failure.
    #[error("Failed to load model: {0}")]
    Failed(String),

    /// Every candidate in the fallback chain failed.
    #[error("All candidate backends failed to load")]
    Exhausted,
}

/// Classify a raw load-failure message into the error taxonomy.
///
/// GPU memory exhaustion and missing-credential failures are pattern
/// matched from the underlying message text; everything else surfaces
/// verbatim as [`ModelLoadError::Failed`].
pub fn classify_load_failure(message: String, requires_auth: bool) -> ModelLoadError {
    use std::sync::OnceLock;
    static OOM: OnceLock<regex::Regex> = OnceLock::new();
    static AUTH: OnceLock<regex::Regex> = OnceLock::new();

    let oom = OOM.get_or_init(|| {
        regex::Regex::new(r"(?i)out of memory|allocation failed|\boom\b")
            .expect("hard-coded regex is valid")
    });
    let auth = AUTH.get_or_init(|| {
        regex::Regex::new(r"(?i)\b401\b|\b403\b|unauthoriz|forbidden|access token|gated repo|authentication")
            .expect("hard-coded regex is valid")
    });

    if oom.is_match(&message) {
        ModelLoadError::OutOfMemory(message)
    } else if requires_auth && auth.is_match(&message) {
        ModelLoadError::Auth(message)
    } else {
        ModelLoadError::Failed(message)
    }
}

/// A backend fresh out of construction, with the outcome of every
/// requested memory optimization hint.
pub struct BuiltBackend {
    pub backend: Arc<dyn DiffusionBackend>,
    pub hints: Vec<HintOutcome>,
}

/// Construction seam between the manager and the concrete runtimes.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    /// Build the backend described by `config`.
    ///
    /// Implementations must not leave partial state behind on failure;
    /// a failed build is fully discarded.
    async fn build(
        &self,
        name: &str,
        config: &ModelConfig,
        memory: &MemoryOptions,
    ) -> Result<BuiltBackend, ModelLoadError>;
}

/// Production factory dispatching on the declared backend family.
pub struct DefaultFactory {
    remote: Arc<RemoteWorkflowService>,
}

impl DefaultFactory {
    pub fn new(remote: Arc<RemoteWorkflowService>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl PipelineFactory for DefaultFactory {
    async fn build(
        &self,
        name: &str,
        config: &ModelConfig,
        memory: &MemoryOptions,
    ) -> Result<BuiltBackend, ModelLoadError> {
        let plan = plan_for(config, memory);
        tracing::debug!(
            model = name,
            family = config.backend_type.as_str(),
            ?plan,
            "Computed load plan",
        );

        match config.backend_type {
            BackendKind::RemoteGraph => {
                let backend =
                    RemoteGraphBackend::connect(Arc::clone(&self.remote), config.clone()).await?;
                Ok(BuiltBackend {
                    backend: Arc::new(backend),
                    // Hints are local-pipeline concerns; the remote
                    // server manages its own memory.
                    hints: Vec::new(),
                })
            }

            #[cfg(feature = "local")]
            BackendKind::Flux | BackendKind::Sdxl => {
                crate::local::build(name, config, memory, plan).await
            }

            #[cfg(not(feature = "local"))]
            BackendKind::Flux | BackendKind::Sdxl => {
                tracing::warn!(
                    model = name,
                    family = config.backend_type.as_str(),
                    "Local-family model requested in a build without the `local` feature",
                );
                Err(ModelLoadError::LocalUnavailable)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn oom_messages_are_classified() {
        let err = classify_load_failure("CUDA error: out of memory".to_string(), false);
        assert_matches!(err, ModelLoadError::OutOfMemory(_));

        let err = classify_load_failure("weight allocation failed on device 0".to_string(), true);
        assert_matches!(err, ModelLoadError::OutOfMemory(_));
    }

    #[test]
    fn auth_messages_are_classified_for_gated_models() {
        let err = classify_load_failure(
            "HTTP 401: access token required for gated repo".to_string(),
            true,
        );
        assert_matches!(err, ModelLoadError::Auth(_));
    }

    #[test]
    fn auth_patterns_on_public_models_stay_generic() {
        // A 403 against a model that needs no credentials is some other
        // infrastructure problem, not a categorized auth failure.
        let err = classify_load_failure("HTTP 403 from mirror".to_string(), false);
        assert_matches!(err, ModelLoadError::Failed(_));
    }

    #[test]
    fn unknown_messages_surface_verbatim() {
        let err = classify_load_failure("disk quota exceeded".to_string(), false);
        assert_matches!(err, ModelLoadError::Failed(message) if message == "disk quota exceeded");
    }
}
