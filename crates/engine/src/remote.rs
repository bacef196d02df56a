//! The remote node-graph backend.
//!
//! [`RemoteWorkflowService`] runs one template end to end: build a fresh
//! graph, patch runtime parameters (and the input artifact for image
//! modes), submit, poll, and download the outputs. It backs both the
//! resident [`RemoteGraphBackend`] and the mode-parameterized edit
//! endpoint in the API layer.

use std::sync::Arc;

use async_trait::async_trait;

use promokit_comfyui::client::{PollConfig, WorkflowClient, WorkflowClientError};
use promokit_comfyui::patch::{apply_checkpoint, apply_input_image, apply_params};
use promokit_comfyui::templates::{Template, TemplateError, TemplateStore};
use promokit_core::params::GenerationParams;
use promokit_core::registry::ModelConfig;

use crate::backend::{DiffusionBackend, GenerateError, GenerationOutput};
use crate::loader::ModelLoadError;

/// Errors from running a remote workflow.
#[derive(Debug, thiserror::Error)]
pub enum RemoteWorkflowError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Client(#[from] WorkflowClientError),

    /// The selected mode consumes an input image and none was supplied.
    #[error("Mode '{0}' requires an input image")]
    InputImageRequired(String),
}

impl From<RemoteWorkflowError> for GenerateError {
    fn from(err: RemoteWorkflowError) -> Self {
        match err {
            RemoteWorkflowError::Client(e) => GenerateError::Workflow(e),
            other => GenerateError::Inference(other.to_string()),
        }
    }
}

/// Template execution against one remote graph server.
pub struct RemoteWorkflowService {
    client: WorkflowClient,
    store: TemplateStore,
    poll: PollConfig,
}

impl RemoteWorkflowService {
    pub fn new(api_url: String, poll: PollConfig) -> Self {
        Self {
            client: WorkflowClient::new(api_url),
            store: TemplateStore::new(),
            poll,
        }
    }

    /// Base URL of the remote server.
    pub fn api_url(&self) -> &str {
        self.client.api_url()
    }

    /// Pre-flight liveness probe; non-fatal.
    pub async fn check_connection(&self) -> bool {
        self.client.check_connection().await
    }

    /// Resolve a mode string to its template.
    pub fn template(&self, mode: &str) -> Result<&Template, TemplateError> {
        self.store.get_by_name(mode)
    }

    /// Run one template end to end.
    ///
    /// * `checkpoint` - model weights identifier patched into the graph's
    ///   loader node, when the caller pins one.
    /// * `input_image` - PNG bytes for modes with an external input; the
    ///   artifact is uploaded first so the graph can reference it.
    pub async fn execute(
        &self,
        mode: &str,
        checkpoint: Option<&str>,
        input_image: Option<&[u8]>,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, RemoteWorkflowError> {
        let template = self.store.get_by_name(mode)?;
        let mut graph = template.build();

        if template.requires_input_image() {
            let bytes = input_image
                .ok_or_else(|| RemoteWorkflowError::InputImageRequired(mode.to_string()))?;
            let artifact = self
                .client
                .upload_input_artifact(bytes.to_vec(), "promokit_input.png")
                .await?;
            apply_input_image(template, &mut graph, &artifact);
        }

        if let Some(id) = checkpoint {
            apply_checkpoint(template, &mut graph, id);
        }

        let outcome = apply_params(template, &mut graph, params);
        if !outcome.skipped.is_empty() {
            tracing::warn!(
                mode,
                skipped = ?outcome.skipped,
                "Some parameters had no patch target in this template",
            );
        }

        tracing::info!(mode, seed = outcome.seed, "Executing remote workflow");
        let images = self.client.run(&graph, self.poll).await?;

        Ok(GenerationOutput {
            images,
            seed: outcome.seed,
        })
    }
}

// ---------------------------------------------------------------------------
// Resident backend over the remote server
// ---------------------------------------------------------------------------

/// The remote node-graph server as a loadable backend.
///
/// "Loading" is weightless on our side: construction verifies the server
/// is reachable and pins the checkpoint id the graphs will name.
pub struct RemoteGraphBackend {
    service: Arc<RemoteWorkflowService>,
    config: ModelConfig,
}

impl RemoteGraphBackend {
    /// Verify connectivity and bind the backend to its checkpoint.
    pub async fn connect(
        service: Arc<RemoteWorkflowService>,
        config: ModelConfig,
    ) -> Result<Self, ModelLoadError> {
        if !service.check_connection().await {
            return Err(ModelLoadError::Failed(format!(
                "Graph server unreachable at {}",
                service.api_url()
            )));
        }
        Ok(Self { service, config })
    }
}

#[async_trait]
impl DiffusionBackend for RemoteGraphBackend {
    async fn generate(&self, params: &GenerationParams) -> Result<GenerationOutput, GenerateError> {
        self.service
            .execute("text-to-image", Some(&self.config.id), None, params)
            .await
            .map_err(Into::into)
    }

    async fn edit(
        &self,
        image_png: &[u8],
        params: &GenerationParams,
    ) -> Result<GenerationOutput, GenerateError> {
        if !self.supports_edit() {
            return Err(GenerateError::EditUnsupported);
        }
        self.service
            .execute(
                "image-to-image",
                Some(&self.config.id),
                Some(image_png),
                params,
            )
            .await
            .map_err(Into::into)
    }

    fn supports_edit(&self) -> bool {
        self.config.params.supports_i2i
    }
}
