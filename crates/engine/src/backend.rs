//! The diffusion backend seam.
//!
//! Every generation path (local in-process pipelines and the remote
//! node-graph server) sits behind [`DiffusionBackend`], so the manager,
//! the HTTP layer, and the fallback chain never care which runtime is
//! resident.

use async_trait::async_trait;

use promokit_comfyui::client::WorkflowClientError;
use promokit_core::params::GenerationParams;

/// Result of one generation call.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// PNG-encoded output images, at least one.
    pub images: Vec<Vec<u8>>,
    /// The seed the job actually ran with, for reproducibility.
    pub seed: u32,
}

/// Errors raised by a backend during generation.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The resident backend cannot derive an image-to-image pipeline.
    #[error("The resident backend does not support image-to-image")]
    EditUnsupported,

    /// A remote workflow failed (submission, execution, timeout, or
    /// missing outputs).
    #[error(transparent)]
    Workflow(#[from] WorkflowClientError),

    /// A local inference failure, message passed through from the
    /// runtime.
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// A loaded image-generation backend.
///
/// Implementations hold whatever pipeline state their runtime needs; the
/// pair of operations mirrors the text-to-image / image-to-image
/// pipeline pair of the resident backend.
#[async_trait]
pub trait DiffusionBackend: Send + Sync {
    /// Generate images from a text prompt.
    async fn generate(&self, params: &GenerationParams) -> Result<GenerationOutput, GenerateError>;

    /// Re-render an input image under a prompt (image-to-image).
    ///
    /// `image_png` is a PNG-encoded input image. Backends without a
    /// derived image-to-image pipeline return
    /// [`GenerateError::EditUnsupported`].
    async fn edit(
        &self,
        image_png: &[u8],
        params: &GenerationParams,
    ) -> Result<GenerationOutput, GenerateError>;

    /// Whether an image-to-image pipeline is available.
    fn supports_edit(&self) -> bool;
}
