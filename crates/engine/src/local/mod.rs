//! In-process diffusion pipelines (candle).
//!
//! Compiled only with the `local` cargo feature. Weight files come from
//! the hub cache via `hf-hub`, honoring `requires_auth` through the
//! `HF_TOKEN` environment variable. Inference is blocking and runs under
//! `spawn_blocking`; the manager's lock already serializes calls, the
//! inner mutex only satisfies the borrow rules.

mod flux;
mod sdxl;

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use candle_core::{DType, Device};

use promokit_core::params::GenerationParams;
use promokit_core::registry::{BackendKind, MemoryOptions, ModelConfig, QuantizationMode};

use crate::backend::{DiffusionBackend, GenerateError, GenerationOutput};
use crate::loader::{classify_load_failure, BuiltBackend, ModelLoadError};
use crate::plan::{requested_hints, HintOutcome, LoadPlan, MemoryHint, Placement, Precision};

/// Sliced-attention threshold used when the attention-slicing hint is on.
pub(crate) const SLICED_ATTENTION_SIZE: usize = 128;

/// One loaded local pipeline.
enum PipelineKind {
    Sdxl(sdxl::SdxlPipeline),
    Flux(flux::FluxPipeline),
}

/// Local pipelines behind the backend seam.
pub struct LocalBackend {
    pipeline: Arc<StdMutex<PipelineKind>>,
    supports_edit: bool,
}

/// Build a local backend for a flux- or sdxl-family model.
pub async fn build(
    name: &str,
    config: &ModelConfig,
    memory: &MemoryOptions,
    plan: LoadPlan,
) -> Result<BuiltBackend, ModelLoadError> {
    let name = name.to_string();
    let config = config.clone();
    let memory = memory.clone();

    let requires_auth = config.requires_auth;
    let result = tokio::task::spawn_blocking(move || build_blocking(&name, &config, &memory, plan))
        .await
        .map_err(|e| ModelLoadError::Failed(format!("Loader task panicked: {e}")))?;

    result.map_err(|message| classify_load_failure(message, requires_auth))
}

/// Blocking construction: weight download, device placement, pipeline
/// assembly. Returns the raw failure message for classification.
fn build_blocking(
    name: &str,
    config: &ModelConfig,
    memory: &MemoryOptions,
    plan: LoadPlan,
) -> Result<BuiltBackend, String> {
    let device = select_device(plan.placement).map_err(|e| e.to_string())?;
    let dtype = select_dtype(plan.precision, &device);

    if plan.quantization != QuantizationMode::None {
        // On-the-fly quantization needs a pre-quantized artifact with
        // this runtime; degrade to the planned precision.
        tracing::warn!(
            model = name,
            "Requested quantization is unavailable in the local runtime, loading unquantized",
        );
    }

    let attention_slicing = memory.attention_slicing;
    let pipeline = match config.backend_type {
        BackendKind::Sdxl => PipelineKind::Sdxl(
            sdxl::SdxlPipeline::load(config, &device, dtype, attention_slicing)
                .map_err(|e| e.to_string())?,
        ),
        BackendKind::Flux => PipelineKind::Flux(
            flux::FluxPipeline::load(config, &device, dtype).map_err(|e| e.to_string())?,
        ),
        BackendKind::RemoteGraph => {
            return Err("Remote-graph models are not local pipelines".to_string());
        }
    };

    let hints = hint_outcomes(&pipeline, memory);
    let supports_edit = plan.derive_edit_pipeline && matches!(pipeline, PipelineKind::Sdxl(_));

    Ok(BuiltBackend {
        backend: Arc::new(LocalBackend {
            pipeline: Arc::new(StdMutex::new(pipeline)),
            supports_edit,
        }),
        hints,
    })
}

/// Map the planned placement onto a candle device.
fn select_device(placement: Placement) -> candle_core::Result<Device> {
    match placement {
        Placement::SingleGpu => Device::cuda_if_available(0),
        Placement::GpuWithCpuSpillover => {
            // The runtime has no partial device map; the closest
            // behaviour is a single accelerator.
            tracing::warn!("CPU spillover is unavailable in the local runtime, using a single device");
            Device::cuda_if_available(0)
        }
        Placement::SequentialCpuOffload => Ok(Device::Cpu),
    }
}

/// Pick the effective dtype: half precision is pointless on CPU.
fn select_dtype(precision: Precision, device: &Device) -> DType {
    if matches!(device, Device::Cpu) {
        return DType::F32;
    }
    match precision {
        Precision::Bf16 => DType::BF16,
        Precision::F16 => DType::F16,
        Precision::F32 => DType::F32,
    }
}

/// Resolve every requested memory hint against what the runtime can do.
fn hint_outcomes(pipeline: &PipelineKind, memory: &MemoryOptions) -> Vec<HintOutcome> {
    requested_hints(memory)
        .into_iter()
        .map(|hint| match (hint, pipeline) {
            (MemoryHint::AttentionSlicing, PipelineKind::Sdxl(_)) => HintOutcome::applied(hint),
            (MemoryHint::AttentionSlicing, PipelineKind::Flux(_)) => {
                HintOutcome::skipped(hint, "not supported by the flux runtime")
            }
            (MemoryHint::VaeTiling | MemoryHint::VaeSlicing, _) => {
                HintOutcome::skipped(hint, "not supported by the local runtime")
            }
        })
        .collect()
}

#[async_trait]
impl DiffusionBackend for LocalBackend {
    async fn generate(&self, params: &GenerationParams) -> Result<GenerationOutput, GenerateError> {
        let pipeline = Arc::clone(&self.pipeline);
        let params = params.clone();
        tokio::task::spawn_blocking(move || {
            let mut pipeline = pipeline
                .lock()
                .map_err(|_| GenerateError::Inference("Pipeline lock poisoned".to_string()))?;
            match &mut *pipeline {
                PipelineKind::Sdxl(p) => p.txt2img(&params),
                PipelineKind::Flux(p) => p.txt2img(&params),
            }
        })
        .await
        .map_err(|e| GenerateError::Inference(format!("Inference task panicked: {e}")))?
    }

    async fn edit(
        &self,
        image_png: &[u8],
        params: &GenerationParams,
    ) -> Result<GenerationOutput, GenerateError> {
        if !self.supports_edit {
            return Err(GenerateError::EditUnsupported);
        }
        let pipeline = Arc::clone(&self.pipeline);
        let params = params.clone();
        let image_png = image_png.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut pipeline = pipeline
                .lock()
                .map_err(|_| GenerateError::Inference("Pipeline lock poisoned".to_string()))?;
            match &mut *pipeline {
                PipelineKind::Sdxl(p) => p.img2img(&image_png, &params),
                PipelineKind::Flux(_) => Err(GenerateError::EditUnsupported),
            }
        })
        .await
        .map_err(|e| GenerateError::Inference(format!("Inference task panicked: {e}")))?
    }

    fn supports_edit(&self) -> bool {
        self.supports_edit
    }
}

// ---------------------------------------------------------------------------
// Shared helpers for the pipelines
// ---------------------------------------------------------------------------

/// Fetch one file from a hub repository, using `HF_TOKEN` for gated
/// repositories.
pub(crate) fn hub_file(
    repo: &str,
    filename: &str,
    requires_auth: bool,
) -> Result<std::path::PathBuf, String> {
    let mut builder = hf_hub::api::sync::ApiBuilder::new();
    if requires_auth {
        match std::env::var("HF_TOKEN") {
            Ok(token) => builder = builder.with_token(Some(token)),
            Err(_) => {
                return Err(format!(
                    "authentication required: model '{repo}' is gated and HF_TOKEN is unset"
                ));
            }
        }
    }
    let api = builder.build().map_err(|e| e.to_string())?;
    api.model(repo.to_string())
        .get(filename)
        .map_err(|e| format!("failed to fetch {repo}/{filename}: {e}"))
}

/// Decode a PNG into a `(3, height, width)` tensor scaled to `[-1, 1]`.
pub(crate) fn png_to_tensor(
    bytes: &[u8],
    width: u32,
    height: u32,
    device: &Device,
) -> Result<candle_core::Tensor, GenerateError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| GenerateError::Inference(format!("Invalid input image: {e}")))?
        .resize_exact(width, height, image::imageops::FilterType::CatmullRom)
        .to_rgb8();
    let (width, height) = img.dimensions();
    let data = img.into_raw();
    let tensor = candle_core::Tensor::from_vec(data, (height as usize, width as usize, 3), device)
        .and_then(|t| t.permute((2, 0, 1)))
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| (t / 127.5))
        .and_then(|t| (t - 1.0))
        .map_err(|e| GenerateError::Inference(e.to_string()))?;
    Ok(tensor)
}

/// Convert a `(1, 3, height, width)` tensor in `[0, 1]` into PNG bytes.
pub(crate) fn tensor_to_png(tensor: &candle_core::Tensor) -> Result<Vec<u8>, GenerateError> {
    let to_inference_err = |e: candle_core::Error| GenerateError::Inference(e.to_string());

    let img = tensor
        .squeeze(0)
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.clamp(0f32, 1f32))
        .and_then(|t| (t * 255.0))
        .and_then(|t| t.to_dtype(DType::U8))
        .map_err(to_inference_err)?;
    let (_channels, height, width) = img.dims3().map_err(to_inference_err)?;
    let pixels = img
        .permute((1, 2, 0))
        .and_then(|t| t.flatten_all())
        .and_then(|t| t.to_vec1::<u8>())
        .map_err(to_inference_err)?;

    let buffer = image::RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| GenerateError::Inference("Decoded image has a wrong buffer size".to_string()))?;
    let mut png = Vec::new();
    buffer
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| GenerateError::Inference(e.to_string()))?;
    Ok(png)
}
