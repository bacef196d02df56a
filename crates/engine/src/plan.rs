//! Runtime-independent load planning.
//!
//! [`plan_for`] turns a model entry plus the configured memory options
//! into a [`LoadPlan`]: which precision to load in, whether to quantize,
//! and where the pipeline lands on the device map. The plan is pure data
//! so the selection rules are testable without any model runtime.

use promokit_core::registry::{BackendKind, MemoryOptions, ModelConfig, OffloadMode, QuantizationMode};

/// Weight precision a pipeline is loaded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Bf16,
    F16,
    F32,
}

/// Device placement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Whole pipeline on one accelerator.
    SingleGpu,
    /// Accelerator with CPU spillover for components that do not fit.
    GpuWithCpuSpillover,
    /// Fully sequential CPU offload.
    SequentialCpuOffload,
}

/// How one backend should be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPlan {
    pub precision: Precision,
    pub placement: Placement,
    /// Requested quantization; [`QuantizationMode::None`] when the
    /// artifact is already quantized (quantizing twice corrupts weights).
    pub quantization: QuantizationMode,
    /// Whether to derive an image-to-image pipeline from the same
    /// weights.
    pub derive_edit_pipeline: bool,
}

/// Id substrings that denote an already-quantized artifact.
const PREQUANTIZED_MARKERS: &[&str] = &["4bit", "8bit", "int4", "int8", "fp8", "gguf", "dduf", "quant"];

/// Whether a backend id denotes a pre-quantized artifact.
pub fn id_denotes_prequantized(id: &str) -> bool {
    let id = id.to_ascii_lowercase();
    PREQUANTIZED_MARKERS.iter().any(|marker| id.contains(marker))
}

/// Compute the load plan for one model under the configured memory
/// options.
pub fn plan_for(config: &ModelConfig, memory: &MemoryOptions) -> LoadPlan {
    let precision = match config.backend_type {
        BackendKind::Flux => Precision::Bf16,
        BackendKind::Sdxl => Precision::F16,
        // The remote backend holds no local weights; precision is moot
        // but F32 keeps the plan total.
        BackendKind::RemoteGraph => Precision::F32,
    };

    let quantization = if id_denotes_prequantized(&config.id) {
        QuantizationMode::None
    } else {
        memory.quantization
    };

    let placement = match memory.offload {
        OffloadMode::None => Placement::SingleGpu,
        OffloadMode::Spillover => Placement::GpuWithCpuSpillover,
        OffloadMode::Sequential => Placement::SequentialCpuOffload,
    };

    LoadPlan {
        precision,
        placement,
        quantization,
        derive_edit_pipeline: config.params.supports_i2i,
    }
}

// ---------------------------------------------------------------------------
// Memory optimization hints
// ---------------------------------------------------------------------------

/// Best-effort memory/speed optimizations.
///
/// These are pure performance hints with no correctness impact: a hint
/// that cannot be applied is reported, logged by the caller, and
/// discarded, never propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryHint {
    VaeTiling,
    VaeSlicing,
    AttentionSlicing,
}

impl MemoryHint {
    pub fn name(&self) -> &'static str {
        match self {
            MemoryHint::VaeTiling => "vae-tiling",
            MemoryHint::VaeSlicing => "vae-slicing",
            MemoryHint::AttentionSlicing => "attention-slicing",
        }
    }
}

/// Outcome of attempting one hint.
#[derive(Debug, Clone)]
pub struct HintOutcome {
    pub hint: MemoryHint,
    pub applied: bool,
    /// Reason the hint was not applied, when it wasn't.
    pub detail: Option<String>,
}

impl HintOutcome {
    pub fn applied(hint: MemoryHint) -> Self {
        Self {
            hint,
            applied: true,
            detail: None,
        }
    }

    pub fn skipped(hint: MemoryHint, detail: impl Into<String>) -> Self {
        Self {
            hint,
            applied: false,
            detail: Some(detail.into()),
        }
    }
}

/// The hints requested by the configured memory options.
pub fn requested_hints(memory: &MemoryOptions) -> Vec<MemoryHint> {
    let mut hints = Vec::new();
    if memory.vae_tiling {
        hints.push(MemoryHint::VaeTiling);
    }
    if memory.vae_slicing {
        hints.push(MemoryHint::VaeSlicing);
    }
    if memory.attention_slicing {
        hints.push(MemoryHint::AttentionSlicing);
    }
    hints
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use promokit_core::registry::{ModelParams, ModelRegistry};

    fn config(kind: BackendKind, id: &str, supports_i2i: bool) -> ModelConfig {
        let base = ModelRegistry::builtin_minimal();
        let mut config = base
            .get(ModelRegistry::BUILTIN_MODEL_NAME)
            .expect("builtin entry")
            .clone();
        config.backend_type = kind;
        config.id = id.to_string();
        config.params = ModelParams {
            supports_i2i,
            ..config.params
        };
        config
    }

    #[test]
    fn flux_family_prefers_bf16() {
        let plan = plan_for(
            &config(BackendKind::Flux, "black-forest-labs/FLUX.1-dev", false),
            &MemoryOptions::default(),
        );
        assert_eq!(plan.precision, Precision::Bf16);
    }

    #[test]
    fn sdxl_family_prefers_f16() {
        let plan = plan_for(
            &config(BackendKind::Sdxl, "stabilityai/sdxl-base", true),
            &MemoryOptions::default(),
        );
        assert_eq!(plan.precision, Precision::F16);
        assert!(plan.derive_edit_pipeline);
    }

    #[test]
    fn prequantized_ids_skip_quantization() {
        assert!(id_denotes_prequantized("FLUX.1-dev-Q4-bnb.dduf"));
        assert!(id_denotes_prequantized("mlx-community/model-4bit"));
        assert!(id_denotes_prequantized("weights-fp8.safetensors"));
        assert!(!id_denotes_prequantized("stabilityai/sdxl-base"));

        let memory = MemoryOptions {
            quantization: QuantizationMode::FourBit,
            ..MemoryOptions::default()
        };
        let plan = plan_for(&config(BackendKind::Flux, "repo/model-8bit", false), &memory);
        assert_eq!(plan.quantization, QuantizationMode::None);

        let plan = plan_for(&config(BackendKind::Flux, "repo/model", false), &memory);
        assert_eq!(plan.quantization, QuantizationMode::FourBit);
    }

    #[test]
    fn offload_modes_map_to_placements() {
        let base = config(BackendKind::Sdxl, "repo/model", false);
        for (offload, placement) in [
            (OffloadMode::None, Placement::SingleGpu),
            (OffloadMode::Spillover, Placement::GpuWithCpuSpillover),
            (OffloadMode::Sequential, Placement::SequentialCpuOffload),
        ] {
            let memory = MemoryOptions {
                offload,
                ..MemoryOptions::default()
            };
            assert_eq!(plan_for(&base, &memory).placement, placement);
        }
    }

    #[test]
    fn requested_hints_follow_memory_options() {
        let memory = MemoryOptions {
            vae_tiling: true,
            vae_slicing: false,
            attention_slicing: true,
            ..MemoryOptions::default()
        };
        let hints = requested_hints(&memory);
        assert_eq!(hints, vec![MemoryHint::VaeTiling, MemoryHint::AttentionSlicing]);
    }
}
