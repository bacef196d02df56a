//! Generation parameters and per-model clamping.
//!
//! [`GenerationParams`] is the flat runtime parameter set shared by every
//! generation path (local pipelines and remote workflows). Values are
//! clamped against the limits a model declares in its
//! [`ModelConfig`](crate::registry::ModelConfig) before dispatch so a
//! request can never push a backend past its declared envelope.

use serde::{Deserialize, Serialize};

use crate::registry::ModelConfig;

/// Latent-space granularity: diffusion backends require pixel dimensions
/// that are multiples of this value.
pub const DIMENSION_STEP: u32 = 8;

/// Smallest accepted edge length for a generated image.
pub const MIN_DIMENSION: u32 = 64;

/// Flat set of runtime parameters for one generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Positive prompt text.
    pub prompt: String,
    /// Negative prompt text; `None` defers to the model's configured default.
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Number of denoising steps.
    pub steps: u32,
    /// Guidance / CFG value.
    pub guidance: f64,
    /// Denoise strength for image-to-image (ignored for text-to-image).
    pub denoise: f64,
    /// Explicit seed; `None` means "pick one at random and report it back".
    #[serde(default)]
    pub seed: Option<u32>,
}

impl GenerationParams {
    /// Build parameters for `prompt` using a model's declared defaults.
    pub fn for_model(prompt: impl Into<String>, config: &ModelConfig) -> Self {
        let [width, height] = config.params.default_size;
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width,
            height,
            steps: config.params.default_steps,
            guidance: config.params.guidance_scale.unwrap_or(7.0),
            denoise: 1.0,
            seed: None,
        }
    }

    /// Clamp every field to the limits the model declares.
    ///
    /// - steps: `[1, max_steps]`
    /// - width/height: `[MIN_DIMENSION, max_size]`, snapped down to a
    ///   multiple of [`DIMENSION_STEP`]
    /// - denoise: `[0.0, 1.0]`
    ///
    /// Also fills in the model's default negative prompt when the request
    /// carries none and the model asks for one.
    pub fn clamped_to(mut self, config: &ModelConfig) -> Self {
        let p = &config.params;
        self.steps = self.steps.clamp(1, p.max_steps);
        self.width = snap_dimension(self.width, p.max_size[0]);
        self.height = snap_dimension(self.height, p.max_size[1]);
        self.denoise = self.denoise.clamp(0.0, 1.0);
        if self.negative_prompt.is_none() && p.use_negative_prompt {
            self.negative_prompt = Some(p.negative_prompt.clone());
        }
        self
    }
}

/// Clamp a pixel dimension to `[MIN_DIMENSION, max]` and snap it down to
/// a multiple of [`DIMENSION_STEP`].
pub fn snap_dimension(value: u32, max: u32) -> u32 {
    let clamped = value.clamp(MIN_DIMENSION, max.max(MIN_DIMENSION));
    clamped - (clamped % DIMENSION_STEP)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelRegistry;

    fn test_config() -> ModelConfig {
        let registry = ModelRegistry::builtin_minimal();
        registry
            .get(ModelRegistry::BUILTIN_MODEL_NAME)
            .expect("builtin model present")
            .clone()
    }

    #[test]
    fn snap_rounds_down_to_multiple_of_eight() {
        assert_eq!(snap_dimension(1023, 2048), 1016);
        assert_eq!(snap_dimension(1024, 2048), 1024);
    }

    #[test]
    fn snap_clamps_to_max() {
        assert_eq!(snap_dimension(4096, 1024), 1024);
    }

    #[test]
    fn snap_enforces_minimum() {
        assert_eq!(snap_dimension(1, 1024), MIN_DIMENSION);
    }

    #[test]
    fn for_model_uses_declared_defaults() {
        let config = test_config();
        let params = GenerationParams::for_model("a storefront banner", &config);
        assert_eq!(params.steps, config.params.default_steps);
        assert_eq!(params.width, config.params.default_size[0]);
        assert_eq!(params.height, config.params.default_size[1]);
        assert!(params.seed.is_none());
    }

    #[test]
    fn clamp_caps_steps_at_model_limit() {
        let config = test_config();
        let mut params = GenerationParams::for_model("p", &config);
        params.steps = 10_000;
        let clamped = params.clamped_to(&config);
        assert_eq!(clamped.steps, config.params.max_steps);
    }

    #[test]
    fn clamp_caps_dimensions_at_model_limit() {
        let config = test_config();
        let mut params = GenerationParams::for_model("p", &config);
        params.width = 100_000;
        params.height = 100_000;
        let clamped = params.clamped_to(&config);
        assert_eq!(clamped.width, config.params.max_size[0]);
        assert_eq!(clamped.height, config.params.max_size[1]);
    }

    #[test]
    fn clamp_bounds_denoise_to_unit_interval() {
        let config = test_config();
        let mut params = GenerationParams::for_model("p", &config);
        params.denoise = 3.5;
        assert_eq!(params.clamped_to(&config).denoise, 1.0);
    }

    #[test]
    fn clamp_keeps_explicit_negative_prompt() {
        let config = test_config();
        let mut params = GenerationParams::for_model("p", &config);
        params.negative_prompt = Some("blurry".to_string());
        let clamped = params.clamped_to(&config);
        assert_eq!(clamped.negative_prompt.as_deref(), Some("blurry"));
    }
}
