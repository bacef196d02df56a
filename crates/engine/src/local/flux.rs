//! Flux-family pipeline on candle.
//!
//! Follows the candle flux reference flow: T5 and CLIP text embeddings,
//! the flux transformer denoised over a shifted schedule, and the flux
//! autoencoder for decoding. Text-to-image only; the transformer takes
//! no init latent.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{clip, flux, t5};

use promokit_core::params::GenerationParams;
use promokit_core::registry::ModelConfig;

use crate::backend::{GenerateError, GenerationOutput};
use super::{hub_file, tensor_to_png};

/// Repository carrying the T5 encoder configuration.
const T5_REPO: &str = "google/t5-v1_1-xxl";
/// Repository carrying a tokenizers-format T5 tokenizer.
const T5_TOKENIZER_REPO: &str = "lmz/mt5-tokenizers";
/// Repository carrying the CLIP text encoder.
const CLIP_REPO: &str = "openai/clip-vit-large-patch14";

pub struct FluxPipeline {
    config: ModelConfig,
    device: Device,
    dtype: DType,
    /// Schnell-family checkpoints run guidance-free on a plain schedule.
    dev_schedule: bool,
    t5_tokenizer: tokenizers::Tokenizer,
    clip_tokenizer: tokenizers::Tokenizer,
    t5_config: t5::Config,
    t5_weights: std::path::PathBuf,
    clip_weights: std::path::PathBuf,
    flux_weights: std::path::PathBuf,
    ae_weights: std::path::PathBuf,
}

impl FluxPipeline {
    pub fn load(config: ModelConfig, device: &Device, dtype: DType) -> Result<Self, String> {
        let repo = config.id.clone();
        let auth = config.requires_auth;
        let dev_schedule = !repo.to_ascii_lowercase().contains("schnell");

        let t5_tokenizer = tokenizers::Tokenizer::from_file(hub_file(
            T5_TOKENIZER_REPO,
            "t5-v1_1-xxl.tokenizer.json",
            false,
        )?)
        .map_err(|e| format!("failed to load t5 tokenizer: {e}"))?;
        let clip_tokenizer =
            tokenizers::Tokenizer::from_file(hub_file(CLIP_REPO, "tokenizer.json", false)?)
                .map_err(|e| format!("failed to load clip tokenizer: {e}"))?;

        let t5_config_path = hub_file(T5_REPO, "config.json", false)?;
        let t5_config: t5::Config = serde_json::from_str(
            &std::fs::read_to_string(t5_config_path).map_err(|e| e.to_string())?,
        )
        .map_err(|e| format!("invalid t5 config: {e}"))?;

        let t5_weights = hub_file(T5_REPO, "model.safetensors", false)?;
        let clip_weights = hub_file(CLIP_REPO, "model.safetensors", false)?;

        let flux_file = if dev_schedule {
            "flux1-dev.safetensors"
        } else {
            "flux1-schnell.safetensors"
        };
        let flux_weights = hub_file(&repo, flux_file, auth)?;
        let ae_weights = hub_file(&repo, "ae.safetensors", auth)?;

        tracing::info!(model = %repo, dev_schedule, "Flux weight files resolved");

        Ok(Self {
            config,
            device: device.clone(),
            dtype,
            dev_schedule,
            t5_tokenizer,
            clip_tokenizer,
            t5_config,
            t5_weights,
            clip_weights,
            flux_weights,
            ae_weights,
        })
    }

    pub fn txt2img(&mut self, params: &GenerationParams) -> Result<GenerationOutput, GenerateError> {
        self.run(params).map_err(GenerateError::Inference)
    }

    // ---- private helpers ----

    fn run(&self, params: &GenerationParams) -> Result<GenerationOutput, String> {
        let seed = params.seed.unwrap_or_else(rand::random::<u32>);
        self.device.set_seed(seed as u64).map_err(|e| e.to_string())?;

        let height = params.height as usize;
        let width = params.width as usize;

        let t5_emb = self.t5_embedding(&params.prompt)?;
        let clip_emb = self.clip_embedding(&params.prompt)?;

        let img = flux::sampling::get_noise(1, height, width, &self.device)
            .and_then(|t| t.to_dtype(self.dtype))
            .map_err(|e| e.to_string())?;
        let state = flux::sampling::State::new(&t5_emb, &clip_emb, &img).map_err(|e| e.to_string())?;

        let timesteps = if self.dev_schedule {
            flux::sampling::get_schedule(
                params.steps as usize,
                Some((state.img.dims()[1], 0.5, 1.15)),
            )
        } else {
            flux::sampling::get_schedule(params.steps as usize, None)
        };

        let flux_config = if self.dev_schedule {
            flux::model::Config::dev()
        } else {
            flux::model::Config::schnell()
        };
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&self.flux_weights], self.dtype, &self.device)
                .map_err(|e| e.to_string())?
        };
        let model = flux::model::Flux::new(&flux_config, vb).map_err(|e| e.to_string())?;

        let denoised = flux::sampling::denoise(
            &model,
            &state.img,
            &state.img_ids,
            &state.txt,
            &state.txt_ids,
            &state.vec,
            &timesteps,
            params.guidance,
        )
        .map_err(|e| e.to_string())?;
        let latent = flux::sampling::unpack(&denoised, height, width).map_err(|e| e.to_string())?;

        let ae_config = if self.dev_schedule {
            flux::autoencoder::Config::dev()
        } else {
            flux::autoencoder::Config::schnell()
        };
        let vb_ae = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&self.ae_weights], self.dtype, &self.device)
                .map_err(|e| e.to_string())?
        };
        let autoencoder =
            flux::autoencoder::AutoEncoder::new(&ae_config, vb_ae).map_err(|e| e.to_string())?;

        let image = autoencoder.decode(&latent).map_err(|e| e.to_string())?;
        let image = ((image.clamp(-1f32, 1f32).map_err(|e| e.to_string())? + 1.0)
            .and_then(|t| t / 2.0))
        .map_err(|e| e.to_string())?;
        let png = tensor_to_png(&image).map_err(|e| e.to_string())?;

        tracing::info!(model = %self.config.id, seed, steps = params.steps, "Flux generation complete");
        Ok(GenerationOutput {
            images: vec![png],
            seed,
        })
    }

    fn t5_embedding(&self, prompt: &str) -> Result<Tensor, String> {
        let mut tokens = self
            .t5_tokenizer
            .encode(prompt, true)
            .map_err(|e| e.to_string())?
            .get_ids()
            .to_vec();
        tokens.resize(256, 0);
        let input = Tensor::new(tokens.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| e.to_string())?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&self.t5_weights], self.dtype, &self.device)
                .map_err(|e| e.to_string())?
        };
        let mut model =
            t5::T5EncoderModel::load(vb, &self.t5_config).map_err(|e| e.to_string())?;
        model.forward(&input).map_err(|e| e.to_string())
    }

    fn clip_embedding(&self, prompt: &str) -> Result<Tensor, String> {
        let tokens = self
            .clip_tokenizer
            .encode(prompt, true)
            .map_err(|e| e.to_string())?
            .get_ids()
            .to_vec();
        let input = Tensor::new(tokens.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| e.to_string())?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&self.clip_weights], self.dtype, &self.device)
                .map_err(|e| e.to_string())?
        };
        let clip_config = clip::text_model::ClipTextConfig {
            vocab_size: 49408,
            projection_dim: 768,
            activation: clip::text_model::Activation::QuickGelu,
            intermediate_size: 3072,
            embed_dim: 768,
            max_position_embeddings: 77,
            pad_with: None,
            num_hidden_layers: 12,
            num_attention_heads: 12,
        };
        let model =
            clip::text_model::ClipTextTransformer::new(vb.pp("text_model"), &clip_config)
                .map_err(|e| e.to_string())?;
        model.forward(&input).map_err(|e| e.to_string())
    }
}
