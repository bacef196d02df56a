//! SDXL-family pipeline on candle.
//!
//! Construction follows the candle stable-diffusion reference flow: the
//! two CLIP encoders, the UNet, and the VAE are built from the model
//! repository's safetensors shards; a scheduler is rebuilt per request
//! from the step count. An image-to-image pipeline is derived from the
//! same weights by encoding the input through the VAE and starting the
//! denoise loop from a later timestep.

use candle_core::{DType, Device, Tensor, D};
use candle_transformers::models::stable_diffusion::{self, StableDiffusionConfig};

use promokit_core::params::GenerationParams;
use promokit_core::registry::ModelConfig;

use crate::backend::{GenerateError, GenerationOutput};
use super::{hub_file, png_to_tensor, tensor_to_png, SLICED_ATTENTION_SIZE};

/// VAE scaling factor for the SDXL latent space.
const VAE_SCALE: f64 = 0.13025;

/// Repository carrying the first CLIP tokenizer.
const CLIP_TOKENIZER_REPO: &str = "openai/clip-vit-large-patch14";
/// Repository carrying the second (bigG) CLIP tokenizer.
const CLIP2_TOKENIZER_REPO: &str = "laion/CLIP-ViT-bigG-14-laion2B-39B-b160k";

pub struct SdxlPipeline {
    config: ModelConfig,
    device: Device,
    dtype: DType,
    sliced_attention: Option<usize>,
    tokenizer: tokenizers::Tokenizer,
    tokenizer2: tokenizers::Tokenizer,
    clip_weights: std::path::PathBuf,
    clip2_weights: std::path::PathBuf,
    unet_weights: std::path::PathBuf,
    vae_weights: std::path::PathBuf,
}

impl SdxlPipeline {
    /// Resolve every weight file for the model and keep the paths; the
    /// heavy components are rebuilt per request at the requested
    /// resolution, which is how the reference flow sizes its attention
    /// buffers.
    pub fn load(
        config: ModelConfig,
        device: &Device,
        dtype: DType,
        attention_slicing: bool,
    ) -> Result<Self, String> {
        let repo = config.id.clone();
        let auth = config.requires_auth;
        let suffix = if dtype == DType::F16 { ".fp16" } else { "" };

        let tokenizer_path = hub_file(CLIP_TOKENIZER_REPO, "tokenizer.json", false)?;
        let tokenizer2_path = hub_file(CLIP2_TOKENIZER_REPO, "tokenizer.json", false)?;
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| format!("failed to load tokenizer: {e}"))?;
        let tokenizer2 = tokenizers::Tokenizer::from_file(&tokenizer2_path)
            .map_err(|e| format!("failed to load tokenizer: {e}"))?;

        let clip_weights = hub_file(&repo, &format!("text_encoder/model{suffix}.safetensors"), auth)?;
        let clip2_weights =
            hub_file(&repo, &format!("text_encoder_2/model{suffix}.safetensors"), auth)?;
        let unet_weights = hub_file(
            &repo,
            &format!("unet/diffusion_pytorch_model{suffix}.safetensors"),
            auth,
        )?;
        let vae_weights = hub_file(
            &repo,
            &format!("vae/diffusion_pytorch_model{suffix}.safetensors"),
            auth,
        )?;

        tracing::info!(model = %repo, "SDXL weight files resolved");

        Ok(Self {
            config,
            device: device.clone(),
            dtype,
            sliced_attention: attention_slicing.then_some(SLICED_ATTENTION_SIZE),
            tokenizer,
            tokenizer2,
            clip_weights,
            clip2_weights,
            unet_weights,
            vae_weights,
        })
    }

    pub fn txt2img(&mut self, params: &GenerationParams) -> Result<GenerationOutput, GenerateError> {
        self.run(params, None)
    }

    pub fn img2img(
        &mut self,
        image_png: &[u8],
        params: &GenerationParams,
    ) -> Result<GenerationOutput, GenerateError> {
        self.run(params, Some(image_png))
    }

    // ---- private helpers ----

    fn run(
        &self,
        params: &GenerationParams,
        init_image: Option<&[u8]>,
    ) -> Result<GenerationOutput, GenerateError> {
        let inference = |e: candle_core::Error| GenerateError::Inference(e.to_string());

        let seed = params.seed.unwrap_or_else(rand::random::<u32>);
        self.device.set_seed(seed as u64).map_err(inference)?;

        let height = params.height as usize;
        let width = params.width as usize;
        let steps = params.steps as usize;

        let sd_config = StableDiffusionConfig::sdxl(self.sliced_attention, Some(height), Some(width));
        let scheduler = sd_config.build_scheduler(steps).map_err(inference)?;

        let text_embeddings = self.text_embeddings(&sd_config, params).map_err(GenerateError::Inference)?;

        let vae = sd_config
            .build_vae(&self.vae_weights, &self.device, self.dtype)
            .map_err(inference)?;
        let unet = sd_config
            .build_unet(&self.unet_weights, &self.device, 4, false, self.dtype)
            .map_err(inference)?;

        let timesteps = scheduler.timesteps().to_vec();

        // Image-to-image starts the loop from a later timestep scaled by
        // the denoise strength.
        let t_start = match init_image {
            Some(_) => steps - (steps as f64 * params.denoise.clamp(0.0, 1.0)) as usize,
            None => 0,
        };

        let mut latents = match init_image {
            Some(bytes) => {
                let image = png_to_tensor(bytes, params.width, params.height, &self.device)?
                    .unsqueeze(0)
                    .and_then(|t| t.to_dtype(self.dtype))
                    .map_err(inference)?;
                let dist = vae.encode(&image).map_err(inference)?;
                let init = (dist.sample().map_err(inference)? * VAE_SCALE).map_err(inference)?;
                let noise = init.randn_like(0f64, 1f64).map_err(inference)?;
                scheduler
                    .add_noise(&init, noise, timesteps[t_start])
                    .map_err(inference)?
            }
            None => {
                let latents = Tensor::randn(
                    0f32,
                    1f32,
                    (1, 4, height / 8, width / 8),
                    &self.device,
                )
                .and_then(|t| t.to_dtype(self.dtype))
                .map_err(inference)?;
                (latents * scheduler.init_noise_sigma()).map_err(inference)?
            }
        };

        for (index, &timestep) in timesteps.iter().enumerate() {
            if index < t_start {
                continue;
            }
            let input = Tensor::cat(&[&latents, &latents], 0).map_err(inference)?;
            let input = scheduler
                .scale_model_input(input, timestep)
                .map_err(inference)?;
            let noise_pred = unet
                .forward(&input, timestep as f64, &text_embeddings)
                .map_err(inference)?;

            let chunks = noise_pred.chunk(2, 0).map_err(inference)?;
            let (uncond, cond) = (&chunks[0], &chunks[1]);
            let noise_pred = (cond - uncond)
                .and_then(|diff| diff * params.guidance)
                .and_then(|scaled| uncond + scaled)
                .map_err(inference)?;

            latents = scheduler
                .step(&noise_pred, timestep, &latents)
                .map_err(inference)?;
        }

        let image = vae
            .decode(&(&latents / VAE_SCALE).map_err(inference)?)
            .map_err(inference)?;
        let image = ((image / 2.0).and_then(|t| t + 0.5)).map_err(inference)?;
        let png = tensor_to_png(&image)?;

        tracing::info!(model = %self.config.id, seed, steps, "SDXL generation complete");
        Ok(GenerationOutput {
            images: vec![png],
            seed,
        })
    }

    /// Classifier-free-guidance embeddings: both encoders, conditional
    /// and unconditional branches concatenated on the batch axis.
    fn text_embeddings(
        &self,
        sd_config: &StableDiffusionConfig,
        params: &GenerationParams,
    ) -> Result<Tensor, String> {
        let negative = params.negative_prompt.clone().unwrap_or_default();

        let first = self.encode_prompt(
            &self.tokenizer,
            &sd_config.clip,
            &self.clip_weights,
            &params.prompt,
            &negative,
        )?;
        let second = match (&sd_config.clip2, &self.clip2_weights) {
            (Some(clip2), weights) => Some(self.encode_prompt(
                &self.tokenizer2,
                clip2,
                weights,
                &params.prompt,
                &negative,
            )?),
            _ => None,
        };

        let embeddings = match second {
            Some(second) => Tensor::cat(&[&first, &second], D::Minus1).map_err(|e| e.to_string())?,
            None => first,
        };
        embeddings.to_dtype(self.dtype).map_err(|e| e.to_string())
    }

    fn encode_prompt(
        &self,
        tokenizer: &tokenizers::Tokenizer,
        clip_config: &stable_diffusion::clip::Config,
        weights: &std::path::Path,
        prompt: &str,
        negative: &str,
    ) -> Result<Tensor, String> {
        let model = stable_diffusion::build_clip_transformer(
            clip_config,
            weights,
            &self.device,
            DType::F32,
        )
        .map_err(|e| e.to_string())?;

        let mut encode = |text: &str| -> Result<Tensor, String> {
            let mut tokens = tokenizer
                .encode(text, true)
                .map_err(|e| e.to_string())?
                .get_ids()
                .to_vec();
            let pad_id = clip_config.pad_with.as_deref().and_then(|pad| {
                tokenizer.get_vocab(true).get(pad).copied()
            });
            let pad_id = pad_id.unwrap_or(0);
            while tokens.len() < clip_config.max_position_embeddings {
                tokens.push(pad_id);
            }
            tokens.truncate(clip_config.max_position_embeddings);
            let tokens = Tensor::new(tokens.as_slice(), &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(|e| e.to_string())?;
            model.forward(&tokens).map_err(|e| e.to_string())
        };

        let cond = encode(prompt)?;
        let uncond = encode(negative)?;
        Tensor::cat(&[&uncond, &cond], 0).map_err(|e| e.to_string())
    }
}
