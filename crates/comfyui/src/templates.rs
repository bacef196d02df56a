//! Workflow template store.
//!
//! Each template is a canonical node-graph skeleton for one generation
//! strategy, bundled with the declarative patch schema that tells the
//! patcher which node/field each runtime parameter lands on. Canonical
//! graphs are process-wide immutable; [`Template::build`] hands out a
//! fresh deep copy per call so concurrent requests never share a graph.
//!
//! Refinement variants are derived from a base template by deleting its
//! terminal save node and splicing a detector→refiner→save chain onto the
//! upstream decode node.

use std::collections::HashMap;

use serde_json::json;

use crate::graph::WorkflowGraph;

/// Enumerated generation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    TextToImage,
    ImageToImage,
    BackgroundFill,
    InstructionEdit,
    TextToImageFaceRefine,
    TextToImageHandRefine,
}

impl TemplateId {
    pub const ALL: &'static [TemplateId] = &[
        TemplateId::TextToImage,
        TemplateId::ImageToImage,
        TemplateId::BackgroundFill,
        TemplateId::InstructionEdit,
        TemplateId::TextToImageFaceRefine,
        TemplateId::TextToImageHandRefine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::TextToImage => "text-to-image",
            TemplateId::ImageToImage => "image-to-image",
            TemplateId::BackgroundFill => "background-removal-plus-fill",
            TemplateId::InstructionEdit => "instruction-edit",
            TemplateId::TextToImageFaceRefine => "text-to-image-face-refine",
            TemplateId::TextToImageHandRefine => "text-to-image-hand-refine",
        }
    }

    pub fn parse(name: &str) -> Result<Self, TemplateError> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == name)
            .ok_or_else(|| TemplateError::Unknown(name.to_string()))
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the template store.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Unknown template: {0}")]
    Unknown(String),
}

// ---------------------------------------------------------------------------
// Patch schema
// ---------------------------------------------------------------------------

/// Runtime parameters a template can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Prompt,
    NegativePrompt,
    Width,
    Height,
    Steps,
    Denoise,
    Seed,
}

impl Param {
    pub fn name(&self) -> &'static str {
        match self {
            Param::Prompt => "prompt",
            Param::NegativePrompt => "negative_prompt",
            Param::Width => "width",
            Param::Height => "height",
            Param::Steps => "steps",
            Param::Denoise => "denoise",
            Param::Seed => "seed",
        }
    }
}

/// One `{parameter -> (node-id, field)}` binding. A parameter may carry
/// several bindings (refinement variants bind the seed twice, once for
/// the base sampler and once for the refiner).
#[derive(Debug, Clone, Copy)]
pub struct ParamBinding {
    pub param: Param,
    pub node: &'static str,
    pub field: &'static str,
}

const fn bind(param: Param, node: &'static str, field: &'static str) -> ParamBinding {
    ParamBinding { param, node, field }
}

/// Where the guidance/CFG value is routed for this template family.
///
/// Templates with a dedicated guidance conditioning node must never also
/// receive guidance through the sampler's own CFG field; the patcher pins
/// that field to a constant instead.
#[derive(Debug, Clone, Copy)]
pub enum GuidanceRouting {
    /// Classic family: guidance is the sampler's CFG field.
    SamplerCfg { sampler: &'static str },
    /// Guidance-node family: guidance goes to a dedicated node and the
    /// sampler CFG is pinned.
    DedicatedNode {
        node: &'static str,
        field: &'static str,
        sampler: &'static str,
    },
}

/// A named template: canonical graph plus its patch schema.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: TemplateId,
    graph: WorkflowGraph,
    pub bindings: Vec<ParamBinding>,
    pub guidance: GuidanceRouting,
    /// Node/field that names the model weights, patched from the model
    /// registry entry's `id` at request time.
    pub checkpoint: Option<(&'static str, &'static str)>,
    /// LoadImage-equivalent node/field patched with the uploaded input
    /// artifact name, for modes that consume an external image.
    pub input_image: Option<(&'static str, &'static str)>,
}

impl Template {
    /// Return a fresh deep copy of the canonical graph.
    pub fn build(&self) -> WorkflowGraph {
        self.graph.clone()
    }

    /// Whether this mode consumes an external input image.
    pub fn requires_input_image(&self) -> bool {
        self.input_image.is_some()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Process-wide set of canonical templates.
#[derive(Debug)]
pub struct TemplateStore {
    templates: HashMap<TemplateId, Template>,
}

impl TemplateStore {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        for template in [
            text_to_image(),
            image_to_image(),
            background_fill(),
            instruction_edit(),
            refine_variant(
                TemplateId::TextToImageFaceRefine,
                "bbox/face_yolov8m.pt",
            ),
            refine_variant(
                TemplateId::TextToImageHandRefine,
                "bbox/hand_yolov8s.pt",
            ),
        ] {
            templates.insert(template.id, template);
        }
        Self { templates }
    }

    /// Look up a template by its mode id.
    pub fn get(&self, id: TemplateId) -> &Template {
        // Every variant is inserted in `new`; the indexing cannot fail.
        &self.templates[&id]
    }

    /// Look up a template by the external mode string.
    pub fn get_by_name(&self, name: &str) -> Result<&Template, TemplateError> {
        Ok(self.get(TemplateId::parse(name)?))
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Template construction
// ---------------------------------------------------------------------------

/// Text-to-image: checkpoint -> conditioning pair -> empty latent ->
/// sampler -> decode -> save.
fn text_to_image() -> Template {
    let mut graph = WorkflowGraph::new();
    graph.add_node("1", "CheckpointLoaderSimple", json!({
        "ckpt_name": "sd_xl_base_1.0.safetensors",
    }));
    graph.add_node("2", "CLIPTextEncode", json!({
        "text": "",
        "clip": ["1", 1],
    }));
    graph.add_node("3", "CLIPTextEncode", json!({
        "text": "",
        "clip": ["1", 1],
    }));
    graph.add_node("4", "EmptyLatentImage", json!({
        "width": 1024,
        "height": 1024,
        "batch_size": 1,
    }));
    graph.add_node("5", "KSampler", json!({
        "model": ["1", 0],
        "positive": ["2", 0],
        "negative": ["3", 0],
        "latent_image": ["4", 0],
        "seed": 0,
        "steps": 20,
        "cfg": 7.0,
        "sampler_name": "dpmpp_2m",
        "scheduler": "karras",
        "denoise": 1.0,
    }));
    graph.add_node("6", "VAEDecode", json!({
        "samples": ["5", 0],
        "vae": ["1", 2],
    }));
    graph.add_node("7", "SaveImage", json!({
        "images": ["6", 0],
        "filename_prefix": "promokit",
    }));

    Template {
        id: TemplateId::TextToImage,
        graph,
        bindings: vec![
            bind(Param::Prompt, "2", "text"),
            bind(Param::NegativePrompt, "3", "text"),
            bind(Param::Width, "4", "width"),
            bind(Param::Height, "4", "height"),
            bind(Param::Steps, "5", "steps"),
            bind(Param::Denoise, "5", "denoise"),
            bind(Param::Seed, "5", "seed"),
        ],
        guidance: GuidanceRouting::SamplerCfg { sampler: "5" },
        checkpoint: Some(("1", "ckpt_name")),
        input_image: None,
    }
}

/// Image-to-image: the latent comes from an encoded input image; output
/// size follows the input, so width/height have no patch target.
fn image_to_image() -> Template {
    let mut graph = WorkflowGraph::new();
    graph.add_node("1", "CheckpointLoaderSimple", json!({
        "ckpt_name": "sd_xl_base_1.0.safetensors",
    }));
    graph.add_node("2", "CLIPTextEncode", json!({
        "text": "",
        "clip": ["1", 1],
    }));
    graph.add_node("3", "CLIPTextEncode", json!({
        "text": "",
        "clip": ["1", 1],
    }));
    graph.add_node("4", "LoadImage", json!({
        "image": "input.png",
    }));
    graph.add_node("5", "VAEEncode", json!({
        "pixels": ["4", 0],
        "vae": ["1", 2],
    }));
    graph.add_node("6", "KSampler", json!({
        "model": ["1", 0],
        "positive": ["2", 0],
        "negative": ["3", 0],
        "latent_image": ["5", 0],
        "seed": 0,
        "steps": 20,
        "cfg": 7.0,
        "sampler_name": "dpmpp_2m",
        "scheduler": "karras",
        "denoise": 0.7,
    }));
    graph.add_node("7", "VAEDecode", json!({
        "samples": ["6", 0],
        "vae": ["1", 2],
    }));
    graph.add_node("8", "SaveImage", json!({
        "images": ["7", 0],
        "filename_prefix": "promokit",
    }));

    Template {
        id: TemplateId::ImageToImage,
        graph,
        bindings: vec![
            bind(Param::Prompt, "2", "text"),
            bind(Param::NegativePrompt, "3", "text"),
            bind(Param::Steps, "6", "steps"),
            bind(Param::Denoise, "6", "denoise"),
            bind(Param::Seed, "6", "seed"),
        ],
        guidance: GuidanceRouting::SamplerCfg { sampler: "6" },
        checkpoint: Some(("1", "ckpt_name")),
        input_image: Some(("4", "image")),
    }
}

/// Background removal plus fill: a segmentation mask over the subject is
/// grown and fed to inpaint conditioning, so the sampler repaints only
/// the background.
fn background_fill() -> Template {
    let mut graph = WorkflowGraph::new();
    graph.add_node("1", "CheckpointLoaderSimple", json!({
        "ckpt_name": "sd_xl_base_1.0.safetensors",
    }));
    graph.add_node("2", "CLIPTextEncode", json!({
        "text": "",
        "clip": ["1", 1],
    }));
    graph.add_node("3", "CLIPTextEncode", json!({
        "text": "",
        "clip": ["1", 1],
    }));
    graph.add_node("4", "LoadImage", json!({
        "image": "input.png",
    }));
    graph.add_node("5", "InspyrenetRembg", json!({
        "image": ["4", 0],
        "torchscript_jit": "default",
    }));
    graph.add_node("6", "GrowMask", json!({
        "mask": ["5", 1],
        "expand": 6,
        "tapered_corners": true,
    }));
    graph.add_node("7", "InpaintModelConditioning", json!({
        "positive": ["2", 0],
        "negative": ["3", 0],
        "vae": ["1", 2],
        "pixels": ["4", 0],
        "mask": ["6", 0],
        "noise_mask": true,
    }));
    graph.add_node("8", "KSampler", json!({
        "model": ["1", 0],
        "positive": ["7", 0],
        "negative": ["7", 1],
        "latent_image": ["7", 2],
        "seed": 0,
        "steps": 20,
        "cfg": 7.0,
        "sampler_name": "dpmpp_2m",
        "scheduler": "karras",
        "denoise": 1.0,
    }));
    graph.add_node("9", "VAEDecode", json!({
        "samples": ["8", 0],
        "vae": ["1", 2],
    }));
    graph.add_node("10", "SaveImage", json!({
        "images": ["9", 0],
        "filename_prefix": "promokit",
    }));

    Template {
        id: TemplateId::BackgroundFill,
        graph,
        bindings: vec![
            bind(Param::Prompt, "2", "text"),
            bind(Param::NegativePrompt, "3", "text"),
            bind(Param::Steps, "8", "steps"),
            bind(Param::Denoise, "8", "denoise"),
            bind(Param::Seed, "8", "seed"),
        ],
        guidance: GuidanceRouting::SamplerCfg { sampler: "8" },
        checkpoint: Some(("1", "ckpt_name")),
        input_image: Some(("4", "image")),
    }
}

/// Instruction edit: a guidance-node family. Conditioning references the
/// encoded input image; the negative branch is a zeroed conditioning and
/// the sampler CFG stays pinned.
fn instruction_edit() -> Template {
    let mut graph = WorkflowGraph::new();
    graph.add_node("1", "UNETLoader", json!({
        "unet_name": "flux1-dev-kontext.safetensors",
        "weight_dtype": "default",
    }));
    graph.add_node("2", "DualCLIPLoader", json!({
        "clip_name1": "clip_l.safetensors",
        "clip_name2": "t5xxl_fp16.safetensors",
        "type": "flux",
    }));
    graph.add_node("3", "VAELoader", json!({
        "vae_name": "ae.safetensors",
    }));
    graph.add_node("4", "CLIPTextEncode", json!({
        "text": "",
        "clip": ["2", 0],
    }));
    graph.add_node("5", "FluxGuidance", json!({
        "conditioning": ["4", 0],
        "guidance": 2.5,
    }));
    graph.add_node("6", "LoadImage", json!({
        "image": "input.png",
    }));
    graph.add_node("7", "VAEEncode", json!({
        "pixels": ["6", 0],
        "vae": ["3", 0],
    }));
    graph.add_node("8", "ReferenceLatent", json!({
        "conditioning": ["5", 0],
        "latent": ["7", 0],
    }));
    graph.add_node("9", "ConditioningZeroOut", json!({
        "conditioning": ["4", 0],
    }));
    graph.add_node("10", "KSampler", json!({
        "model": ["1", 0],
        "positive": ["8", 0],
        "negative": ["9", 0],
        "latent_image": ["7", 0],
        "seed": 0,
        "steps": 20,
        "cfg": 1.0,
        "sampler_name": "euler",
        "scheduler": "simple",
        "denoise": 1.0,
    }));
    graph.add_node("11", "VAEDecode", json!({
        "samples": ["10", 0],
        "vae": ["3", 0],
    }));
    graph.add_node("12", "SaveImage", json!({
        "images": ["11", 0],
        "filename_prefix": "promokit",
    }));

    Template {
        id: TemplateId::InstructionEdit,
        graph,
        bindings: vec![
            bind(Param::Prompt, "4", "text"),
            bind(Param::Steps, "10", "steps"),
            bind(Param::Denoise, "10", "denoise"),
            bind(Param::Seed, "10", "seed"),
        ],
        guidance: GuidanceRouting::DedicatedNode {
            node: "5",
            field: "guidance",
            sampler: "10",
        },
        checkpoint: Some(("1", "unet_name")),
        input_image: Some(("6", "image")),
    }
}

/// Derive a quality-refinement variant from the text-to-image base:
/// delete the terminal save node, splice detector -> detailer -> save
/// onto the decode node, and bind the seed into the detailer as well.
fn refine_variant(id: TemplateId, detector_model: &str) -> Template {
    let base = text_to_image();
    let mut graph = base.graph;

    graph.remove_node("7");
    graph.add_node("8", "UltralyticsDetectorProvider", json!({
        "model_name": detector_model,
    }));
    graph.add_node("9", "FaceDetailer", json!({
        "image": ["6", 0],
        "model": ["1", 0],
        "clip": ["1", 1],
        "vae": ["1", 2],
        "positive": ["2", 0],
        "negative": ["3", 0],
        "bbox_detector": ["8", 0],
        "guide_size": 512,
        "guide_size_for": true,
        "max_size": 1024,
        "seed": 0,
        "steps": 20,
        "cfg": 7.0,
        "sampler_name": "dpmpp_2m",
        "scheduler": "karras",
        "denoise": 0.4,
        "feather": 5,
        "noise_mask": true,
        "force_inpaint": true,
        "bbox_threshold": 0.5,
        "bbox_dilation": 10,
        "bbox_crop_factor": 3.0,
    }));
    graph.add_node("10", "SaveImage", json!({
        "images": ["9", 0],
        "filename_prefix": "promokit",
    }));

    let mut bindings = base.bindings;
    bindings.push(bind(Param::Seed, "9", "seed"));

    Template {
        id,
        graph,
        bindings,
        guidance: base.guidance,
        checkpoint: base.checkpoint,
        input_image: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
