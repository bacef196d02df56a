//! Generic workflow patcher.
//!
//! One interpreter walks a template's declarative bindings and writes the
//! runtime parameters onto the designated nodes. Missing target nodes are
//! skipped with a warning rather than failing the request: templates
//! evolve independently of their callers, and a parameter a template
//! cannot place is not an error.

use serde_json::{json, Value};

use promokit_core::params::GenerationParams;

use crate::graph::WorkflowGraph;
use crate::templates::{GuidanceRouting, Param, Template};

/// CFG value pinned on the sampler of guidance-node template families.
/// Routing guidance to both the dedicated node and the sampler would
/// double-apply it.
pub const PINNED_SAMPLER_CFG: f64 = 1.0;

/// Result of one patch pass.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// The seed written into the graph. Equal to the requested seed when
    /// one was supplied, freshly drawn from `[0, 2^32 - 1]` otherwise, so
    /// the submission is reproducible from the returned graph alone.
    pub seed: u32,
    /// Parameters whose target node was absent from the graph.
    pub skipped: Vec<&'static str>,
}

/// Apply runtime parameters onto a graph according to the template's
/// patch schema.
pub fn apply_params(
    template: &Template,
    graph: &mut WorkflowGraph,
    params: &GenerationParams,
) -> PatchOutcome {
    let seed = params.seed.unwrap_or_else(rand::random::<u32>);
    let mut skipped = Vec::new();

    for binding in &template.bindings {
        let value = match binding.param {
            Param::Prompt => json!(params.prompt),
            Param::NegativePrompt => match &params.negative_prompt {
                Some(text) => json!(text),
                None => continue,
            },
            Param::Width => json!(params.width),
            Param::Height => json!(params.height),
            Param::Steps => json!(params.steps),
            Param::Denoise => json!(params.denoise),
            Param::Seed => json!(seed),
        };
        write_field(template, graph, binding.node, binding.field, value, binding.param.name(), &mut skipped);
    }

    match template.guidance {
        GuidanceRouting::SamplerCfg { sampler } => {
            write_field(template, graph, sampler, "cfg", json!(params.guidance), "guidance", &mut skipped);
        }
        GuidanceRouting::DedicatedNode { node, field, sampler } => {
            write_field(template, graph, node, field, json!(params.guidance), "guidance", &mut skipped);
            write_field(template, graph, sampler, "cfg", json!(PINNED_SAMPLER_CFG), "cfg-pin", &mut skipped);
        }
    }

    PatchOutcome { seed, skipped }
}

/// Write the model-weights identifier into the template's checkpoint node.
pub fn apply_checkpoint(template: &Template, graph: &mut WorkflowGraph, model_id: &str) {
    if let Some((node, field)) = template.checkpoint {
        if !graph.set_input(node, field, json!(model_id)) {
            tracing::warn!(
                template = %template.id,
                node,
                "Checkpoint node missing from graph, skipping patch",
            );
        }
    }
}

/// Point the template's input-image node at an uploaded artifact.
///
/// Returns `false` (with a warning) when the template has no input-image
/// node, mirroring the lenient missing-target policy.
pub fn apply_input_image(template: &Template, graph: &mut WorkflowGraph, artifact: &str) -> bool {
    let Some((node, field)) = template.input_image else {
        tracing::warn!(
            template = %template.id,
            "Template has no input-image node, skipping artifact patch",
        );
        return false;
    };
    if !graph.set_input(node, field, json!(artifact)) {
        tracing::warn!(
            template = %template.id,
            node,
            "Input-image node missing from graph, skipping artifact patch",
        );
        return false;
    }
    true
}

fn write_field(
    template: &Template,
    graph: &mut WorkflowGraph,
    node: &str,
    field: &str,
    value: Value,
    label: &'static str,
    skipped: &mut Vec<&'static str>,
) {
    if !graph.set_input(node, field, value) {
        tracing::warn!(
            template = %template.id,
            node,
            parameter = label,
            "Target node missing from graph, skipping patch",
        );
        skipped.push(label);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{TemplateId, TemplateStore};

    fn params() -> GenerationParams {
        GenerationParams {
            prompt: "a bakery storefront at golden hour".to_string(),
            negative_prompt: Some("low quality".to_string()),
            width: 832,
            height: 1216,
            steps: 24,
            guidance: 6.5,
            denoise: 0.8,
            seed: None,
        }
    }

    #[test]
    fn patch_writes_every_bound_field() {
        let store = TemplateStore::new();
        let template = store.get(TemplateId::TextToImage);
        let mut graph = template.build();

        let outcome = apply_params(template, &mut graph, &params());
        assert!(outcome.skipped.is_empty());

        assert_eq!(
            graph.input("2", "text"),
            Some(&json!("a bakery storefront at golden hour"))
        );
        assert_eq!(graph.input("3", "text"), Some(&json!("low quality")));
        assert_eq!(graph.input("4", "width"), Some(&json!(832)));
        assert_eq!(graph.input("4", "height"), Some(&json!(1216)));
        assert_eq!(graph.input("5", "steps"), Some(&json!(24)));
        assert_eq!(graph.input("5", "cfg"), Some(&json!(6.5)));
        assert_eq!(graph.input("5", "denoise"), Some(&json!(0.8)));
        assert_eq!(graph.input("5", "seed"), Some(&json!(outcome.seed)));
    }

    #[test]
    fn canonical_template_is_never_mutated() {
        let store = TemplateStore::new();
        let template = store.get(TemplateId::TextToImage);

        let mut first = template.build();
        let mut p = params();
        apply_params(template, &mut first, &p);

        let mut second = template.build();
        p.prompt = "a florist window display".to_string();
        apply_params(template, &mut second, &p);

        // A third fetch still carries the default fields.
        let third = template.build();
        assert_eq!(third.input("2", "text"), Some(&json!("")));
        assert_eq!(third.input("5", "seed"), Some(&json!(0)));
    }

    #[test]
    fn explicit_seed_is_recorded_verbatim() {
        let store = TemplateStore::new();
        let template = store.get(TemplateId::TextToImage);
        let mut graph = template.build();

        let mut p = params();
        p.seed = Some(42);
        let outcome = apply_params(template, &mut graph, &p);

        assert_eq!(outcome.seed, 42);
        assert_eq!(graph.input("5", "seed"), Some(&json!(42)));
    }

    #[test]
    fn generated_seeds_differ_between_calls() {
        let store = TemplateStore::new();
        let template = store.get(TemplateId::TextToImage);

        let a = apply_params(template, &mut template.build(), &params());
        let b = apply_params(template, &mut template.build(), &params());
        assert_ne!(a.seed, b.seed);
    }

    #[test]
    fn guidance_routes_to_dedicated_node_and_pins_sampler_cfg() {
        let store = TemplateStore::new();
        let template = store.get(TemplateId::InstructionEdit);
        let mut graph = template.build();

        apply_params(template, &mut graph, &params());

        assert_eq!(graph.input("5", "guidance"), Some(&json!(6.5)));
        assert_eq!(graph.input("10", "cfg"), Some(&json!(PINNED_SAMPLER_CFG)));
    }

    #[test]
    fn absent_negative_prompt_leaves_the_default() {
        let store = TemplateStore::new();
        let template = store.get(TemplateId::TextToImage);
        let mut graph = template.build();

        let mut p = params();
        p.negative_prompt = None;
        let outcome = apply_params(template, &mut graph, &p);

        assert!(outcome.skipped.is_empty());
        assert_eq!(graph.input("3", "text"), Some(&json!("")));
    }

    #[test]
    fn missing_target_node_is_skipped_with_outcome() {
        let store = TemplateStore::new();
        let template = store.get(TemplateId::TextToImage);
        let mut graph = template.build();
        graph.remove_node("4");

        let outcome = apply_params(template, &mut graph, &params());
        assert!(outcome.skipped.contains(&"width"));
        assert!(outcome.skipped.contains(&"height"));
    }

    #[test]
    fn checkpoint_patch_targets_the_loader_node() {
        let store = TemplateStore::new();
        let template = store.get(TemplateId::TextToImage);
        let mut graph = template.build();

        apply_checkpoint(template, &mut graph, "juggernaut_xl_v9.safetensors");
        assert_eq!(
            graph.input("1", "ckpt_name"),
            Some(&json!("juggernaut_xl_v9.safetensors"))
        );
    }

    #[test]
    fn input_image_patch_requires_an_image_mode() {
        let store = TemplateStore::new();

        let i2i = store.get(TemplateId::ImageToImage);
        let mut graph = i2i.build();
        assert!(apply_input_image(i2i, &mut graph, "upload_001.png"));
        assert_eq!(graph.input("4", "image"), Some(&json!("upload_001.png")));

        let t2i = store.get(TemplateId::TextToImage);
        let mut graph = t2i.build();
        assert!(!apply_input_image(t2i, &mut graph, "upload_001.png"));
    }
}
