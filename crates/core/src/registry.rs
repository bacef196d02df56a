//! Model registry: the declarative backend-list file and its runtime block.
//!
//! The file is YAML with two top-level sections:
//!
//! ```yaml
//! models:
//!   <short-name>:
//!     id: <backend repository identifier>
//!     type: flux | sdxl | remote-graph
//!     requires_auth: false
//!     params: { ... }
//!     description: ...
//! runtime:
//!   primary_model: <short-name>
//!   fallback_models: [<short-name>, ...]
//!   enable_fallback: true
//!   memory: { ... }
//!   prompt_optimization: { ... }
//! ```
//!
//! The registry is parsed once at startup and treated as immutable for the
//! process lifetime. Environment overrides for the runtime block are
//! resolved once, into [`RegistrySettings`], rather than re-read on every
//! lookup, so two lookups in the same process always agree.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Environment variable overriding `runtime.primary_model`.
pub const ENV_PRIMARY_MODEL: &str = "PROMOKIT_PRIMARY_MODEL";

/// Environment variable overriding `runtime.enable_fallback`.
pub const ENV_ENABLE_FALLBACK: &str = "PROMOKIT_ENABLE_FALLBACK";

// ---------------------------------------------------------------------------
// Model entries
// ---------------------------------------------------------------------------

/// Diffusion backend families the loader knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Flux-family transformer pipelines (local, bf16-first).
    Flux,
    /// SDXL-family UNet pipelines (local, f16-first).
    Sdxl,
    /// The remote node-graph image server; weightless on our side.
    RemoteGraph,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Flux => "flux",
            BackendKind::Sdxl => "sdxl",
            BackendKind::RemoteGraph => "remote-graph",
        }
    }
}

/// Numeric limits and capability flags for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    pub default_steps: u32,
    pub max_steps: u32,
    /// Default guidance/CFG value; `None` for guidance-free backends.
    #[serde(default)]
    pub guidance_scale: Option<f64>,
    /// Whether an image-to-image pipeline can be derived from the weights.
    #[serde(default)]
    pub supports_i2i: bool,
    /// Prompt token budget of the text encoder.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Default output size as `[width, height]`.
    pub default_size: [u32; 2],
    /// Maximum output size as `[width, height]`.
    pub max_size: [u32; 2],
    /// Whether a negative prompt should be filled in when the caller
    /// supplies none.
    #[serde(default)]
    pub use_negative_prompt: bool,
    /// Default negative prompt text.
    #[serde(default)]
    pub negative_prompt: String,
}

fn default_max_tokens() -> u32 {
    77
}

/// One entry of the declarative backend list, keyed by a short name that
/// is distinct from `id` (the underlying repository identifier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend repository identifier (e.g. a hub repo or checkpoint name).
    pub id: String,
    #[serde(rename = "type")]
    pub backend_type: BackendKind,
    /// Whether downloading the weights requires an access token.
    #[serde(default)]
    pub requires_auth: bool,
    pub params: ModelParams,
    #[serde(default)]
    pub description: String,
}

// ---------------------------------------------------------------------------
// Runtime block
// ---------------------------------------------------------------------------

/// Requested weight quantization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuantizationMode {
    #[default]
    None,
    EightBit,
    FourBit,
}

/// Device placement strategy for local pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OffloadMode {
    /// Keep the whole pipeline on one device.
    #[default]
    None,
    /// GPU with CPU spillover for components that do not fit.
    Spillover,
    /// Fully sequential CPU offload; slowest, smallest footprint.
    Sequential,
}

/// Memory/speed options applied when loading a local pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryOptions {
    pub quantization: QuantizationMode,
    pub offload: OffloadMode,
    /// Best-effort hints; failures are logged and discarded.
    pub vae_tiling: bool,
    pub vae_slicing: bool,
    pub attention_slicing: bool,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            quantization: QuantizationMode::None,
            offload: OffloadMode::None,
            vae_tiling: true,
            vae_slicing: true,
            attention_slicing: false,
        }
    }
}

/// LLM-based prompt rewriting applied before diffusion dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOptimization {
    pub enabled: bool,
    /// Chat model used for the rewrite.
    pub model: String,
    pub max_tokens: u32,
}

impl Default for PromptOptimization {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 256,
        }
    }
}

/// The `runtime` block of the declarative file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub primary_model: String,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default)]
    pub enable_fallback: bool,
    #[serde(default)]
    pub memory: MemoryOptions,
    #[serde(default)]
    pub prompt_optimization: PromptOptimization,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// On-disk shape of the declarative file.
#[derive(Debug, Deserialize)]
struct ModelListFile {
    models: BTreeMap<String, ModelConfig>,
    runtime: RuntimeConfig,
}

/// Parsed, immutable view of the declarative backend list.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelConfig>,
    runtime: RuntimeConfig,
}

impl ModelRegistry {
    /// Short name of the hard-coded entry used when the file cannot be read.
    pub const BUILTIN_MODEL_NAME: &'static str = "remote-default";

    /// Parse a registry from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        let file: ModelListFile = serde_yaml::from_str(yaml)
            .map_err(|e| CoreError::Configuration(format!("Invalid model list: {e}")))?;
        Ok(Self {
            models: file.models,
            runtime: file.runtime,
        })
    }

    /// Load the registry from a file, failing hard on an unreadable or
    /// unparsable file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!(
                "Cannot read model list at {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&text)
    }

    /// Load the registry, or boot degraded on a single hard-coded entry.
    ///
    /// The configuration error is logged, not swallowed silently; the
    /// degraded registry lets the process start so the operator can see
    /// what went wrong through the API instead of a crash loop.
    pub fn load_or_fallback(path: &Path) -> Self {
        match Self::load(path) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load model list, booting with the built-in minimal registry",
                );
                Self::builtin_minimal()
            }
        }
    }

    /// The hard-coded minimal registry: a single remote-graph backend.
    pub fn builtin_minimal() -> Self {
        let config = ModelConfig {
            id: "sd_xl_base_1.0.safetensors".to_string(),
            backend_type: BackendKind::RemoteGraph,
            requires_auth: false,
            params: ModelParams {
                default_steps: 20,
                max_steps: 50,
                guidance_scale: Some(7.0),
                supports_i2i: true,
                max_tokens: 77,
                default_size: [1024, 1024],
                max_size: [1536, 1536],
                use_negative_prompt: true,
                negative_prompt: "low quality, blurry, watermark".to_string(),
            },
            description: "Built-in fallback entry for degraded boots".to_string(),
        };
        let mut models = BTreeMap::new();
        models.insert(Self::BUILTIN_MODEL_NAME.to_string(), config);
        Self {
            models,
            runtime: RuntimeConfig {
                primary_model: Self::BUILTIN_MODEL_NAME.to_string(),
                fallback_models: Vec::new(),
                enable_fallback: false,
                memory: MemoryOptions::default(),
                prompt_optimization: PromptOptimization::default(),
            },
        }
    }

    /// Look up a model by short name.
    pub fn get(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }

    /// All short names, in stable (sorted) order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// All entries, in stable (sorted) order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ModelConfig)> {
        self.models.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    /// Enumerate every problem with the registry rather than failing on
    /// the first. An empty report means the registry is clean.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for (name, config) in &self.models {
            let mut issue = |message: String| {
                issues.push(ValidationIssue {
                    model: Some(name.clone()),
                    message,
                });
            };

            if config.id.trim().is_empty() {
                issue("id must not be empty".to_string());
            }
            let p = &config.params;
            if p.max_steps == 0 {
                issue("max_steps must be positive".to_string());
            } else if p.default_steps > p.max_steps {
                issue(format!(
                    "default_steps ({}) exceeds max_steps ({})",
                    p.default_steps, p.max_steps
                ));
            }
            for (axis, default, max) in [
                ("width", p.default_size[0], p.max_size[0]),
                ("height", p.default_size[1], p.max_size[1]),
            ] {
                if max == 0 {
                    issue(format!("max {axis} must be positive"));
                } else if default > max {
                    issue(format!("default {axis} ({default}) exceeds max ({max})"));
                }
            }
            if let Some(g) = p.guidance_scale {
                if g < 0.0 {
                    issue(format!("guidance_scale ({g}) must not be negative"));
                }
            }
            if p.use_negative_prompt && p.negative_prompt.trim().is_empty() {
                issue("use_negative_prompt is set but negative_prompt is empty".to_string());
            }
        }

        if !self.models.contains_key(&self.runtime.primary_model) {
            issues.push(ValidationIssue {
                model: None,
                message: format!(
                    "runtime.primary_model '{}' is not a declared model",
                    self.runtime.primary_model
                ),
            });
        }
        for name in &self.runtime.fallback_models {
            if !self.models.contains_key(name) {
                issues.push(ValidationIssue {
                    model: None,
                    message: format!("runtime.fallback_models entry '{name}' is not a declared model"),
                });
            }
        }

        issues
    }
}

/// One problem found by [`ModelRegistry::validate`].
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    /// Offending model short name; `None` for runtime-block issues.
    pub model: Option<String>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Layered settings resolver
// ---------------------------------------------------------------------------

/// Backend-selection settings resolved once at startup.
///
/// File values are the defaults; environment variables override them at
/// resolve time. The snapshot is immutable afterwards, so a mid-process
/// environment change cannot make two lookups disagree.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    primary_model: String,
    fallback_models: Vec<String>,
    enable_fallback: bool,
}

impl RegistrySettings {
    /// Resolve against the process environment.
    pub fn resolve(runtime: &RuntimeConfig) -> Self {
        Self::resolve_with(runtime, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup (injectable for tests).
    pub fn resolve_with(
        runtime: &RuntimeConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let primary_model = match lookup(ENV_PRIMARY_MODEL) {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => runtime.primary_model.clone(),
        };

        let enable_fallback = match parse_bool_override(lookup(ENV_ENABLE_FALLBACK).as_deref()) {
            Some(flag) => flag,
            None => runtime.enable_fallback,
        };

        Self {
            primary_model,
            fallback_models: runtime.fallback_models.clone(),
            enable_fallback,
        }
    }

    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    pub fn fallback_enabled(&self) -> bool {
        self.enable_fallback
    }

    /// The configured fallback list, verbatim. Not de-duplicated: the
    /// caller is responsible for skipping the primary if it reappears.
    pub fn fallback_models(&self) -> &[String] {
        &self.fallback_models
    }
}

/// Three-valued boolean parse: explicit true/false override, anything
/// else (including unset) falls through to the file value.
fn parse_bool_override(raw: Option<&str>) -> Option<bool> {
    let raw = raw?.trim();
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        "" => None,
        other => {
            tracing::warn!(value = other, "Unparsable boolean override, using file value");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
models:
  flux-dev:
    id: black-forest-labs/FLUX.1-dev
    type: flux
    requires_auth: true
    params:
      default_steps: 28
      max_steps: 50
      guidance_scale: 3.5
      supports_i2i: true
      max_tokens: 512
      default_size: [1024, 1024]
      max_size: [1536, 1536]
    description: Flux dev weights
  sdxl-base:
    id: stabilityai/stable-diffusion-xl-base-1.0
    type: sdxl
    params:
      default_steps: 30
      max_steps: 100
      guidance_scale: 7.0
      supports_i2i: true
      default_size: [1024, 1024]
      max_size: [2048, 2048]
      use_negative_prompt: true
      negative_prompt: "low quality"
    description: SDXL base
  studio:
    id: sd_xl_base_1.0.safetensors
    type: remote-graph
    params:
      default_steps: 20
      max_steps: 50
      guidance_scale: 7.0
      supports_i2i: true
      default_size: [1024, 1024]
      max_size: [1536, 1536]
    description: Remote graph server
runtime:
  primary_model: flux-dev
  fallback_models: [flux-dev, sdxl-base, studio]
  enable_fallback: true
  memory:
    offload: spillover
    quantization: four-bit
"#;

    // -- Parsing ------------------------------------------------------------

    #[test]
    fn parses_sample_file() {
        let registry = ModelRegistry::from_yaml(SAMPLE).unwrap();
        assert_eq!(registry.names().count(), 3);

        let flux = registry.get("flux-dev").unwrap();
        assert_eq!(flux.backend_type, BackendKind::Flux);
        assert!(flux.requires_auth);
        assert_eq!(flux.params.max_tokens, 512);

        let sdxl = registry.get("sdxl-base").unwrap();
        assert!(!sdxl.requires_auth);
        assert_eq!(sdxl.params.max_tokens, 77); // default

        let runtime = registry.runtime();
        assert_eq!(runtime.primary_model, "flux-dev");
        assert_eq!(runtime.memory.offload, OffloadMode::Spillover);
        assert_eq!(runtime.memory.quantization, QuantizationMode::FourBit);
        assert!(!runtime.prompt_optimization.enabled);
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = ModelRegistry::from_yaml("models: [not, a, map]").unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn rejects_unknown_backend_type() {
        let yaml = SAMPLE.replace("type: flux\n", "type: warp-drive\n");
        assert!(ModelRegistry::from_yaml(&yaml).is_err());
    }

    #[test]
    fn load_fails_hard_on_missing_file() {
        let err = ModelRegistry::load(Path::new("/nonexistent/models.yaml")).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn load_or_fallback_boots_degraded() {
        let registry = ModelRegistry::load_or_fallback(Path::new("/nonexistent/models.yaml"));
        assert!(registry.get(ModelRegistry::BUILTIN_MODEL_NAME).is_some());
        assert_eq!(
            registry.runtime().primary_model,
            ModelRegistry::BUILTIN_MODEL_NAME
        );
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let registry = ModelRegistry::load(file.path()).unwrap();
        assert!(registry.get("studio").is_some());
    }

    // -- Validation ---------------------------------------------------------

    #[test]
    fn clean_registry_has_no_issues() {
        let registry = ModelRegistry::from_yaml(SAMPLE).unwrap();
        assert!(registry.validate().is_empty());
    }

    #[test]
    fn validation_enumerates_every_problem() {
        let yaml = r#"
models:
  broken:
    id: ""
    type: sdxl
    params:
      default_steps: 100
      max_steps: 50
      guidance_scale: -1.0
      default_size: [4096, 1024]
      max_size: [2048, 0]
      use_negative_prompt: true
runtime:
  primary_model: missing
  fallback_models: [also-missing]
"#;
        let registry = ModelRegistry::from_yaml(yaml).unwrap();
        let issues = registry.validate();
        // empty id, steps, width over max, zero max height, negative
        // guidance, empty negative prompt, unknown primary, unknown fallback
        assert_eq!(issues.len(), 8);
        assert!(issues.iter().any(|i| i.model.is_none()));
        assert!(issues.iter().any(|i| i.model.as_deref() == Some("broken")));
    }

    // -- Settings resolver --------------------------------------------------

    fn sample_runtime() -> RuntimeConfig {
        ModelRegistry::from_yaml(SAMPLE).unwrap().runtime.clone()
    }

    #[test]
    fn settings_use_file_values_without_overrides() {
        let settings = RegistrySettings::resolve_with(&sample_runtime(), |_| None);
        assert_eq!(settings.primary_model(), "flux-dev");
        assert!(settings.fallback_enabled());
        assert_eq!(settings.fallback_models().len(), 3);
    }

    #[test]
    fn env_overrides_primary_model() {
        let settings = RegistrySettings::resolve_with(&sample_runtime(), |key| {
            (key == ENV_PRIMARY_MODEL).then(|| "sdxl-base".to_string())
        });
        assert_eq!(settings.primary_model(), "sdxl-base");
    }

    #[test]
    fn blank_primary_override_falls_through() {
        let settings = RegistrySettings::resolve_with(&sample_runtime(), |key| {
            (key == ENV_PRIMARY_MODEL).then(|| "   ".to_string())
        });
        assert_eq!(settings.primary_model(), "flux-dev");
    }

    #[test]
    fn env_overrides_fallback_flag_three_valued() {
        let runtime = sample_runtime();

        let off = RegistrySettings::resolve_with(&runtime, |key| {
            (key == ENV_ENABLE_FALLBACK).then(|| "false".to_string())
        });
        assert!(!off.fallback_enabled());

        let on = RegistrySettings::resolve_with(&runtime, |key| {
            (key == ENV_ENABLE_FALLBACK).then(|| "1".to_string())
        });
        assert!(on.fallback_enabled());

        // Garbage falls through to the file value (true in the sample).
        let garbage = RegistrySettings::resolve_with(&runtime, |key| {
            (key == ENV_ENABLE_FALLBACK).then(|| "maybe".to_string())
        });
        assert!(garbage.fallback_enabled());
    }

    #[test]
    fn fallback_list_is_returned_verbatim() {
        // The primary appears in the list; the registry must not dedupe it.
        let settings = RegistrySettings::resolve_with(&sample_runtime(), |_| None);
        assert_eq!(settings.fallback_models()[0], "flux-dev");
    }
}
