//! Resident-backend manager.
//!
//! [`BackendManager`] owns the single resident backend pair behind a
//! [`tokio::sync::Mutex`], so concurrent load/unload/generate calls
//! serialize deterministically instead of interleaving teardown and
//! construction. At most one backend is resident at a time; loading a
//! different one tears down the old one first to bound memory usage.
//!
//! State machine: `Unloaded -> Loading -> Loaded -> Unloaded`. Loading is
//! transient inside the locked section; a failed load always lands back
//! in `Unloaded` and never leaves a half-initialized backend resident.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use promokit_core::params::GenerationParams;
use promokit_core::registry::{BackendKind, ModelConfig, ModelRegistry, RegistrySettings};

use crate::backend::{DiffusionBackend, GenerateError, GenerationOutput};
use crate::loader::{ModelLoadError, PipelineFactory};

/// Errors surfaced by manager operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] ModelLoadError),

    #[error(transparent)]
    Generate(#[from] GenerateError),
}

/// Snapshot of the resident backend for status endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResidentInfo {
    pub name: String,
    pub backend_type: BackendKind,
    pub description: String,
    pub loaded_at: DateTime<Utc>,
}

/// The resident backend pair plus its registry entry.
struct Resident {
    name: String,
    config: ModelConfig,
    backend: Arc<dyn DiffusionBackend>,
    loaded_at: DateTime<Utc>,
}

/// Process-wide owner of the single resident backend.
pub struct BackendManager {
    registry: Arc<ModelRegistry>,
    settings: RegistrySettings,
    factory: Arc<dyn PipelineFactory>,
    resident: Mutex<Option<Resident>>,
}

impl BackendManager {
    pub fn new(
        registry: Arc<ModelRegistry>,
        settings: RegistrySettings,
        factory: Arc<dyn PipelineFactory>,
    ) -> Self {
        Self {
            registry,
            settings,
            factory,
            resident: Mutex::new(None),
        }
    }

    /// The resolved backend-selection settings.
    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Load a backend by short name.
    ///
    /// No-op success when the name is already resident. Otherwise the
    /// current backend is torn down first; on failure the manager is left
    /// unloaded and the categorized error is returned.
    pub async fn load(&self, name: &str) -> Result<(), ModelLoadError> {
        let mut slot = self.resident.lock().await;
        self.load_locked(&mut slot, name).await
    }

    /// Load the primary backend, falling back through the configured
    /// chain when enabled.
    ///
    /// Returns the short name that ended up resident. Fallback names
    /// equal to the primary are skipped (the list is not de-duplicated by
    /// the registry). Fails only when every candidate fails.
    pub async fn load_with_fallback(&self) -> Result<String, ModelLoadError> {
        let mut slot = self.resident.lock().await;
        self.load_with_fallback_locked(&mut slot).await
    }

    /// Tear down the resident backend. Idempotent.
    pub async fn unload(&self) {
        let mut slot = self.resident.lock().await;
        match slot.take() {
            Some(resident) => {
                tracing::info!(model = %resident.name, "Unloading resident backend");
                // Dropping the pipeline references releases device memory.
                drop(resident);
            }
            None => {
                tracing::debug!("Unload requested but nothing is resident");
            }
        }
    }

    /// Snapshot of the resident backend, if any.
    pub async fn current(&self) -> Option<ResidentInfo> {
        let slot = self.resident.lock().await;
        slot.as_ref().map(|resident| ResidentInfo {
            name: resident.name.clone(),
            backend_type: resident.config.backend_type,
            description: resident.config.description.clone(),
            loaded_at: resident.loaded_at,
        })
    }

    /// Text-to-image against the resident backend.
    ///
    /// Loads the primary chain lazily when nothing is resident. The lock
    /// is held for the duration of inference: the resident pipeline is
    /// not safe for concurrent calls, so requests serialize here.
    pub async fn generate(
        &self,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, EngineError> {
        let mut slot = self.resident.lock().await;
        let resident = self.resident_or_load(&mut slot).await?;
        let params = params.clone().clamped_to(&resident.config);
        let output = resident.backend.generate(&params).await?;
        Ok(output)
    }

    /// Image-to-image against the resident backend.
    pub async fn edit(
        &self,
        image_png: &[u8],
        params: &GenerationParams,
    ) -> Result<GenerationOutput, EngineError> {
        let mut slot = self.resident.lock().await;
        let resident = self.resident_or_load(&mut slot).await?;
        if !resident.config.params.supports_i2i || !resident.backend.supports_edit() {
            return Err(EngineError::Generate(GenerateError::EditUnsupported));
        }
        let params = params.clone().clamped_to(&resident.config);
        let output = resident.backend.edit(image_png, &params).await?;
        Ok(output)
    }

    // ---- private helpers ----

    async fn resident_or_load<'a>(
        &self,
        slot: &'a mut Option<Resident>,
    ) -> Result<&'a Resident, EngineError> {
        if slot.is_none() {
            tracing::info!("No backend resident, loading the primary chain");
            self.load_with_fallback_locked(slot).await?;
        }
        match slot.as_ref() {
            Some(resident) => Ok(resident),
            // load_with_fallback_locked leaves a resident on success.
            None => Err(EngineError::Load(ModelLoadError::Exhausted)),
        }
    }

    async fn load_locked(
        &self,
        slot: &mut Option<Resident>,
        name: &str,
    ) -> Result<(), ModelLoadError> {
        if slot.as_ref().is_some_and(|r| r.name == name) {
            tracing::debug!(model = name, "Already resident, nothing to do");
            return Ok(());
        }

        if let Some(old) = slot.take() {
            tracing::info!(old = %old.name, new = name, "Unloading resident backend before switch");
            drop(old);
        }

        let config = self
            .registry
            .get(name)
            .ok_or_else(|| ModelLoadError::UnknownModel(name.to_string()))?
            .clone();

        tracing::info!(
            model = name,
            family = config.backend_type.as_str(),
            id = %config.id,
            "Loading backend",
        );

        let memory = &self.registry.runtime().memory;
        match self.factory.build(name, &config, memory).await {
            Ok(built) => {
                for outcome in &built.hints {
                    if outcome.applied {
                        tracing::debug!(model = name, hint = outcome.hint.name(), "Optimization applied");
                    } else {
                        tracing::warn!(
                            model = name,
                            hint = outcome.hint.name(),
                            detail = outcome.detail.as_deref().unwrap_or("unknown"),
                            "Optimization not applied, continuing without it",
                        );
                    }
                }

                *slot = Some(Resident {
                    name: name.to_string(),
                    config,
                    backend: built.backend,
                    loaded_at: Utc::now(),
                });
                tracing::info!(model = name, "Backend loaded");
                Ok(())
            }
            Err(e) => {
                // The slot was already cleared above; the manager is back
                // in Unloaded with nothing half-initialized.
                match &e {
                    ModelLoadError::Auth(msg) => {
                        tracing::error!(model = name, error = %msg, "Load failed: authentication required")
                    }
                    ModelLoadError::OutOfMemory(msg) => {
                        tracing::error!(model = name, error = %msg, "Load failed: insufficient GPU memory")
                    }
                    other => tracing::error!(model = name, error = %other, "Load failed"),
                }
                Err(e)
            }
        }
    }

    async fn load_with_fallback_locked(
        &self,
        slot: &mut Option<Resident>,
    ) -> Result<String, ModelLoadError> {
        let primary = self.settings.primary_model().to_string();

        let primary_err = match self.load_locked(slot, &primary).await {
            Ok(()) => return Ok(primary),
            Err(e) => e,
        };

        if !self.settings.fallback_enabled() {
            tracing::warn!(
                primary = %primary,
                "Primary backend failed and fallback is disabled",
            );
            return Err(primary_err);
        }

        for name in self.settings.fallback_models() {
            if name == &primary {
                tracing::debug!(model = %name, "Skipping fallback entry equal to the primary");
                continue;
            }
            tracing::info!(model = %name, "Trying fallback backend");
            match self.load_locked(slot, name).await {
                Ok(()) => return Ok(name.clone()),
                Err(e) => {
                    tracing::warn!(model = %name, error = %e, "Fallback backend failed");
                }
            }
        }

        tracing::error!("Every candidate backend failed to load");
        Err(ModelLoadError::Exhausted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
