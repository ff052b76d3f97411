//! UI-facing facade over command building, path resolution, supervision and cancellation.

use crate::cancel::{CancelOutcome, CancellationController};
use crate::command::{CommandBuilder, TrainingCommand};
use crate::config::TrainingConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{JobId, JobSnapshot, JobStatus};
use crate::preset::{VramPreset, VramPresetCatalog};
use crate::registry::{JobEvents, JobRegistry};
use crate::resolver::{ConfigResolver, GpuReport, GpuStatus, InstallationReport, RuntimeRequirements};
use crate::settings::Settings;
use crate::store::KeyValueStore;
use crate::supervisor::{JobLauncher, LaunchSpec, ProcessSupervisor};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LAST_CONFIG_KEY: &str = "training.last_config";
pub const LAST_PRESET_KEY: &str = "training.last_preset";

/// Finished jobs stay queryable for this long before the next start prunes them.
pub const FINISHED_JOB_RETENTION: Duration = Duration::from_secs(600);

/// A launch that has been fully resolved but not started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedLaunch {
    pub command: TrainingCommand,
    pub spec: LaunchSpec,
    /// Path-resolution fallbacks that were taken.
    pub warnings: Vec<String>,
}

/// A started job as returned to the caller.
#[derive(Debug)]
pub struct StartedTraining {
    pub job_id: JobId,
    pub events: JobEvents,
    pub preset_name: String,
    pub warnings: Vec<String>,
}

/// Preset suggested for the detected GPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresetRecommendation {
    pub gpu: GpuReport,
    pub vram_gb: Option<u32>,
    /// `None` when the GPU is unknown or smaller than every preset.
    pub preset: Option<String>,
}

impl PresetRecommendation {
    #[must_use]
    pub fn from_report(catalog: &VramPresetCatalog, gpu: GpuReport) -> Self {
        let vram_gb = match gpu.status {
            GpuStatus::Detected => gpu.primary().map(|d| d.vram_gb()),
            GpuStatus::NoGpu | GpuStatus::Unknown => None,
        };
        let preset = vram_gb.and_then(|gb| catalog.recommend_for_vram(gb)).map(|p| p.name.clone());
        Self { gpu, vram_gb, preset }
    }
}

pub struct TrainingService {
    catalog: VramPresetCatalog,
    resolver: ConfigResolver,
    registry: Arc<JobRegistry>,
    launcher: Arc<dyn JobLauncher>,
    cancellation: CancellationController,
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for TrainingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingService")
            .field("catalog", &self.catalog.names())
            .field("resolver", &self.resolver)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl TrainingService {
    /// Wire a service from loaded settings, spawning real processes.
    #[must_use]
    pub fn from_settings(settings: &Settings, store: Arc<dyn KeyValueStore>) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let supervisor = ProcessSupervisor::new(Arc::clone(&registry), settings.supervisor_settings());
        Self::from_parts(
            settings.catalog(),
            ConfigResolver::new(settings.resolver_settings()),
            registry,
            Arc::new(supervisor),
            store,
        )
    }

    #[must_use]
    pub fn from_parts(
        catalog: VramPresetCatalog,
        resolver: ConfigResolver,
        registry: Arc<JobRegistry>,
        launcher: Arc<dyn JobLauncher>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let cancellation = CancellationController::new(Arc::clone(&registry));
        Self { catalog, resolver, registry, launcher, cancellation, store }
    }

    #[must_use]
    pub fn catalog(&self) -> &VramPresetCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Validate `config`, build its arguments and resolve backend paths without spawning.
    pub fn prepare(&self, config: &TrainingConfig, preset: Option<&VramPreset>) -> TrainingResult<PreparedLaunch> {
        config.validate()?;
        let command = CommandBuilder::new(&self.catalog).build(config, preset)?;
        let backend = self.resolver.resolve();
        let spec = LaunchSpec {
            program: backend.python.path,
            script: Some(backend.scripts_dir.path.join(command.script_name)),
            args: command.args.clone(),
            env: Vec::new(),
            working_dir: backend.scripts_dir.validated.then_some(backend.scripts_dir.path),
        };
        Ok(PreparedLaunch { command, spec, warnings: backend.warnings })
    }

    /// Start a training job. Configuration errors are returned before anything is spawned.
    pub async fn start_training(
        &self,
        config: &TrainingConfig,
        preset: Option<&VramPreset>,
    ) -> TrainingResult<StartedTraining> {
        let prepared = self.prepare(config, preset)?;
        let pruned = self.registry.prune_finished(FINISHED_JOB_RETENTION).await;
        if pruned > 0 {
            debug!(pruned, "Pruned finished jobs");
        }
        let started = self.launcher.launch(prepared.spec).await?;
        info!(
            job_id = %started.job_id,
            model_type = %prepared.command.model_type,
            preset = %prepared.command.preset_name,
            "Training job started"
        );
        self.remember(config, &prepared.command.preset_name);

        Ok(StartedTraining {
            job_id: started.job_id,
            events: started.events,
            preset_name: prepared.command.preset_name,
            warnings: prepared.warnings,
        })
    }

    fn remember(&self, config: &TrainingConfig, preset_name: &str) {
        let result = serde_json::to_value(config)
            .map_err(TrainingError::from)
            .and_then(|value| self.store.set(LAST_CONFIG_KEY, value))
            .and_then(|()| self.store.set(LAST_PRESET_KEY, serde_json::Value::from(preset_name)));
        if let Err(e) = result {
            warn!(error = %e, "Failed to remember last training config");
        }
    }

    pub async fn cancel_training(&self, job_id: &JobId) -> CancelOutcome {
        self.cancellation.cancel(job_id).await
    }

    pub async fn check_training_status(&self, job_id: &JobId) -> JobStatus {
        self.registry.status(job_id).await
    }

    pub async fn job_snapshot(&self, job_id: &JobId) -> Option<JobSnapshot> {
        self.registry.snapshot(job_id).await
    }

    #[must_use]
    pub fn validate_backend_installation(&self) -> InstallationReport {
        self.resolver.validate_installation()
    }

    pub async fn check_runtime_requirements(&self) -> RuntimeRequirements {
        self.resolver.check_runtime_requirements().await
    }

    /// Detect the interpreter's GPU and pick the preset that fits it.
    pub async fn recommend_preset(&self) -> PresetRecommendation {
        let gpu = self.resolver.detect_gpu().await;
        let recommendation = PresetRecommendation::from_report(&self.catalog, gpu);
        debug!(vram_gb = ?recommendation.vram_gb, preset = ?recommendation.preset, "Preset recommendation");
        recommendation
    }

    /// The config most recently passed to a successful `start_training`.
    pub fn last_config(&self) -> TrainingResult<Option<TrainingConfig>> {
        match self.store.get(LAST_CONFIG_KEY)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn last_preset(&self) -> TrainingResult<Option<String>> {
        Ok(self.store.get(LAST_PRESET_KEY)?.and_then(|v| v.as_str().map(str::to_string)))
    }
}
