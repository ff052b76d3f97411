//! Command implementations for the Tessera CLI.

pub mod command;
pub mod doctor;
pub mod last;
pub mod presets;
pub mod train;

use anyhow::{Context, Result};
use std::path::Path;
use tessera_training::{TrainingConfig, TrainingService, VramPreset};

/// Load a job file and look up the `--preset` override, if any.
pub(crate) fn load_job(
    service: &TrainingService,
    job: &Path,
    preset: Option<&str>,
) -> Result<(TrainingConfig, Option<VramPreset>)> {
    let config = TrainingConfig::load(job)
        .with_context(|| format!("Failed to load job file {}", job.display()))?;
    let preset = preset.map(|name| service.catalog().get(name).cloned()).transpose()?;
    Ok((config, preset))
}
