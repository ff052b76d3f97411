//! Settings loading and service wiring.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tessera_training::{JsonFileStore, Settings, TrainingService};

/// Load settings.
///
/// Precedence:
/// 1. CLI arguments (handled by clap)
/// 2. Environment variables (`TESSERA_PYTHON`, `TESSERA_SCRIPTS_DIR`)
/// 3. Local settings file (./.tesserarc)
/// 4. Global settings file (~/.tessera/config.toml)
/// 5. Defaults
///
/// An explicit `--config` file replaces steps 3 and 4.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    match explicit {
        Some(path) => Settings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Settings::discover_and_load().context("Failed to load settings"),
    }
}

pub fn build_service(settings: &Settings) -> TrainingService {
    let store = JsonFileStore::new(JsonFileStore::default_path());
    TrainingService::from_settings(settings, Arc::new(store))
}
