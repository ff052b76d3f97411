//! Application settings file support.
//!
//! Settings are read from a global file (`~/.tessera/config.toml`) and a local override
//! (`./.tesserarc`). Environment variables take precedence over both.

use crate::error::{TrainingError, TrainingResult};
use crate::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use crate::preset::{VramPreset, VramPresetCatalog};
use crate::resolver::ResolverSettings;
use crate::supervisor::SupervisorSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// User presets; a preset named like a built-in replaces it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presets: Vec<VramPreset>,
}

/// Backend location overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_jobs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u64>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        if !path.exists() {
            return Err(TrainingError::Settings(format!("settings file not found: {}", path.display())));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| TrainingError::Settings(format!("{}: {}", path.display(), e)))?;
        let settings: Self = toml::from_str(&content)
            .map_err(|e| TrainingError::Settings(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save_to_file(&self, path: &Path) -> TrainingResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TrainingError::Settings(format!("failed to serialize: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    #[must_use]
    pub fn default_global_path() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".tessera").join("config.toml")
    }

    #[must_use]
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".tesserarc")
    }

    /// Load the global file then the local file; local values override global ones.
    ///
    /// A missing file is skipped. A file that exists but fails to parse is an error.
    pub fn discover_and_load() -> TrainingResult<Self> {
        Self::load_layered(&[Self::default_global_path(), Self::default_local_path()])
    }

    /// Merge the files at `paths` in order, skipping missing ones.
    pub fn load_layered(paths: &[PathBuf]) -> TrainingResult<Self> {
        let mut settings = Self::default();
        for path in paths {
            if !path.exists() {
                continue;
            }
            debug!(path = %path.display(), "Loading settings");
            settings.merge(Self::load_from_file(path)?);
        }
        Ok(settings)
    }

    /// Merge `other` into `self`. Values set in `other` win; presets are appended.
    pub fn merge(&mut self, other: Self) {
        if other.backend.python.is_some() {
            self.backend.python = other.backend.python;
        }
        if other.backend.scripts_dir.is_some() {
            self.backend.scripts_dir = other.backend.scripts_dir;
        }
        if other.backend.install_root.is_some() {
            self.backend.install_root = other.backend.install_root;
        }
        if other.supervisor.heartbeat_secs.is_some() {
            self.supervisor.heartbeat_secs = other.supervisor.heartbeat_secs;
        }
        if other.supervisor.max_concurrent_jobs.is_some() {
            self.supervisor.max_concurrent_jobs = other.supervisor.max_concurrent_jobs;
        }
        if other.supervisor.job_timeout_secs.is_some() {
            self.supervisor.job_timeout_secs = other.supervisor.job_timeout_secs;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        self.presets.extend(other.presets);
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.supervisor.heartbeat_secs == Some(0) {
            return Err(TrainingError::Settings("supervisor.heartbeat_secs must be > 0".to_string()));
        }
        if self.supervisor.job_timeout_secs == Some(0) {
            return Err(TrainingError::Settings("supervisor.job_timeout_secs must be > 0".to_string()));
        }
        for preset in &self.presets {
            if preset.name.trim().is_empty() {
                return Err(TrainingError::Settings("preset name must not be empty".to_string()));
            }
            if preset.batch_size == 0 {
                return Err(TrainingError::Settings(format!(
                    "preset '{}': batch_size must be >= 1",
                    preset.name
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        let defaults = SupervisorSettings::default();
        SupervisorSettings {
            heartbeat_interval: self
                .supervisor
                .heartbeat_secs
                .map_or(DEFAULT_HEARTBEAT_INTERVAL, Duration::from_secs),
            max_concurrent_jobs: self.supervisor.max_concurrent_jobs.unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: self.supervisor.job_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Resolver inputs from the process environment, with settings-file values filling gaps.
    #[must_use]
    pub fn resolver_settings(&self) -> ResolverSettings {
        self.resolver_settings_over(ResolverSettings::from_env())
    }

    /// Apply file values underneath `env`. Env overrides keep precedence.
    #[must_use]
    pub fn resolver_settings_over(&self, env: ResolverSettings) -> ResolverSettings {
        ResolverSettings {
            python_override: env.python_override.or_else(|| self.backend.python.clone()),
            scripts_override: env.scripts_override.or_else(|| self.backend.scripts_dir.clone()),
            install_root: self.backend.install_root.clone().or(env.install_root),
            dev_root: env.dev_root,
        }
    }

    /// Built-in presets extended with the user presets from this file.
    #[must_use]
    pub fn catalog(&self) -> VramPresetCatalog {
        VramPresetCatalog::with_user_presets(self.presets.iter().cloned())
    }
}
