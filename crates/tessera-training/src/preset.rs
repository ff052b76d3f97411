//! VRAM presets: named bundles of memory-saving training settings.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};

/// Mixed-precision mode passed to `--mixed_precision` / `--save_precision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    No,
    Fp16,
    Bf16,
}

impl Precision {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Fp16 => "fp16",
            Self::Bf16 => "bf16",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VramPreset {
    pub name: String,
    pub vram_gb: u32,
    pub batch_size: u32,
    #[serde(default)]
    pub gradient_checkpointing: bool,
    pub precision: Precision,
    pub optimizer: String,
    #[serde(default)]
    pub optimizer_args: Vec<String>,
    #[serde(default)]
    pub split_mode: bool,
    #[serde(default)]
    pub network_args: Vec<String>,
    #[serde(default)]
    pub additional_args: Vec<String>,
    #[serde(default)]
    pub max_data_loader_workers: u32,
    #[serde(default)]
    pub cache_latents_to_disk: bool,
    #[serde(default)]
    pub cache_text_encoder_outputs_to_disk: bool,
}

const ADAFACTOR_ARGS: [&str; 3] = ["relative_step=False", "scale_parameter=False", "warmup_init=False"];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// The presets shipped with the application, lowest tier first.
#[must_use]
pub fn builtin_presets() -> Vec<VramPreset> {
    vec![
        VramPreset {
            name: "Very Low VRAM (8GB)".to_string(),
            vram_gb: 8,
            batch_size: 1,
            gradient_checkpointing: true,
            precision: Precision::Fp16,
            optimizer: "Adafactor".to_string(),
            optimizer_args: strings(&ADAFACTOR_ARGS),
            split_mode: true,
            network_args: Vec::new(),
            additional_args: strings(&["--cpu_offload_checkpointing", "--blocks_to_swap", "18"]),
            max_data_loader_workers: 0,
            cache_latents_to_disk: true,
            cache_text_encoder_outputs_to_disk: true,
        },
        VramPreset {
            name: "Low VRAM (12GB)".to_string(),
            vram_gb: 12,
            batch_size: 1,
            gradient_checkpointing: true,
            precision: Precision::Fp16,
            optimizer: "Adafactor".to_string(),
            optimizer_args: strings(&ADAFACTOR_ARGS),
            split_mode: true,
            network_args: Vec::new(),
            additional_args: Vec::new(),
            max_data_loader_workers: 1,
            cache_latents_to_disk: true,
            cache_text_encoder_outputs_to_disk: true,
        },
        VramPreset {
            name: "Medium VRAM (16GB)".to_string(),
            vram_gb: 16,
            batch_size: 1,
            gradient_checkpointing: true,
            precision: Precision::Bf16,
            optimizer: "AdamW8bit".to_string(),
            optimizer_args: Vec::new(),
            split_mode: false,
            network_args: Vec::new(),
            additional_args: Vec::new(),
            max_data_loader_workers: 2,
            cache_latents_to_disk: true,
            cache_text_encoder_outputs_to_disk: false,
        },
        VramPreset {
            name: "High VRAM (24GB)".to_string(),
            vram_gb: 24,
            batch_size: 2,
            gradient_checkpointing: false,
            precision: Precision::Bf16,
            optimizer: "AdamW8bit".to_string(),
            optimizer_args: Vec::new(),
            split_mode: false,
            network_args: Vec::new(),
            additional_args: Vec::new(),
            max_data_loader_workers: 2,
            cache_latents_to_disk: false,
            cache_text_encoder_outputs_to_disk: false,
        },
    ]
}

/// Read-only lookup table of presets keyed by name.
#[derive(Debug, Clone)]
pub struct VramPresetCatalog {
    presets: Vec<VramPreset>,
}

impl VramPresetCatalog {
    /// Catalog containing only the built-in presets.
    #[must_use]
    pub fn builtin() -> Self {
        Self { presets: builtin_presets() }
    }

    /// Built-in presets plus user presets; a user preset replaces a built-in of the same name.
    #[must_use]
    pub fn with_user_presets(user: impl IntoIterator<Item = VramPreset>) -> Self {
        let mut presets = builtin_presets();
        for preset in user {
            if let Some(existing) = presets.iter_mut().find(|p| p.name == preset.name) {
                *existing = preset;
            } else {
                presets.push(preset);
            }
        }
        Self { presets }
    }

    pub fn get(&self, name: &str) -> TrainingResult<&VramPreset> {
        self.presets
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| TrainingError::PresetNotFound(name.to_string()))
    }

    /// The most demanding preset that fits in `vram_gb`; ties go to the first listed.
    #[must_use]
    pub fn recommend_for_vram(&self, vram_gb: u32) -> Option<&VramPreset> {
        self.presets
            .iter()
            .filter(|p| p.vram_gb <= vram_gb)
            .reduce(|best, p| if p.vram_gb > best.vram_gb { p } else { best })
    }

    pub fn iter(&self) -> impl Iterator<Item = &VramPreset> {
        self.presets.iter()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.presets.iter().map(|p| p.name.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Default for VramPresetCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
