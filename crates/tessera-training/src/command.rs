//! Translation of a `TrainingConfig` plus VRAM preset into backend command-line arguments.

use crate::config::{ModelFamily, ModelType, TrainingConfig};
use crate::error::{TrainingError, TrainingResult};
use crate::preset::{Precision, VramPreset, VramPresetCatalog};
use std::path::Path;
use tracing::debug;

/// Preset used when a config does not reference one and no override is given.
pub const DEFAULT_PRESET: &str = "Medium VRAM (16GB)";

/// Network argument that limits a split-mode Flux run to the single-stream blocks.
pub const SPLIT_MODE_NETWORK_ARG: &str = "train_blocks=single";

/// A resolved invocation: which entry-point script to run and with which arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingCommand {
    pub model_type: ModelType,
    pub script_name: &'static str,
    pub preset_name: String,
    pub args: Vec<String>,
}

/// Builds backend arguments against a preset catalog.
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder<'a> {
    catalog: &'a VramPresetCatalog,
}

impl<'a> CommandBuilder<'a> {
    #[must_use]
    pub fn new(catalog: &'a VramPresetCatalog) -> Self {
        Self { catalog }
    }

    /// Resolve the preset for `config`: the override if given, else the referenced name,
    /// else [`DEFAULT_PRESET`].
    pub fn resolve_preset<'p>(
        &self,
        config: &TrainingConfig,
        preset_override: Option<&'p VramPreset>,
    ) -> TrainingResult<&'p VramPreset>
    where
        'a: 'p,
    {
        if let Some(preset) = preset_override {
            return Ok(preset);
        }
        let name = config.vram_preset.as_deref().unwrap_or_else(|| {
            debug!(default = DEFAULT_PRESET, "No VRAM preset referenced, using default");
            DEFAULT_PRESET
        });
        self.catalog.get(name)
    }

    pub fn build(
        &self,
        config: &TrainingConfig,
        preset_override: Option<&VramPreset>,
    ) -> TrainingResult<TrainingCommand> {
        let preset = self.resolve_preset(config, preset_override)?;
        let args = build_args(config, preset)?;
        let model_type = config.model_type();
        Ok(TrainingCommand {
            model_type,
            script_name: model_type.script_name(),
            preset_name: preset.name.clone(),
            args,
        })
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

struct Args(Vec<String>);

impl Args {
    fn flag(&mut self, flag: &str) {
        self.0.push(flag.to_string());
    }

    fn opt(&mut self, flag: &str, value: impl ToString) {
        self.0.push(flag.to_string());
        self.0.push(value.to_string());
    }

    fn opt_many(&mut self, flag: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        self.0.push(flag.to_string());
        self.0.extend(values.iter().cloned());
    }
}

/// Produce the ordered argument vector for `config` under `preset`.
///
/// Ordering is fixed: model components, dataset and output, network, hyperparameters,
/// preset efficiency settings, family-specific tuning, sampling, then the preset's
/// additional arguments verbatim.
pub fn build_args(config: &TrainingConfig, preset: &VramPreset) -> TrainingResult<Vec<String>> {
    config.validate()?;
    let resolution = config
        .resolution
        .ok_or_else(|| TrainingError::Validation("resolution is required".to_string()))?;
    let model_type = config.model_type();
    let hp = &config.hyperparams;
    let mut args = Args(Vec::with_capacity(64));

    args.opt("--pretrained_model_name_or_path", path_arg(&config.pretrained_model));
    match &config.model {
        ModelFamily::Flux { clip_l, t5xxl, ae, .. } => {
            args.opt("--clip_l", path_arg(clip_l));
            args.opt("--t5xxl", path_arg(t5xxl));
            args.opt("--ae", path_arg(ae));
        }
        ModelFamily::Sdxl { vae } => {
            if let Some(vae) = vae {
                args.opt("--vae", path_arg(vae));
            }
        }
        ModelFamily::Sd15 { vae, v2 } => {
            if let Some(vae) = vae {
                args.opt("--vae", path_arg(vae));
            }
            if *v2 {
                args.flag("--v2");
            }
        }
    }

    args.opt("--train_data_dir", path_arg(&config.train_data_dir));
    args.opt("--output_dir", path_arg(&config.output_dir));
    args.opt("--output_name", &config.output_name);
    args.opt("--resolution", resolution.to_arg());
    args.opt("--caption_extension", &config.caption_extension);
    args.opt("--save_model_as", "safetensors");

    args.opt("--network_module", model_type.network_module());
    args.opt("--network_dim", hp.network_dim);
    args.opt("--network_alpha", hp.network_alpha);
    let mut network_args = preset.network_args.clone();
    if preset.split_mode {
        args.flag("--split_mode");
        if !network_args.iter().any(|a| a == SPLIT_MODE_NETWORK_ARG) {
            network_args.push(SPLIT_MODE_NETWORK_ARG.to_string());
        }
    }
    args.opt_many("--network_args", &network_args);

    args.opt("--learning_rate", hp.learning_rate);
    args.opt("--max_train_epochs", hp.max_train_epochs);
    if let Some(every) = hp.save_every_n_epochs {
        args.opt("--save_every_n_epochs", every);
    }
    if let Some(seed) = hp.seed {
        args.opt("--seed", seed);
    }

    args.opt("--train_batch_size", preset.batch_size);
    if preset.precision != Precision::No {
        args.opt("--mixed_precision", preset.precision.as_str());
        args.opt("--save_precision", preset.precision.as_str());
    }
    args.opt("--optimizer_type", &preset.optimizer);
    args.opt_many("--optimizer_args", &preset.optimizer_args);
    if preset.gradient_checkpointing {
        args.flag("--gradient_checkpointing");
    }
    args.opt("--max_data_loader_n_workers", preset.max_data_loader_workers);
    if preset.max_data_loader_workers > 0 {
        args.flag("--persistent_data_loader_workers");
    }
    if preset.cache_latents_to_disk {
        args.flag("--cache_latents");
        args.flag("--cache_latents_to_disk");
    }
    if preset.cache_text_encoder_outputs_to_disk {
        args.flag("--cache_text_encoder_outputs");
        args.flag("--cache_text_encoder_outputs_to_disk");
    }
    args.flag("--sdpa");

    if let ModelFamily::Flux { guidance_scale, .. } = &config.model {
        args.opt("--guidance_scale", guidance_scale.unwrap_or(1.0));
        args.opt("--timestep_sampling", "shift");
        args.opt("--discrete_flow_shift", "3.1582");
        args.opt("--model_prediction_type", "raw");
        args.flag("--network_train_unet_only");
    } else if preset.cache_text_encoder_outputs_to_disk {
        // Cached text-encoder outputs cannot be trained through.
        args.flag("--network_train_unet_only");
    }

    if let Some(prompts) = &config.sample_prompts {
        args.opt("--sample_prompts", path_arg(prompts));
        if let Some(every) = config.sample_every_n_epochs {
            args.opt("--sample_every_n_epochs", every);
        }
    }

    args.0.extend(preset.additional_args.iter().cloned());
    Ok(args.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{flux_config, sdxl_config};
    use crate::config::Resolution;

    fn contains_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_flux_uses_ae_never_vae() {
        let catalog = VramPresetCatalog::builtin();
        for preset in catalog.iter() {
            let args = build_args(&flux_config(), preset).unwrap();
            assert!(args.iter().any(|a| a == "--ae"));
            assert!(!args.iter().any(|a| a == "--vae"));
        }
    }

    #[test]
    fn test_sdxl_uses_vae_never_ae() {
        let catalog = VramPresetCatalog::builtin();
        for preset in catalog.iter() {
            let args = build_args(&sdxl_config(), preset).unwrap();
            assert!(args.iter().any(|a| a == "--vae"));
            assert!(!args.iter().any(|a| a == "--ae"));
        }
    }

    #[test]
    fn test_missing_resolution_is_validation_error() {
        let mut config = flux_config();
        config.resolution = None;
        let preset = VramPresetCatalog::builtin().get(DEFAULT_PRESET).unwrap().clone();
        assert!(matches!(build_args(&config, &preset), Err(TrainingError::Validation(_))));
    }

    #[test]
    fn test_flux_low_vram_example() {
        let catalog = VramPresetCatalog::builtin();
        let command = CommandBuilder::new(&catalog).build(&flux_config(), None).unwrap();

        assert_eq!(command.script_name, "flux_train_network.py");
        assert_eq!(command.preset_name, "Low VRAM (12GB)");
        assert!(contains_pair(&command.args, "--resolution", "1024,1024"));
        assert!(contains_pair(&command.args, "--network_module", "networks.lora_flux"));
        assert!(contains_pair(&command.args, "--network_args", SPLIT_MODE_NETWORK_ARG));
        assert!(command.args.iter().any(|a| a == "--split_mode"));
        assert!(command.args.iter().any(|a| a == "--ae"));
    }

    #[test]
    fn test_very_low_vram_flags() {
        let catalog = VramPresetCatalog::builtin();
        let mut config = flux_config();
        config.vram_preset = Some("Very Low VRAM (8GB)".to_string());
        let command = CommandBuilder::new(&catalog).build(&config, None).unwrap();

        assert!(contains_pair(&command.args, "--max_data_loader_n_workers", "0"));
        assert!(!command.args.iter().any(|a| a == "--persistent_data_loader_workers"));
        assert!(command.args.iter().any(|a| a == "--split_mode"));
        assert!(command.args.iter().any(|a| a == "--cpu_offload_checkpointing"));
    }

    #[test]
    fn test_additional_args_appended_last_in_order() {
        let catalog = VramPresetCatalog::builtin();
        let preset = catalog.get("Very Low VRAM (8GB)").unwrap();
        let args = build_args(&flux_config(), preset).unwrap();
        let tail = &args[args.len() - preset.additional_args.len()..];
        assert_eq!(tail, preset.additional_args.as_slice());
    }

    #[test]
    fn test_output_is_stable() {
        let catalog = VramPresetCatalog::builtin();
        let builder = CommandBuilder::new(&catalog);
        let first = builder.build(&flux_config(), None).unwrap();
        let second = builder.build(&flux_config(), None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_caption_extension_always_present() {
        let catalog = VramPresetCatalog::builtin();
        let args = CommandBuilder::new(&catalog).build(&sdxl_config(), None).unwrap().args;
        assert!(contains_pair(&args, "--caption_extension", ".txt"));
    }

    #[test]
    fn test_sdxl_script_and_module() {
        let catalog = VramPresetCatalog::builtin();
        let command = CommandBuilder::new(&catalog).build(&sdxl_config(), None).unwrap();
        assert_eq!(command.script_name, "sdxl_train_network.py");
        assert!(contains_pair(&command.args, "--network_module", "networks.lora"));
        assert!(!command.args.iter().any(|a| a == "--split_mode"));
    }

    #[test]
    fn test_unknown_preset_reference() {
        let catalog = VramPresetCatalog::builtin();
        let mut config = sdxl_config();
        config.vram_preset = Some("Ultra".to_string());
        let err = CommandBuilder::new(&catalog).build(&config, None).unwrap_err();
        assert!(matches!(err, TrainingError::PresetNotFound(_)));
    }

    #[test]
    fn test_override_preset_wins() {
        let catalog = VramPresetCatalog::builtin();
        let mut adhoc = catalog.get("High VRAM (24GB)").unwrap().clone();
        adhoc.name = "adhoc".to_string();
        adhoc.batch_size = 3;
        let command = CommandBuilder::new(&catalog).build(&flux_config(), Some(&adhoc)).unwrap();
        assert_eq!(command.preset_name, "adhoc");
        assert!(contains_pair(&command.args, "--train_batch_size", "3"));
    }

    #[test]
    fn test_square_resolution_arg() {
        let catalog = VramPresetCatalog::builtin();
        let mut config = sdxl_config();
        config.resolution = Some(Resolution::Square(768));
        let args = CommandBuilder::new(&catalog).build(&config, None).unwrap().args;
        assert!(contains_pair(&args, "--resolution", "768"));
    }
}
