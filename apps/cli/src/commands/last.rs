//! Print the remembered job config.

use anyhow::{Context, Result};
use colored::Colorize;
use tessera_training::TrainingService;

pub fn execute(service: &TrainingService) -> Result<()> {
    let Some(config) = service.last_config().context("Failed to read remembered config")? else {
        println!("{}", "No training run has been started yet.".dimmed());
        return Ok(());
    };
    if let Some(preset) = service.last_preset()? {
        eprintln!("{} {}", "Preset:".bold(), preset);
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
