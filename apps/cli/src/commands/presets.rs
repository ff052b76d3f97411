//! List VRAM presets.

use anyhow::Result;
use colored::Colorize;
use tessera_training::{TrainingService, DEFAULT_PRESET};

pub fn execute(service: &TrainingService, json_output: bool) -> Result<()> {
    let presets: Vec<_> = service.catalog().iter().collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("VRAM Presets ({})", presets.len()).bold().cyan());
    println!();
    println!("{:<24} {:>5} {:>6} {:<6} {:<12} {}", "Name", "VRAM", "Batch", "Prec.", "Optimizer", "Notes");
    println!("{}", "─".repeat(80));
    for preset in presets {
        let mut notes = Vec::new();
        if preset.split_mode {
            notes.push("split mode".to_string());
        }
        if preset.gradient_checkpointing {
            notes.push("grad ckpt".to_string());
        }
        if !preset.additional_args.is_empty() {
            notes.push(preset.additional_args.join(" "));
        }
        let name = if preset.name == DEFAULT_PRESET {
            format!("{} *", preset.name).green().to_string()
        } else {
            preset.name.clone()
        };
        println!(
            "{:<24} {:>4}G {:>6} {:<6} {:<12} {}",
            name,
            preset.vram_gb,
            preset.batch_size,
            preset.precision.as_str(),
            preset.optimizer,
            notes.join(", ").dimmed()
        );
    }
    println!();
    println!("  {}", "* default when a job does not name a preset".dimmed());
    println!();
    Ok(())
}
