//! Show the resolved backend invocation without spawning it.

use super::load_job;
use anyhow::Result;
use colored::Colorize;
use serde_json::json;
use std::path::Path;
use tessera_training::TrainingService;

pub fn execute(service: &TrainingService, job: &Path, preset: Option<&str>, json_output: bool) -> Result<()> {
    let (config, preset) = load_job(service, job, preset)?;
    let prepared = service.prepare(&config, preset.as_ref())?;

    if json_output {
        let out = json!({
            "model_type": prepared.command.model_type,
            "preset": prepared.command.preset_name,
            "program": prepared.spec.program,
            "argv": prepared.spec.argv(),
            "working_dir": prepared.spec.working_dir,
            "warnings": prepared.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "Backend invocation".bold().cyan());
    println!("  Model: {}", prepared.command.model_type);
    println!("  Preset: {}", prepared.command.preset_name);
    if let Some(dir) = &prepared.spec.working_dir {
        println!("  Working dir: {}", dir.display().to_string().dimmed());
    }
    for warning in &prepared.warnings {
        println!("  {}", format!("⚠ {warning}").yellow());
    }
    println!();
    println!("{}", prepared.spec.program.display());
    for arg in prepared.spec.argv() {
        if arg.starts_with("--") {
            println!("  {}", arg.cyan());
        } else {
            println!("    {arg}");
        }
    }
    Ok(())
}
