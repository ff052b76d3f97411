//! Doctor command implementation.
//!
//! Validates the backend install and the Python packages it needs, and suggests a VRAM
//! preset for the detected GPU.

use anyhow::Result;
use colored::Colorize;
use serde_json::json;
use tessera_training::{GpuStatus, PresetRecommendation, TrainingService};

pub async fn execute(service: &TrainingService, json_output: bool) -> Result<()> {
    let install = service.validate_backend_installation();
    let (runtime, hardware) = tokio::join!(service.check_runtime_requirements(), service.recommend_preset());

    if json_output {
        let out = json!({
            "installation": install,
            "runtime": runtime,
            "hardware": hardware,
            "ok": install.is_valid && runtime.is_valid,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "Tessera Doctor - Backend Validation".bold().cyan());
    println!();

    println!("{}", "Backend scripts:".bold());
    println!("  Location: {}", install.scripts_dir.display().to_string().dimmed());
    if install.is_valid {
        println!("  Status: {}", "✓ Found".green());
    } else {
        println!("  Status: {}", "✗ Incomplete".red());
        for script in &install.missing_scripts {
            println!("  Missing: {}", script.red());
        }
        println!();
        println!("  {}", "Fix:".yellow());
        println!("    Set TESSERA_SCRIPTS_DIR or backend.scripts_dir to an sd-scripts checkout");
    }
    println!("  Version: {}", install.version.as_deref().unwrap_or("unknown").dimmed());
    if install.has_library {
        println!("  Library: {}", "✓ Present".green());
    } else {
        println!("  Library: {}", "⚠ Missing".yellow());
    }
    println!();

    println!("{}", "Python runtime:".bold());
    println!("  Interpreter: {}", runtime.python.display().to_string().dimmed());
    match &runtime.python_version {
        Some(version) if runtime.python_supported => println!("  Version: {}", format!("✓ Python {version}").green()),
        Some(version) => println!("  Version: {}", format!("✗ Python {version} (3.8+ required)").red()),
        None => println!("  Version: {}", "unknown".yellow()),
    }
    for (package, version) in &runtime.versions {
        println!("  {:<14} {}", package, format!("✓ {version}").green());
    }
    for package in &runtime.missing_packages {
        println!("  {:<14} {}", package, "✗ Missing".red());
    }
    println!();

    render_hardware(&hardware);
    println!();

    if install.is_valid && runtime.is_valid {
        println!("{}", "✓ Ready to train".bold().green());
    } else {
        println!("{}", "⚠ Some checks failed".bold().yellow());
    }
    Ok(())
}

fn render_hardware(hardware: &PresetRecommendation) {
    println!("{}", "Hardware:".bold());
    match (hardware.gpu.status, hardware.gpu.primary()) {
        (GpuStatus::Detected, Some(gpu)) => {
            println!("  GPU: {} ({} GB)", gpu.name, gpu.vram_gb());
        }
        (GpuStatus::NoGpu, _) => println!("  GPU: {}", "⚠ No CUDA device found".yellow()),
        _ => {
            let detail = hardware.gpu.detail.as_deref().unwrap_or("detection failed");
            println!("  GPU: {} {}", "unknown".yellow(), format!("({detail})").dimmed());
        }
    }
    match &hardware.preset {
        Some(preset) => println!("  Recommended preset: {}", preset.green()),
        None => println!("  Recommended preset: {}", "unknown".yellow()),
    }
}
