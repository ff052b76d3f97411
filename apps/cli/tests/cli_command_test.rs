//! Integration tests for the `tessera command` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

const FLUX_JOB: &str = r#"
model_type = "flux"
pretrained_model = "/models/flux1-dev.safetensors"
clip_l = "/models/clip_l.safetensors"
t5xxl = "/models/t5xxl_fp16.safetensors"
ae = "/models/ae.safetensors"
train_data_dir = "/data/subject"
output_dir = "/out"
output_name = "subject-lora"
resolution = "1024,1024"
vram_preset = "Low VRAM (12GB)"

[hyperparams]
learning_rate = 0.0001
max_train_epochs = 4
"#;

fn tessera(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tessera").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env_remove("TESSERA_PYTHON")
        .env_remove("TESSERA_SCRIPTS_DIR");
    cmd
}

fn write_job(home: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = home.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn argv(home: &TempDir, job: &PathBuf, extra: &[&str]) -> Vec<String> {
    let assert = tessera(home).arg("command").arg(job).args(extra).arg("--json").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("command JSON should be valid");
    json["argv"].as_array().unwrap().iter().map(|a| a.as_str().unwrap().to_string()).collect()
}

fn has_pair(argv: &[String], flag: &str, value: &str) -> bool {
    argv.windows(2).any(|w| w[0] == flag && w[1] == value)
}

#[test]
fn test_flux_low_vram_invocation() {
    let home = TempDir::new().unwrap();
    let job = write_job(&home, "job.toml", FLUX_JOB);
    let argv = argv(&home, &job, &[]);

    assert!(argv[0].ends_with("flux_train_network.py"));
    assert!(has_pair(&argv, "--resolution", "1024,1024"));
    assert!(has_pair(&argv, "--ae", "/models/ae.safetensors"));
    assert!(has_pair(&argv, "--network_args", "train_blocks=single"));
    assert!(argv.iter().any(|a| a == "--split_mode"));
    assert!(!argv.iter().any(|a| a == "--vae"));
}

#[test]
fn test_preset_flag_overrides_job_file() {
    let home = TempDir::new().unwrap();
    let job = write_job(&home, "job.toml", FLUX_JOB);
    let argv = argv(&home, &job, &["--preset", "Very Low VRAM (8GB)"]);

    assert!(has_pair(&argv, "--max_data_loader_n_workers", "0"));
    let tail: Vec<_> = argv.iter().rev().take(3).rev().cloned().collect();
    assert_eq!(tail, vec!["--cpu_offload_checkpointing", "--blocks_to_swap", "18"]);
}

#[test]
fn test_json_job_file() {
    let home = TempDir::new().unwrap();
    let job = write_job(
        &home,
        "job.json",
        r#"{
  "model_type": "sdxl",
  "pretrained_model": "/models/sd_xl_base_1.0.safetensors",
  "vae": "/models/sdxl_vae.safetensors",
  "train_data_dir": "/data/subject",
  "output_dir": "/out",
  "output_name": "subject-xl",
  "resolution": 1024,
  "hyperparams": {"learning_rate": 0.0001, "max_train_epochs": 2}
}"#,
    );
    let argv = argv(&home, &job, &[]);
    assert!(argv[0].ends_with("sdxl_train_network.py"));
    assert!(has_pair(&argv, "--vae", "/models/sdxl_vae.safetensors"));
    assert!(has_pair(&argv, "--resolution", "1024"));
    assert!(!argv.iter().any(|a| a == "--ae"));
}

#[test]
fn test_missing_resolution_is_rejected() {
    let home = TempDir::new().unwrap();
    let job = write_job(&home, "job.toml", &FLUX_JOB.replace("resolution = \"1024,1024\"\n", ""));
    tessera(&home)
        .arg("command")
        .arg(&job)
        .assert()
        .failure()
        .stderr(predicate::str::contains("resolution is required"));
}

#[test]
fn test_unknown_model_type_is_rejected() {
    let home = TempDir::new().unwrap();
    let job = write_job(&home, "job.toml", &FLUX_JOB.replace("\"flux\"", "\"sd3\""));
    tessera(&home)
        .arg("command")
        .arg(&job)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported model type: sd3"));
}

#[test]
fn test_unknown_preset_is_rejected() {
    let home = TempDir::new().unwrap();
    let job = write_job(&home, "job.toml", FLUX_JOB);
    tessera(&home)
        .arg("command")
        .arg(&job)
        .arg("--preset")
        .arg("Potato (2GB)")
        .assert()
        .failure()
        .stderr(predicate::str::contains("VRAM preset not found"));
}
