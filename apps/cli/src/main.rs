//! Tessera CLI - command-line front end for supervised LoRA training jobs
//!
//! Provides the `tessera` command for building, launching and monitoring training runs
//! against a local sd-scripts backend.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Tessera - LoRA training job orchestration
#[derive(Parser, Debug)]
#[command(
    name = "tessera",
    author,
    version,
    about = "Tessera - LoRA training job orchestration",
    long_about = "Tessera builds training commands from job files and VRAM presets, runs the backend as a supervised process and streams its progress."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Settings file to use instead of ~/.tessera/config.toml and ./.tesserarc
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a training job and stream its progress
    ///
    /// Press Ctrl-C to cancel the running job.
    Train {
        /// Job file (TOML, or JSON with a .json extension)
        job: PathBuf,

        /// VRAM preset to use instead of the one named in the job file
        #[arg(long)]
        preset: Option<String>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show the backend invocation for a job without running it
    Command {
        job: PathBuf,

        #[arg(long)]
        preset: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// List available VRAM presets
    Presets {
        #[arg(long)]
        json: bool,
    },

    /// Check the backend installation and Python packages
    Doctor {
        #[arg(long)]
        json: bool,
    },

    /// Print the job config from the last started training run
    Last,
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = config::load_settings(args.config.as_deref())?;

    let level = args
        .log_level
        .as_deref()
        .or(settings.log_level.as_deref())
        .map_or(Level::WARN, parse_level);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let service = config::build_service(&settings);

    match args.command {
        Command::Train { job, preset, json } => {
            commands::train::execute(&service, &job, preset.as_deref(), json).await
        }
        Command::Command { job, preset, json } => {
            commands::command::execute(&service, &job, preset.as_deref(), json)
        }
        Command::Presets { json } => commands::presets::execute(&service, json),
        Command::Doctor { json } => commands::doctor::execute(&service, json).await,
        Command::Last => commands::last::execute(&service),
    }
}
