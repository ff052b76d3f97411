//! Training command implementation.

use super::load_job;
use anyhow::{bail, Result};
use colored::Colorize;
use std::future::Future;
use std::path::Path;
use tessera_training::{EventKind, JobEvents, ProgressEvent, TrainingService};

pub async fn execute(service: &TrainingService, job: &Path, preset: Option<&str>, json_output: bool) -> Result<()> {
    let (config, preset) = load_job(service, job, preset)?;
    let mut started = service.start_training(&config, preset.as_ref()).await?;

    if !json_output {
        println!();
        println!("{}", "Training started".bold().cyan());
        println!("  Job: {}", started.job_id.as_str().cyan());
        println!("  Model: {}", config.model_type());
        println!("  Preset: {}", started.preset_name);
        for warning in &started.warnings {
            println!("  {}", format!("⚠ {warning}").yellow());
        }
        println!();
    }

    let job_id = started.job_id.clone();
    let cancel = || async {
        service.cancel_training(&job_id).await;
    };
    let outcome = follow(&mut started.events, tokio::signal::ctrl_c(), cancel, json_output).await?;

    match outcome {
        Some(EventKind::Completed) => Ok(()),
        Some(EventKind::Cancelled) => bail!("Training cancelled"),
        _ => bail!("Training failed"),
    }
}

/// Print events until the stream closes and return the terminal kind.
///
/// `interrupt` is polled for the whole run; when it resolves, `cancel` runs once.
async fn follow<I, F>(
    events: &mut JobEvents,
    interrupt: I,
    cancel: impl FnOnce() -> F,
    json_output: bool,
) -> Result<Option<EventKind>>
where
    I: Future,
    F: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    let mut cancel = Some(cancel);
    let mut outcome = None;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if json_output {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    render(&event);
                }
                if event.terminal {
                    outcome = Some(event.kind);
                }
            }
            _ = &mut interrupt, if cancel.is_some() => {
                if !json_output {
                    eprintln!("{}", "Cancelling training...".yellow());
                }
                if let Some(cancel) = cancel.take() {
                    cancel().await;
                }
            }
        }
    }
    Ok(outcome)
}

fn render(event: &ProgressEvent) {
    match event.kind {
        EventKind::Started => println!("{} {}", "▶".green(), event.message),
        EventKind::Progress => println!("  {}", event.message),
        EventKind::Heartbeat => println!("  {}", "… still running".dimmed()),
        EventKind::Error if event.terminal => println!("{} {}", "✗".red(), event.message.red()),
        EventKind::Error => println!("  {}", event.message.red()),
        EventKind::Completed => {
            println!();
            println!("{} {}", "✓".green(), event.message.bold().green());
            if !event.processed_files.is_empty() {
                println!("  Processed files: {}", event.processed_files.len());
            }
        }
        EventKind::Cancelled => println!("{} {}", "■".yellow(), event.message.yellow()),
    }
}
