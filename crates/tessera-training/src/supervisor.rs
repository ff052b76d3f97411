//! Spawning and supervision of backend processes.

use crate::error::{TrainingError, TrainingResult};
use crate::event::{EventKind, ProgressEvent};
use crate::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use crate::job::{JobId, JobState};
use crate::parser::ProgressStreamParser;
use crate::registry::{JobEvents, JobRegistry};
use crate::terminate::kill_process_tree;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A fully resolved process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    /// Script passed as the first argument, if any.
    pub script: Option<PathBuf>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Full argv after the program, as it will be passed to the OS.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        if let Some(script) = &self.script {
            argv.push(script.to_string_lossy().into_owned());
        }
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// A job accepted by a launcher: its id and its event stream.
#[derive(Debug)]
pub struct StartedJob {
    pub job_id: JobId,
    pub events: JobEvents,
}

/// Seam between request handling and process creation.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Start a job and return without waiting for it to finish.
    async fn launch(&self, spec: LaunchSpec) -> TrainingResult<StartedJob>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub heartbeat_interval: Duration,
    /// Maximum pending plus running jobs; `0` disables the limit.
    pub max_concurrent_jobs: usize,
    pub job_timeout: Option<Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self { heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL, max_concurrent_jobs: 2, job_timeout: None }
    }
}

/// Spawns backend processes and relays their output into the registry.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    registry: Arc<JobRegistry>,
    settings: SupervisorSettings,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(registry: Arc<JobRegistry>, settings: SupervisorSettings) -> Self {
        Self { registry, settings }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn settings(&self) -> SupervisorSettings {
        self.settings
    }

    pub async fn start(&self, spec: LaunchSpec) -> TrainingResult<StartedJob> {
        let program = spec.program.to_string_lossy().into_owned();
        let registration = self.registry.register(&program, self.settings.max_concurrent_jobs).await?;
        let job_id = registration.job_id;

        let mut cmd = Command::new(&spec.program);
        cmd.args(spec.argv())
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so cancellation reaches the backend's descendants too.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.registry.discard_pending(&job_id).await;
                error!(job_id = %job_id, program = %program, error = %source, "Failed to spawn training process");
                return Err(TrainingError::Spawn { program, source });
            }
        };

        let pid = child.id();
        if !self.registry.mark_running(&job_id, pid, self.settings.heartbeat_interval).await {
            // Cancelled while spawning; the stream already carries the terminal event.
            terminate(&job_id, &mut child, pid).await;
            return Ok(StartedJob { job_id, events: registration.events });
        }
        info!(job_id = %job_id, pid = ?pid, program = %program, "Training process started");

        tokio::spawn(supervise(
            Arc::clone(&self.registry),
            job_id.clone(),
            child,
            pid,
            registration.kill,
            self.settings.job_timeout,
        ));

        Ok(StartedJob { job_id, events: registration.events })
    }
}

#[async_trait]
impl JobLauncher for ProcessSupervisor {
    async fn launch(&self, spec: LaunchSpec) -> TrainingResult<StartedJob> {
        self.start(spec).await
    }
}

/// How long output is still relayed after the process exits.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

async fn next_line<R>(lines: &mut Option<Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Turns the backend's stdout and stderr lines into job events.
struct OutputRelay {
    registry: Arc<JobRegistry>,
    job_id: JobId,
    parser: ProgressStreamParser,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
}

impl OutputRelay {
    fn new(registry: Arc<JobRegistry>, job_id: JobId, child: &mut Child) -> Self {
        Self {
            parser: ProgressStreamParser::new(job_id.clone()),
            stdout: child.stdout.take().map(|s| BufReader::new(s).lines()),
            stderr: child.stderr.take().map(|s| BufReader::new(s).lines()),
            registry,
            job_id,
        }
    }

    fn is_closed(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none()
    }

    async fn on_stdout(&mut self, line: std::io::Result<Option<String>>) {
        match line {
            Ok(Some(line)) => {
                let before = self.parser.processed_count();
                if let Some(event) = self.parser.parse_line(&line) {
                    self.registry.emit(event).await;
                }
                if self.parser.processed_count() != before {
                    self.registry.set_processed_count(&self.job_id, self.parser.processed_count()).await;
                }
            }
            Ok(None) => self.stdout = None,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Stopped reading stdout");
                self.stdout = None;
            }
        }
    }

    async fn on_stderr(&mut self, line: std::io::Result<Option<String>>) {
        match line {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if !line.is_empty() {
                    let event = ProgressEvent::new(self.job_id.clone(), EventKind::Error, line);
                    self.registry.emit(event).await;
                }
            }
            Ok(None) => self.stderr = None,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Stopped reading stderr");
                self.stderr = None;
            }
        }
    }

    /// Relay whatever is left until both streams close.
    async fn drain(&mut self) {
        while !self.is_closed() {
            tokio::select! {
                line = next_line(&mut self.stdout) => self.on_stdout(line).await,
                line = next_line(&mut self.stderr) => self.on_stderr(line).await,
            }
        }
    }
}

enum Exit {
    Status(ExitStatus),
    WaitFailed(std::io::Error),
}

/// Kill the job's process group, falling back to the direct child.
async fn terminate(job_id: &JobId, child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        match kill_process_tree(pid).await {
            Ok(()) => return,
            Err(e) => warn!(job_id = %job_id, pid, error = %e, "Failed to kill process group"),
        }
    }
    if let Err(e) = child.start_kill() {
        warn!(job_id = %job_id, error = %e, "Failed to kill training process");
    }
}

/// Relay output while the process runs, then report its exit.
///
/// The exit is reported as soon as the process itself ends. Output that is still buffered
/// is relayed for a short grace period; descendants still holding the pipes after that
/// are killed.
async fn supervise(
    registry: Arc<JobRegistry>,
    job_id: JobId,
    mut child: Child,
    pid: Option<u32>,
    kill: CancellationToken,
    timeout: Option<Duration>,
) {
    let mut relay = OutputRelay::new(Arc::clone(&registry), job_id.clone(), &mut child);
    let deadline = tokio::time::sleep(timeout.unwrap_or(Duration::MAX));
    tokio::pin!(deadline);
    let mut killed = false;
    let mut timed_out = None;

    let exit = loop {
        tokio::select! {
            () = kill.cancelled(), if !killed => {
                killed = true;
                debug!(job_id = %job_id, "Killing training process");
                terminate(&job_id, &mut child, pid).await;
            }
            () = &mut deadline, if timeout.is_some() && !killed => {
                killed = true;
                timed_out = timeout;
                warn!(job_id = %job_id, "Training job timed out");
                terminate(&job_id, &mut child, pid).await;
            }
            line = next_line(&mut relay.stdout) => relay.on_stdout(line).await,
            line = next_line(&mut relay.stderr) => relay.on_stderr(line).await,
            status = child.wait() => {
                break match status {
                    Ok(status) => Exit::Status(status),
                    Err(e) => Exit::WaitFailed(e),
                };
            }
        }
    };

    if tokio::time::timeout(OUTPUT_DRAIN_GRACE, relay.drain()).await.is_err() {
        debug!(job_id = %job_id, "Output still open after exit, killing leftover processes");
        if let Some(pid) = pid
            && let Err(e) = kill_process_tree(pid).await
        {
            warn!(job_id = %job_id, pid, error = %e, "Failed to kill leftover processes");
        }
    }
    let mut parser = relay.parser;

    let (state, event) = match (exit, timed_out) {
        (Exit::Status(status), None) if status.success() => {
            let files = parser.take_processed_files();
            let event = ProgressEvent::new(job_id.clone(), EventKind::Completed, "Training completed successfully")
                .with_processed_files(files);
            (JobState::Completed, event)
        }
        (Exit::Status(_), Some(limit)) => {
            let msg = format!("Training timed out after {limit:?} and was terminated");
            (JobState::Errored, ProgressEvent::new(job_id.clone(), EventKind::Error, msg))
        }
        (Exit::Status(status), None) => {
            let msg = format!("Training process exited with {}", describe_exit(status));
            (JobState::Errored, ProgressEvent::new(job_id.clone(), EventKind::Error, msg))
        }
        (Exit::WaitFailed(e), _) => {
            let msg = format!("Failed to wait for training process: {e}");
            (JobState::Errored, ProgressEvent::new(job_id.clone(), EventKind::Error, msg))
        }
    };

    if registry.finish(&job_id, state, event).await {
        info!(job_id = %job_id, state = %state, "Training process finished");
    } else {
        debug!(job_id = %job_id, "Process exited after job was already finished");
    }
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }
    "unknown status".to_string()
}
