use crate::event::{EventKind, ProgressEvent};
use crate::job::{JobId, JobState};
use crate::registry::JobRegistry;
use crate::terminate::{executable_name, platform_terminator, ProcessTerminator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// How a cancellation request was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMethod {
    /// The job's own process handle was signalled.
    Handle,
    /// All processes sharing the backend executable name were swept.
    NameSweep,
    /// The job had already finished.
    AlreadyFinished,
    /// No such job.
    UnknownJob,
}

/// Result of `cancel_training`. `success` is always true; cancellation is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub success: bool,
    pub method: CancelMethod,
    /// True when termination could not be targeted at the job's own process.
    pub best_effort: bool,
}

impl CancelOutcome {
    fn new(method: CancelMethod) -> Self {
        Self { success: true, method, best_effort: method == CancelMethod::NameSweep }
    }
}

/// Best-effort termination of a job's process.
#[derive(Debug, Clone)]
pub struct CancellationController {
    registry: Arc<JobRegistry>,
    terminator: Arc<dyn ProcessTerminator>,
}

impl CancellationController {
    #[must_use]
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self::with_terminator(registry, platform_terminator())
    }

    #[must_use]
    pub fn with_terminator(registry: Arc<JobRegistry>, terminator: Arc<dyn ProcessTerminator>) -> Self {
        Self { registry, terminator }
    }

    /// Cancel a job. Emits `cancelled` for any active job and never fails.
    ///
    /// The job is moved to Cancelled before termination is attempted, so a process exit
    /// caused by the kill cannot be reported as an error. Termination is attempted once;
    /// the call does not wait for the process to exit.
    pub async fn cancel(&self, job_id: &JobId) -> CancelOutcome {
        let Some(handle) = self.registry.process_handle(job_id).await else {
            warn!(job_id = %job_id, "Cancel requested for unknown job");
            return CancelOutcome::new(CancelMethod::UnknownJob);
        };
        if handle.state.is_terminal() {
            return CancelOutcome::new(CancelMethod::AlreadyFinished);
        }

        let event = ProgressEvent::new(job_id.clone(), EventKind::Cancelled, "Training cancelled by user");
        if !self.registry.finish(job_id, JobState::Cancelled, event).await {
            return CancelOutcome::new(CancelMethod::AlreadyFinished);
        }

        // A pending job's process is killed by the supervisor once its spawn returns.
        let method = if handle.pid.is_some() || handle.state == JobState::Pending {
            handle.kill.cancel();
            CancelMethod::Handle
        } else {
            let executable = executable_name(&handle.program);
            warn!(
                job_id = %job_id,
                executable = %executable,
                strategy = self.terminator.name(),
                "No process handle tracked, sweeping by executable name"
            );
            // Wake the supervisor too in case its handle is still live.
            handle.kill.cancel();
            if let Err(e) = self.terminator.sweep(&executable).await {
                warn!(job_id = %job_id, error = %e, "Name sweep failed");
            }
            CancelMethod::NameSweep
        };

        info!(job_id = %job_id, method = ?method, "Training cancelled");
        CancelOutcome::new(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct RecordingTerminator {
        swept: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ProcessTerminator for RecordingTerminator {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn sweep(&self, executable: &str) -> std::io::Result<()> {
            self.swept.lock().unwrap().push(executable.to_string());
            if self.fail {
                return Err(std::io::Error::other("permission denied"));
            }
            Ok(())
        }
    }

    fn controller(fail: bool) -> (Arc<JobRegistry>, Arc<RecordingTerminator>, CancellationController) {
        let registry = Arc::new(JobRegistry::new());
        let terminator = Arc::new(RecordingTerminator { fail, ..Default::default() });
        let controller = CancellationController::with_terminator(Arc::clone(&registry), terminator.clone());
        (registry, terminator, controller)
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_succeeds() {
        let (_registry, terminator, controller) = controller(false);
        let outcome = controller.cancel(&JobId::from("missing")).await;
        assert!(outcome.success);
        assert_eq!(outcome.method, CancelMethod::UnknownJob);
        assert!(terminator.swept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_with_handle_signals_supervisor() {
        let (registry, terminator, controller) = controller(false);
        let reg = registry.register("/venv/bin/python", 0).await.unwrap();
        registry.mark_running(&reg.job_id, Some(99), Duration::from_secs(5)).await;

        let outcome = controller.cancel(&reg.job_id).await;
        assert_eq!(outcome, CancelOutcome { success: true, method: CancelMethod::Handle, best_effort: false });
        assert!(reg.kill.is_cancelled());
        assert!(terminator.swept.lock().unwrap().is_empty());

        let mut events = reg.events;
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Started);
        let last = events.recv().await.unwrap();
        assert_eq!(last.kind, EventKind::Cancelled);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_without_handle_sweeps_and_still_emits() {
        let (registry, terminator, controller) = controller(true);
        let reg = registry.register("/venv/bin/python", 0).await.unwrap();
        registry.mark_running(&reg.job_id, None, Duration::from_secs(5)).await;

        let outcome = controller.cancel(&reg.job_id).await;
        assert!(outcome.success);
        assert!(outcome.best_effort);
        assert_eq!(outcome.method, CancelMethod::NameSweep);
        assert_eq!(*terminator.swept.lock().unwrap(), vec!["python".to_string()]);

        let mut events = reg.events;
        events.recv().await.unwrap();
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_while_spawning_never_reports_started() {
        let (registry, terminator, controller) = controller(false);
        let reg = registry.register("/venv/bin/python", 0).await.unwrap();

        let outcome = controller.cancel(&reg.job_id).await;
        assert_eq!(outcome.method, CancelMethod::Handle);
        assert!(reg.kill.is_cancelled());
        assert!(terminator.swept.lock().unwrap().is_empty());

        // The spawn finishing afterwards must not revive the job.
        assert!(!registry.mark_running(&reg.job_id, Some(77), Duration::from_secs(5)).await);
        assert!(!registry.status(&reg.job_id).await.running);

        let mut events = reg.events;
        let only = events.recv().await.unwrap();
        assert_eq!(only.kind, EventKind::Cancelled);
        assert!(only.terminal);
        assert!(events.recv().await.is_none());
        assert_eq!(registry.snapshot(&reg.job_id).await.unwrap().state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_twice_reports_already_finished() {
        let (registry, _terminator, controller) = controller(false);
        let reg = registry.register("python", 0).await.unwrap();
        registry.mark_running(&reg.job_id, Some(1), Duration::from_secs(5)).await;

        controller.cancel(&reg.job_id).await;
        let second = controller.cancel(&reg.job_id).await;
        assert!(second.success);
        assert_eq!(second.method, CancelMethod::AlreadyFinished);
    }
}
