use crate::job::JobId;
use crate::registry::JobRegistry;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default spacing between heartbeat events.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Periodic liveness emitter bound to one running job.
///
/// Owned by the job's registry entry. [`HeartbeatMonitor::stop`] waits for the task to exit,
/// so once it returns no further heartbeat can reach the job's stream.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    job_id: JobId,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    pub(crate) fn spawn(registry: Weak<JobRegistry>, job_id: JobId, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_job_id = job_id.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        if !registry.record_heartbeat(&task_job_id).await {
                            break;
                        }
                    }
                }
            }
            debug!(job_id = %task_job_id, "Heartbeat stopped");
        });

        debug!(job_id = %job_id, period_secs = period.as_secs_f64(), "Heartbeat started");
        Self { job_id, cancel, handle: Some(handle) }
    }

    /// Stop the timer and wait until its task has finished.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(job_id = %self.job_id, error = %e, "Heartbeat task ended abnormally");
            }
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
