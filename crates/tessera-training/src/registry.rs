//! Owned table of active and recently finished jobs.
//!
//! Every state change happens under the registry lock, so exactly one caller wins a
//! terminal transition. Only the winner tears down the heartbeat and emits the final event,
//! after which the job's event channel is closed.

use crate::error::{TrainingError, TrainingResult};
use crate::event::{EventKind, ProgressEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::job::{JobId, JobSnapshot, JobState, JobStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Receiving side of a job's event stream; yields `None` once the terminal event was read.
pub type JobEvents = mpsc::UnboundedReceiver<ProgressEvent>;

struct JobEntry {
    state: JobState,
    created_at: DateTime<Utc>,
    last_heartbeat: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    pid: Option<u32>,
    program: String,
    processed_file_count: usize,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
    heartbeat: Option<HeartbeatMonitor>,
    kill: CancellationToken,
}

impl JobEntry {
    fn snapshot(&self, job_id: &JobId) -> JobSnapshot {
        JobSnapshot {
            job_id: job_id.clone(),
            state: self.state,
            created_at: self.created_at,
            last_heartbeat: self.last_heartbeat,
            finished_at: self.finished_at,
            pid: self.pid,
            program: self.program.clone(),
            processed_file_count: self.processed_file_count,
        }
    }
}

/// What the cancellation controller needs to terminate a job's process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub state: JobState,
    pub pid: Option<u32>,
    pub program: String,
    pub kill: CancellationToken,
}

/// A freshly registered, still pending job.
#[derive(Debug)]
pub struct Registration {
    pub job_id: JobId,
    pub events: JobEvents,
    pub kill: CancellationToken,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_count", &self.jobs.try_lock().map(|j| j.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending job with a fresh id.
    ///
    /// `limit` bounds the number of pending plus running jobs; `0` means unbounded.
    pub async fn register(&self, program: &str, limit: usize) -> TrainingResult<Registration> {
        let mut jobs = self.jobs.lock().await;
        if limit > 0 {
            let active = jobs.values().filter(|j| !j.state.is_terminal()).count();
            if active >= limit {
                return Err(TrainingError::TooManyJobs { limit });
            }
        }

        let mut job_id = JobId::generate();
        while jobs.contains_key(&job_id) {
            job_id = JobId::generate();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();
        jobs.insert(
            job_id.clone(),
            JobEntry {
                state: JobState::Pending,
                created_at: Utc::now(),
                last_heartbeat: None,
                finished_at: None,
                pid: None,
                program: program.to_string(),
                processed_file_count: 0,
                events: Some(tx),
                heartbeat: None,
                kill: kill.clone(),
            },
        );
        debug!(job_id = %job_id, program = %program, "Registered job");
        Ok(Registration { job_id, events: rx, kill })
    }

    /// Move a pending job to Running, start its heartbeat and emit `started`.
    ///
    /// Returns `false` if the job is no longer pending (for example it was cancelled while
    /// the process was being spawned).
    pub async fn mark_running(
        self: &Arc<Self>,
        job_id: &JobId,
        pid: Option<u32>,
        heartbeat_interval: Duration,
    ) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            return false;
        };
        if !entry.state.can_transition_to(JobState::Running) {
            warn!(job_id = %job_id, state = %entry.state, "Cannot mark job running");
            return false;
        }

        entry.state = JobState::Running;
        entry.pid = pid;
        entry.heartbeat =
            Some(HeartbeatMonitor::spawn(Arc::downgrade(self), job_id.clone(), heartbeat_interval));

        let message = match pid {
            Some(pid) => format!("Training started (pid {pid})"),
            None => "Training started".to_string(),
        };
        if let Some(tx) = &entry.events {
            let _ = tx.send(ProgressEvent::new(job_id.clone(), EventKind::Started, message));
        }
        debug!(job_id = %job_id, pid = ?pid, "Job running");
        true
    }

    /// Drop a job whose process never started.
    pub async fn discard_pending(&self, job_id: &JobId) {
        let mut jobs = self.jobs.lock().await;
        if jobs.get(job_id).is_some_and(|j| j.state == JobState::Pending) {
            jobs.remove(job_id);
            debug!(job_id = %job_id, "Discarded pending job");
        }
    }

    /// Deliver a non-terminal event. Dropped silently once the job has finished.
    pub async fn emit(&self, event: ProgressEvent) {
        let jobs = self.jobs.lock().await;
        if let Some(tx) = jobs.get(&event.job_id).and_then(|j| j.events.as_ref()) {
            let _ = tx.send(event);
        }
    }

    /// Record a heartbeat and emit it; returns `false` when the job is not running.
    pub async fn record_heartbeat(&self, job_id: &JobId) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            return false;
        };
        if entry.state != JobState::Running || entry.events.is_none() {
            return false;
        }
        let event = ProgressEvent::new(job_id.clone(), EventKind::Heartbeat, "Training is running");
        entry.last_heartbeat = Some(event.timestamp);
        if let Some(tx) = &entry.events {
            let _ = tx.send(event);
        }
        true
    }

    pub async fn set_processed_count(&self, job_id: &JobId, count: usize) {
        if let Some(entry) = self.jobs.lock().await.get_mut(job_id) {
            entry.processed_file_count = count;
        }
    }

    /// Drive a job to a terminal state.
    ///
    /// The heartbeat is stopped before `event` is sent, and the event channel is closed
    /// afterwards. Returns `false` if another transition already finished the job.
    pub async fn finish(&self, job_id: &JobId, to: JobState, event: ProgressEvent) -> bool {
        debug_assert!(to.is_terminal());
        let (heartbeat, tx) = {
            let mut jobs = self.jobs.lock().await;
            let Some(entry) = jobs.get_mut(job_id) else {
                return false;
            };
            if !entry.state.can_transition_to(to) {
                debug!(job_id = %job_id, from = %entry.state, to = %to, "Ignoring transition");
                return false;
            }
            entry.state = to;
            entry.finished_at = Some(Utc::now());
            (entry.heartbeat.take(), entry.events.take())
        };

        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }
        if let Some(tx) = tx {
            let _ = tx.send(event.into_terminal());
        }
        debug!(job_id = %job_id, state = %to, "Job finished");
        true
    }

    pub async fn process_handle(&self, job_id: &JobId) -> Option<ProcessHandle> {
        let jobs = self.jobs.lock().await;
        jobs.get(job_id).map(|entry| ProcessHandle {
            state: entry.state,
            pid: entry.pid,
            program: entry.program.clone(),
            kill: entry.kill.clone(),
        })
    }

    pub async fn status(&self, job_id: &JobId) -> JobStatus {
        let jobs = self.jobs.lock().await;
        match jobs.get(job_id) {
            Some(entry) => JobStatus { exists: true, running: entry.state == JobState::Running },
            None => JobStatus { exists: false, running: false },
        }
    }

    pub async fn snapshot(&self, job_id: &JobId) -> Option<JobSnapshot> {
        self.jobs.lock().await.get(job_id).map(|entry| entry.snapshot(job_id))
    }

    /// All tracked jobs, oldest first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.lock().await;
        let mut out: Vec<_> = jobs.iter().map(|(id, entry)| entry.snapshot(id)).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.job_id.cmp(&b.job_id)));
        out
    }

    pub async fn active_count(&self) -> usize {
        self.jobs.lock().await.values().filter(|j| !j.state.is_terminal()).count()
    }

    /// Forget a finished job. Active jobs are never removed.
    pub async fn remove(&self, job_id: &JobId) -> bool {
        let mut jobs = self.jobs.lock().await;
        if jobs.get(job_id).is_some_and(|j| j.state.is_terminal()) {
            jobs.remove(job_id);
            return true;
        }
        false
    }

    /// Remove finished jobs that ended more than `max_age` ago; returns how many were removed.
    pub async fn prune_finished(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, entry| {
            !(entry.state.is_terminal() && entry.finished_at.is_some_and(|at| at <= cutoff))
        });
        before - jobs.len()
    }
}
