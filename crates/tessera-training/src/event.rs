use crate::job::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of events delivered on a job's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Progress,
    Error,
    Heartbeat,
    Completed,
    Cancelled,
}

impl EventKind {
    /// Whether this kind ends the job's stream.
    ///
    /// `Error` is terminal only when it reports the process exit; stderr diagnostics share
    /// the kind but not the role, so callers check [`ProgressEvent::terminal`] instead.
    #[must_use]
    pub fn always_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// A single immutable event relayed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Set on the final event of a job.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminal: bool,
    /// Files the backend reported as processed; only populated on `completed`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processed_files: Vec<String>,
}

impl ProgressEvent {
    #[must_use]
    pub fn new(job_id: JobId, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            job_id,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            terminal: kind.always_terminal(),
            processed_files: Vec::new(),
        }
    }

    #[must_use]
    pub fn into_terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    #[must_use]
    pub fn with_processed_files(mut self, files: Vec<String>) -> Self {
        self.processed_files = files;
        self
    }
}
