//! Classification of backend output lines into progress events.

use crate::event::{EventKind, ProgressEvent};
use crate::job::JobId;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::trace;

/// Structured messages the backend scripts print, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendMessage {
    Progress {
        #[serde(default)]
        message: String,
        #[serde(default)]
        current: Option<u64>,
        #[serde(default)]
        total: Option<u64>,
    },
    FileProcessed {
        filename: String,
    },
    Summary {
        #[serde(default)]
        total_files: u64,
        #[serde(default)]
        processed: u64,
        #[serde(default)]
        skipped: u64,
        #[serde(default)]
        failed: u64,
        #[serde(default)]
        processed_files: Vec<String>,
    },
    Error {
        message: String,
    },
}

impl BackendMessage {
    /// Decode a line; `None` if it is not a well-formed structured message.
    #[must_use]
    pub fn decode(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }
}

/// Per-job stdout parser.
///
/// Keeps the processed-file tally so the list can be handed over once, when the job
/// completes, instead of on every event.
#[derive(Debug)]
pub struct ProgressStreamParser {
    job_id: JobId,
    processed_count: usize,
    processed_files: Vec<String>,
    seen: HashSet<String>,
}

impl ProgressStreamParser {
    #[must_use]
    pub fn new(job_id: JobId) -> Self {
        Self { job_id, processed_count: 0, processed_files: Vec::new(), seen: HashSet::new() }
    }

    /// Classify one output line. Blank lines yield nothing; every other line yields exactly
    /// one event.
    pub fn parse_line(&mut self, line: &str) -> Option<ProgressEvent> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        let Some(message) = BackendMessage::decode(line) else {
            trace!(job_id = %self.job_id, "Unstructured output line");
            return Some(self.event(EventKind::Progress, line));
        };

        let event = match message {
            BackendMessage::Progress { message, current: Some(current), total: Some(total) } => {
                self.event(EventKind::Progress, format!("[{current}/{total}] {message}"))
            }
            BackendMessage::Progress { message, .. } => self.event(EventKind::Progress, message),
            BackendMessage::FileProcessed { filename } => {
                self.processed_count += 1;
                let msg = format!("Processed {filename}");
                self.remember(filename);
                self.event(EventKind::Progress, msg)
            }
            BackendMessage::Summary { total_files, processed, skipped, failed, processed_files } => {
                for file in processed_files {
                    self.remember(file);
                }
                self.event(
                    EventKind::Progress,
                    format!(
                        "Summary: {processed}/{total_files} processed, {skipped} skipped, {failed} failed"
                    ),
                )
            }
            BackendMessage::Error { message } => self.event(EventKind::Error, message),
        };
        Some(event)
    }

    /// Number of `file_processed` messages seen so far.
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.processed_count
    }

    /// Hand over the accumulated file list, leaving the parser empty.
    pub fn take_processed_files(&mut self) -> Vec<String> {
        self.seen.clear();
        std::mem::take(&mut self.processed_files)
    }

    /// Append `filename` once, keeping first-seen order.
    fn remember(&mut self, filename: String) {
        if self.seen.insert(filename.clone()) {
            self.processed_files.push(filename);
        }
    }

    fn event(&self, kind: EventKind, message: impl Into<String>) -> ProgressEvent {
        ProgressEvent::new(self.job_id.clone(), kind, message)
    }
}
