// Job queue
//
// Jobs live in SQLite (`Store`). The `JobQueue` worker loop claims them in FIFO
// order and hands each one to the `Pipeline`, at most `concurrency` at a time.

pub mod pipeline;
pub mod store;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use pipeline::Pipeline;
pub use store::Store;
pub use worker::JobQueue;
use crate::error::SubforgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Transcribing,
    Translating,
    Done,
    Failed,
    Paused,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        Self::Queued,
        Self::Transcribing,
        Self::Translating,
        Self::Done,
        Self::Failed,
        Self::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Transcribing => "transcribing",
            Self::Translating => "translating",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// Done or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Owned by a worker right now
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Transcribing | Self::Translating)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SubforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| SubforgeError::Config(format!("Unknown job status: {}", s)))
    }
}

/// One video moving through transcription and translation
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub file_path: String,
    pub status: JobStatus,
    /// 0..=100
    pub progress: u8,
    /// Last progress line
    pub message: Option<String>,
    pub error_message: Option<String>,
    /// Times a worker has started this job
    pub attempts: u32,
    pub pause_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A failure recorded against a job; kept across retries
#[derive(Debug, Clone, Serialize)]
pub struct JobError {
    pub job_id: i64,
    pub attempt: u32,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Result of submitting a batch of paths
#[derive(Debug, Clone, Default)]
pub struct EnqueueOutcome {
    pub queued: Vec<i64>,
    /// Paths that already had a job
    pub skipped: Vec<PathBuf>,
}

/// Number of jobs per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub transcribing: usize,
    pub translating: usize,
    pub done: usize,
    pub failed: usize,
    pub paused: usize,
}

impl QueueCounts {
    pub fn add(&mut self, status: JobStatus, count: usize) {
        let slot = match status {
            JobStatus::Queued => &mut self.queued,
            JobStatus::Transcribing => &mut self.transcribing,
            JobStatus::Translating => &mut self.translating,
            JobStatus::Done => &mut self.done,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Paused => &mut self.paused,
        };
        *slot += count;
    }

    pub fn terminal(&self) -> usize {
        self.done + self.failed
    }

    pub fn in_flight(&self) -> usize {
        self.transcribing + self.translating
    }

    pub fn total(&self) -> usize {
        self.queued + self.in_flight() + self.terminal() + self.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!("done".parse::<JobStatus>().unwrap(), JobStatus::Done);
        assert_eq!(" Paused ".parse::<JobStatus>().unwrap(), JobStatus::Paused);
        assert!("finished".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_classes() {
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
        assert!(JobStatus::Translating.is_in_flight());
        assert!(!JobStatus::Queued.is_in_flight());
    }

    #[test]
    fn test_counts_totals() {
        let mut counts = QueueCounts::default();
        counts.add(JobStatus::Done, 2);
        counts.add(JobStatus::Failed, 1);
        counts.add(JobStatus::Transcribing, 1);
        assert_eq!(counts.terminal(), 3);
        assert_eq!(counts.in_flight(), 1);
        assert_eq!(counts.total(), 4);
    }
}
