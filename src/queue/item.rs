//! Job identity, status and record types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier, unique per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Mints a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the FIFO.
    Pending,
    /// Dispatched and running its strategy chain.
    Downloading,
    /// Delivered successfully.
    Completed,
    /// Every strategy failed.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl JobStatus {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the job has reached an end state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid job status: {s}")),
        }
    }
}

/// A single delivery request tracked by the queue.
///
/// Returned to callers as a clone; mutating a returned value has no effect on
/// the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Unique identifier.
    pub id: JobId,
    /// Display title, trimmed.
    pub title: String,
    /// Free-form category tag (`movie`, `series`, ...).
    pub category: String,
    /// Validated source locator.
    pub locator: String,
    /// Filesystem-safe filename derived from title and locator.
    pub filename: String,
    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,
    /// Current state.
    pub status: JobStatus,
    /// Completion percentage, 0..=100.
    pub progress: u8,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// When the current attempt was dispatched.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Where the file was written, once completed.
    pub saved_path: Option<String>,
    /// Name of the strategy that delivered the file.
    pub delivered_via: Option<String>,
}

impl DownloadJob {
    /// Creates a pending job.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        category: impl Into<String>,
        locator: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            title: title.into(),
            category: category.into(),
            locator: locator.into(),
            filename: filename.into(),
            submitted_at: Utc::now(),
            status: JobStatus::Pending,
            progress: 0,
            last_error: None,
            started_at: None,
            finished_at: None,
            saved_path: None,
            delivered_via: None,
        }
    }

    /// Puts the job back to `pending` with its attempt state cleared.
    pub(crate) fn reset_for_retry(&mut self) {
        self.status = JobStatus::Pending;
        self.progress = 0;
        self.last_error = None;
        self.started_at = None;
        self.finished_at = None;
        self.saved_path = None;
        self.delivered_via = None;
    }

    /// Whether the job is terminal and finished before `cutoff`.
    #[must_use]
    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_terminal() && self.finished_at.is_some_and(|at| at < cutoff)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Downloading,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("in_progress".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Downloading.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_ids_are_unique_and_parse() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<JobId>().unwrap(), a);
    }

    #[test]
    fn test_reset_for_retry_clears_attempt_state() {
        let mut job = DownloadJob::new("t", "movie", "https://a.test/v.mp4", "t.mp4");
        job.status = JobStatus::Failed;
        job.progress = 40;
        job.last_error = Some("boom".to_string());
        job.started_at = Some(Utc::now());
        job.finished_at = Some(Utc::now());
        job.reset_for_retry();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.last_error.is_none());
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_finished_before_requires_terminal() {
        let mut job = DownloadJob::new("t", "movie", "https://a.test/v.mp4", "t.mp4");
        let later = Utc::now() + chrono::Duration::seconds(10);
        job.finished_at = Some(Utc::now());
        assert!(!job.finished_before(later));
        job.status = JobStatus::Completed;
        assert!(job.finished_before(later));
    }

    #[test]
    fn test_job_serializes_status_snake_case() {
        let job = DownloadJob::new("t", "movie", "https://a.test/v.mp4", "t.mp4");
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        let back: DownloadJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }
}
