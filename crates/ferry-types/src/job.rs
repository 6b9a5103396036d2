//! Job identification, status and notification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Failure;
use crate::value::Value;

/// Unique identifier for a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a background job.
///
/// Transitions only `Running → Completed` or `Running → Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is currently running.
    Running,
    /// Job completed successfully.
    Completed,
    /// Job failed, was cancelled, or panicked.
    Failed,
}

impl JobStatus {
    /// True for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Snapshot of a job's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Job ID.
    pub id: JobId,
    /// Command description supplied at submission.
    pub command: String,
    /// Current status.
    pub status: JobStatus,
    /// Result value, once completed.
    pub result: Option<Value>,
    /// Failure, once failed.
    pub error: Option<Failure>,
    pub started_at: DateTime<Utc>,
    /// Set exactly once, when the job leaves `Running`.
    pub ended_at: Option<DateTime<Utc>>,
}

/// Published when a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobNotification {
    pub id: JobId,
    pub command: String,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<Failure>,
    pub ended_at: DateTime<Utc>,
}

impl JobNotification {
    /// Build the notification for a job that just left `Running`.
    ///
    /// Returns `None` if the job is still running.
    pub fn from_info(info: &JobInfo) -> Option<Self> {
        let ended_at = info.ended_at?;
        if !info.status.is_terminal() {
            return None;
        }
        Some(Self {
            id: info.id,
            command: info.command.clone(),
            status: info.status,
            result: info.result.clone(),
            error: info.error.clone(),
            ended_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn info(status: JobStatus, ended: bool) -> JobInfo {
        JobInfo {
            id: JobId(7),
            command: "eval 1 + 1".into(),
            status,
            result: None,
            error: None,
            started_at: Utc::now(),
            ended_at: ended.then(Utc::now),
        }
    }

    #[test]
    fn running_job_has_no_notification() {
        assert!(JobNotification::from_info(&info(JobStatus::Running, false)).is_none());
    }

    #[test]
    fn failed_job_notification_carries_error() {
        let mut failed = info(JobStatus::Failed, true);
        failed.error = Some(Failure::new(ErrorKind::Exception, "boom"));
        let note = JobNotification::from_info(&failed).unwrap();
        assert_eq!(note.id, JobId(7));
        assert_eq!(note.status, JobStatus::Failed);
        assert_eq!(note.error.unwrap().kind, ErrorKind::Exception);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
