//! The job table behind [`JobScheduler`](super::JobScheduler).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ferry_types::{Failure, JobId, JobInfo, JobNotification, JobStatus, Value};

/// A tracked job.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    info: JobInfo,
}

impl Job {
    pub(crate) fn new(id: JobId, command: String) -> Self {
        Self {
            info: JobInfo {
                id,
                command,
                status: JobStatus::Running,
                result: None,
                error: None,
                started_at: Utc::now(),
                ended_at: None,
            },
        }
    }

    pub(crate) fn info(&self) -> &JobInfo {
        &self.info
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.info.status
    }

    /// Leave `Running`. Returns the notification to publish, or `None` if
    /// the job had already finished (a late result after cancellation).
    pub(crate) fn finish(&mut self, outcome: Result<Value, Failure>) -> Option<JobNotification> {
        if self.info.status.is_terminal() {
            return None;
        }
        match outcome {
            Ok(value) => {
                self.info.status = JobStatus::Completed;
                self.info.result = Some(value);
            }
            Err(failure) => {
                self.info.status = JobStatus::Failed;
                self.info.error = Some(failure);
            }
        }
        self.info.ended_at = Some(Utc::now());
        JobNotification::from_info(&self.info)
    }

    /// Terminal and ended at or before `cutoff`.
    pub(crate) fn ended_by(&self, cutoff: DateTime<Utc>) -> bool {
        self.info.status.is_terminal() && self.info.ended_at.is_some_and(|t| t <= cutoff)
    }
}

/// All jobs plus the count of admitted workers that have not returned.
#[derive(Debug, Default)]
pub(crate) struct JobTable {
    pub(crate) jobs: HashMap<JobId, Job>,
    /// Workers still executing. A cancelled job keeps its slot until its
    /// future actually finishes.
    pub(crate) active: usize,
}

impl JobTable {
    pub(crate) fn list(&self) -> Vec<JobInfo> {
        let mut infos: Vec<JobInfo> = self.jobs.values().map(|j| j.info().clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Drop terminal jobs that ended at or before `cutoff`.
    pub(crate) fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.ended_by(cutoff));
        before - self.jobs.len()
    }
}
