//! Background job scheduler.
//!
//! Runs futures (typically calls into a [`Session`](crate::Session)) on
//! tokio tasks under a concurrency budget.
//!
//! - Admission never waits: with every slot taken, [`JobScheduler::submit`]
//!   fails at once with [`SchedulerError::Capacity`].
//! - A job goes `Running → Completed | Failed` exactly once; the end time
//!   is stamped at that transition and a [`JobNotification`] is published.
//! - Notifications use a bounded queue with `try_send`. When nobody drains
//!   it and it fills up, further notifications are dropped.
//! - Cancellation is advisory. The job is marked failed immediately, but
//!   its future keeps running (interpreter code cannot be interrupted
//!   without killing the session) and its eventual result is discarded.
//! - [`JobScheduler::shutdown`] stops admission and waits for every worker.

mod job;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use ferry_types::{ErrorKind, Failure, JobId, JobInfo, JobNotification, JobStatus, Value};
use tokio::sync::{Notify, mpsc};
use tokio_util::task::TaskTracker;

use crate::config::FerryConfig;
use crate::error::SchedulerError;
use job::{Job, JobTable};

/// Default number of jobs allowed to run at once.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Default capacity of the notification queue.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

struct Inner {
    next_id: AtomicU64,
    table: Mutex<JobTable>,
    limit: AtomicUsize,
    shutting_down: AtomicBool,
    tracker: TaskTracker,
    notify_tx: Mutex<Option<mpsc::Sender<JobNotification>>>,
    notify_rx: Mutex<Option<mpsc::Receiver<JobNotification>>>,
    completed: Notify,
}

/// Bounded-concurrency scheduler for background jobs. Cheap to clone.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(limit: usize, notification_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(notification_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                table: Mutex::new(JobTable::default()),
                limit: AtomicUsize::new(limit),
                shutting_down: AtomicBool::new(false),
                tracker: TaskTracker::new(),
                notify_tx: Mutex::new(Some(tx)),
                notify_rx: Mutex::new(Some(rx)),
                completed: Notify::new(),
            }),
        }
    }

    pub fn from_config(config: &FerryConfig) -> Self {
        Self::new(config.max_concurrent_jobs, config.notification_capacity)
    }

    /// Admit `future` as a background job labelled `command`.
    ///
    /// Fails immediately, without queueing, when the limit is reached or
    /// the scheduler is shutting down.
    #[tracing::instrument(level = "debug", skip(self, command, future), fields(job_id))]
    pub fn submit<F, E>(&self, command: impl Into<String>, future: F) -> Result<JobId, SchedulerError>
    where
        F: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<Failure> + Send + 'static,
    {
        let command = command.into();
        let mut table = self.table();
        // Admission and spawn both happen under the table lock, so shutdown
        // either refuses this job or finds it on the tracker
        if self.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        let limit = self.concurrency_limit();
        if table.active >= limit {
            tracing::debug!(limit, "job rejected, no free slot");
            return Err(SchedulerError::Capacity { limit });
        }
        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        table.jobs.insert(id, Job::new(id, command.clone()));
        table.active += 1;

        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            let outcome = match tokio::spawn(future).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.into()),
                Err(join) => Err(Failure::new(
                    ErrorKind::Exception,
                    format!("job panicked: {join}"),
                )),
            };
            inner.complete(id, outcome);
        });
        drop(table);

        tracing::Span::current().record("job_id", id.0);
        tracing::info!(job_id = id.0, %command, "job admitted");

        Ok(id)
    }

    /// Take the notification receiver. Only the first call gets it.
    pub fn subscribe(&self) -> Option<mpsc::Receiver<JobNotification>> {
        lock(&self.inner.notify_rx).take()
    }

    /// Mark a running job failed with [`ErrorKind::Cancelled`].
    ///
    /// Returns false if the job is unknown or already terminal. The future
    /// itself is not stopped.
    #[tracing::instrument(level = "debug", skip(self), fields(job_id = id.0))]
    pub fn cancel_job(&self, id: JobId) -> bool {
        {
            let mut table = self.table();
            let Some(job) = table.jobs.get_mut(&id) else {
                return false;
            };
            let Some(note) = job.finish(Err(Failure::new(ErrorKind::Cancelled, "job cancelled")))
            else {
                return false;
            };
            tracing::info!(job_id = id.0, "job cancelled");
            self.inner.publish(note);
        }
        self.inner.completed.notify_waiters();
        true
    }

    /// Stop admitting jobs and wait for every admitted worker to finish,
    /// then close the notification queue.
    pub async fn shutdown(&self) {
        {
            let _table = self.table();
            self.inner.shutting_down.store(true, Ordering::SeqCst);
            self.inner.tracker.close();
        }
        tracing::info!(running = self.running_count(), "scheduler shutting down");
        self.inner.tracker.wait().await;
        lock(&self.inner.notify_tx).take();
        tracing::info!("scheduler stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Change the limit for future admissions. Running jobs are unaffected.
    pub fn set_concurrency_limit(&self, limit: usize) {
        self.inner.limit.store(limit, Ordering::SeqCst);
    }

    pub fn concurrency_limit(&self) -> usize {
        self.inner.limit.load(Ordering::SeqCst)
    }

    /// Admitted workers that have not returned yet.
    pub fn running_count(&self) -> usize {
        self.table().active
    }

    /// Forget terminal jobs that ended more than `older_than` ago.
    pub fn clean_completed_jobs(&self, older_than: Duration) -> usize {
        let age = TimeDelta::from_std(older_than).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let removed = self.table().prune(cutoff);
        if removed > 0 {
            tracing::debug!(removed, "pruned finished jobs");
        }
        removed
    }

    pub fn get_job_status(&self, id: JobId) -> Option<JobStatus> {
        self.table().jobs.get(&id).map(|j| j.status())
    }

    pub fn get_job(&self, id: JobId) -> Option<JobInfo> {
        self.table().jobs.get(&id).map(|j| j.info().clone())
    }

    /// All tracked jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.table().list()
    }

    /// Wait until a job is terminal. `None` if the id is unknown.
    pub async fn wait(&self, id: JobId) -> Option<JobInfo> {
        loop {
            let notified = self.inner.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.get_job(id) {
                None => return None,
                Some(info) if info.status.is_terminal() => return Some(info),
                Some(_) => {}
            }
            notified.await;
        }
    }

    fn table(&self) -> MutexGuard<'_, JobTable> {
        lock(&self.inner.table)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY_LIMIT, DEFAULT_NOTIFICATION_CAPACITY)
    }
}

impl Inner {
    fn complete(&self, id: JobId, outcome: Result<Value, Failure>) {
        {
            // Published under the table lock: anyone who sees the terminal
            // status can already receive its notification.
            let mut table = lock(&self.table);
            table.active = table.active.saturating_sub(1);
            match table.jobs.get_mut(&id).and_then(|job| job.finish(outcome)) {
                Some(note) => {
                    tracing::debug!(job_id = id.0, status = %note.status, "job finished");
                    self.publish(note);
                }
                None => tracing::debug!(job_id = id.0, "discarding result of finished job"),
            }
        }
        self.completed.notify_waiters();
    }

    fn publish(&self, note: JobNotification) {
        let guard = lock(&self.notify_tx);
        let Some(tx) = guard.as_ref() else {
            tracing::debug!(job_id = note.id.0, "notification queue closed, dropping");
            return;
        };
        if let Err(e) = tx.try_send(note) {
            match e {
                mpsc::error::TrySendError::Full(note) => {
                    tracing::debug!(job_id = note.id.0, "notification queue full, dropping")
                }
                mpsc::error::TrySendError::Closed(note) => {
                    tracing::debug!(job_id = note.id.0, "notification receiver gone, dropping")
                }
            }
        }
    }
}

/// A panicking job body never holds these locks, so poison is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
