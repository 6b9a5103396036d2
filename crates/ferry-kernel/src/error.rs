//! Error taxonomy for transports, round trips and sessions.
//!
//! Every error maps onto a [`ErrorKind`] so callers can branch on the
//! machine-readable kind while showing `Display` text to humans.

use std::time::Duration;

use ferry_types::{ErrorKind, Failure};
use thiserror::Error;

/// Failures talking to the child process itself.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The interpreter binary is not on PATH.
    #[error("{program}: not found on PATH")]
    NotFound { program: String },

    /// The OS refused to start the process.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A pipe was not captured at spawn time.
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),

    /// Writing code to the interpreter's stdin failed.
    #[error("write to interpreter stdin failed: {0}")]
    Write(#[source] std::io::Error),

    /// The output stream reached end-of-file.
    #[error("interpreter output stream closed (process exited?)")]
    Closed,

    #[error("failed to kill interpreter: {0}")]
    Kill(#[source] std::io::Error),
}

/// Outcome of a single failed round trip.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No marker before the deadline. The child has been killed.
    #[error("execution timed out after {}ms{}", .timeout.as_millis(), stderr_suffix(.stderr))]
    Timeout { timeout: Duration, stderr: String },

    /// The classifier recognized an exception signature on stderr.
    #[error("interpreter raised an exception:\n{text}")]
    Exception { text: String },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{trimmed}")
    }
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Transport(_) => ErrorKind::Transport,
            ExecError::Timeout { .. } => ErrorKind::Timeout,
            ExecError::Exception { .. } => ErrorKind::Exception,
        }
    }
}

/// Errors surfaced by [`crate::Session`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Not initialized, or invalidated by a timeout/transport failure.
    #[error("{kind} session is not ready")]
    NotReady { kind: String },

    /// The interpreter binary was not found when the session was created.
    #[error("{program} is not available on this system")]
    Unavailable { program: String },

    /// A variable or function name the family refuses to interpolate.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// The interpreter answered, but not in a form that could be decoded.
    #[error("could not decode interpreter output: {0}")]
    Decode(String),

    /// A snapshot taken from a different interpreter kind.
    #[error("snapshot belongs to a {found} session, not {expected}")]
    SnapshotMismatch { expected: String, found: String },
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Exec(ExecError::Transport(err))
    }
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Exec(e) => e.kind(),
            SessionError::NotReady { .. } => ErrorKind::NotReady,
            SessionError::Unavailable { .. } => ErrorKind::Unavailable,
            SessionError::InvalidName(_)
            | SessionError::Decode(_)
            | SessionError::SnapshotMismatch { .. } => ErrorKind::Invalid,
        }
    }

    /// Flatten into a storable [`Failure`].
    pub fn to_failure(&self) -> Failure {
        Failure::new(self.kind(), self.to_string())
    }
}

impl From<SessionError> for Failure {
    fn from(err: SessionError) -> Self {
        err.to_failure()
    }
}

/// Errors surfaced by [`crate::scheduler::JobScheduler`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Every concurrency slot is taken. Never queued.
    #[error("no free job slot (limit {limit})")]
    Capacity { limit: usize },

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Capacity { .. } | SchedulerError::ShuttingDown => ErrorKind::Capacity,
        }
    }
}
