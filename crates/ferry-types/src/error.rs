//! Machine-readable failure kinds shared by sessions and the job scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What went wrong, independent of the human-readable message.
///
/// `Transport` and `Timeout` invalidate the session that produced them;
/// the rest leave it usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The child process could not be started, written to, or exited.
    Transport,
    /// No marker arrived before the execution deadline.
    Timeout,
    /// The interpreter raised an exception or reported a syntax error.
    Exception,
    /// The scheduler had no free slot or was shutting down.
    Capacity,
    /// A job was cancelled.
    Cancelled,
    /// The session is not initialized (or was invalidated).
    NotReady,
    /// The interpreter binary could not be found.
    Unavailable,
    /// A caller-supplied argument was rejected before reaching the interpreter.
    Invalid,
}

impl ErrorKind {
    /// True when a session that produced this error must be restarted.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Exception => "exception",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure flattened to kind + text, suitable for storing in job records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {}
