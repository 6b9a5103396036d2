//! Transports: how a session reaches its interpreter's three pipes.
//!
//! ```text
//!   Session ──write──▶ stdin  ┐
//!                             ├── child process (python3 -i, R, sh)
//!   reader  ◀──lines── stdout │
//!   reader  ◀──lines── stderr ┘
//! ```
//!
//! [`ProcessTransport`] spawns a real child. Tests can implement
//! [`Transport`] over in-memory duplex pipes instead.

mod process;

pub use process::{ProcessTransport, resolve_in_path};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;

/// Write half feeding the interpreter's stdin.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of stdout or stderr.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// The three streams of a started interpreter.
pub struct TransportStreams {
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
}

/// A way of starting (and forcibly stopping) an interpreter.
#[async_trait]
pub trait Transport: Send {
    /// Launch the interpreter and hand over its streams.
    ///
    /// Calling `start` on a transport that is already running replaces the
    /// previous child.
    async fn start(&mut self) -> Result<TransportStreams, TransportError>;

    /// Forcibly terminate the interpreter. No-op if it is not running.
    async fn kill(&mut self) -> Result<(), TransportError>;

    /// True while the interpreter process is still running.
    fn is_alive(&mut self) -> bool;

    /// Short description for logs (e.g. the command line).
    fn describe(&self) -> String;
}
