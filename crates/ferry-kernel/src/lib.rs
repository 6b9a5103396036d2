//! ferry-kernel: drive line-oriented REPLs as synchronous call targets.
//!
//! This crate provides:
//!
//! - **Transport**: spawns the interpreter with piped stdio
//! - **Readers**: drain stdout/stderr into queues, stripping prompt noise
//! - **Protocol**: sentinel-marker framing and call/response correlation
//! - **Classifier**: tells interpreter exceptions apart from stderr noise
//! - **Families**: Python, R and POSIX sh specifics
//! - **Session**: one interpreter, its variable cache and readiness state
//! - **Scheduler**: background jobs under a concurrency budget
//! - **State**: variable snapshots and codecs
//! - **Config / Paths**: TOML configuration and XDG paths

pub mod classifier;
pub mod config;
pub mod error;
pub mod family;
pub mod paths;
pub mod protocol;
pub mod reader;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod transport;

pub use classifier::{OutputClassifier, SignatureClassifier, Verdict};
pub use config::{FerryConfig, InterpreterConfig, SessionConfig};
pub use error::{ExecError, SchedulerError, SessionError, TransportError};
pub use family::{InterpreterFamily, InterpreterKind, family_for};
pub use protocol::{ChannelOptions, MarkerChannel};
pub use scheduler::JobScheduler;
pub use session::Session;
pub use state::{JsonCodec, SnapshotCodec, SnapshotStore, TomlCodec, VariableSnapshot};
pub use transport::{ProcessTransport, Transport, TransportStreams};

// Data types, for embedders that only depend on this crate.
pub use ferry_types::{
    CallSpec, ErrorKind, Failure, JobId, JobInfo, JobNotification, JobStatus, Value,
};

// XDG path primitives
pub use paths::{xdg_config_home, xdg_data_home};
