//! The marker protocol: synchronous request/response over a REPL's pipes.
//!
//! A REPL has no framing of its own. Every request therefore ends with a
//! statement that prints `<sentinel>-<id>`, and the response is whatever
//! the stdout reader accumulated before that exact marker came back.
//!
//! ```text
//!   execute(code)
//!     │ id = next_id++          marker = SENTINEL-id
//!     │ drain stale frames      (left by an abandoned request)
//!     │ write frame(code, marker) ──▶ stdin
//!     ▼
//!   select! {
//!     results ─ Marker{marker == ours}  → done (empty output is a valid answer)
//!             ─ Marker{other}           → stale, discard
//!             ─ Closed                  → transport failure
//!     errors  ─ line                    → accumulate, classify the line; fatal ends early
//!     deadline                          → kill child, timeout
//!   }
//!     │ short trailing drain of stderr (stdout closing here → transport failure)
//!     ▼
//!   any fatal line? → Exception   else → trimmed output
//! ```
//!
//! The channel is not synchronized itself; callers hold it behind the
//! session's execution lock, which spans the whole round trip.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::classifier::{OutputClassifier, Verdict};
use crate::error::{ExecError, TransportError};
use crate::family::InterpreterFamily;
use crate::reader::{MarkerPattern, ResultFrame, spawn_error_reader, spawn_output_reader};
use crate::transport::{BoxedWriter, Transport, TransportStreams};

/// Default execution deadline.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default window for stderr lines that trail the marker.
pub const DEFAULT_TRAILING_DRAIN: Duration = Duration::from_millis(30);

/// Timing knobs for one channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    /// Deadline for the marker to come back.
    pub timeout: Duration,
    /// How long to keep collecting stderr after the marker (or after a
    /// fatal line, to gather the rest of a traceback).
    pub trailing_drain: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_EXECUTION_TIMEOUT,
            trailing_drain: DEFAULT_TRAILING_DRAIN,
        }
    }
}

/// State of the one request currently in flight.
#[derive(Debug)]
pub struct PendingExecution {
    pub id: u64,
    pub marker: String,
    pub output: String,
    pub errors: String,
    /// Set once any stderr line classified as fatal.
    pub fatal: bool,
    pub complete: bool,
}

impl PendingExecution {
    fn new(id: u64, marker: String) -> Self {
        Self {
            id,
            marker,
            output: String::new(),
            errors: String::new(),
            fatal: false,
            complete: false,
        }
    }

    /// Append a stderr line and classify it on its own. Returns true when
    /// this line is fatal.
    fn push_error(&mut self, line: &str, classifier: &dyn OutputClassifier) -> bool {
        self.errors.push_str(line);
        self.errors.push('\n');
        let fatal = classifier.classify(line) == Verdict::Fatal;
        self.fatal |= fatal;
        fatal
    }
}

/// One interpreter's request/response channel.
pub struct MarkerChannel {
    family: Arc<dyn InterpreterFamily>,
    classifier: Arc<dyn OutputClassifier>,
    pattern: MarkerPattern,
    options: ChannelOptions,
    stdin: BoxedWriter,
    results: mpsc::UnboundedReceiver<ResultFrame>,
    errors: mpsc::UnboundedReceiver<String>,
    errors_open: bool,
    closed: bool,
    next_id: AtomicU64,
    readers: Vec<JoinHandle<()>>,
}

impl MarkerChannel {
    /// Attach to freshly started streams and spawn both readers.
    pub fn attach(
        streams: TransportStreams,
        family: Arc<dyn InterpreterFamily>,
        classifier: Arc<dyn OutputClassifier>,
        options: ChannelOptions,
    ) -> Self {
        let pattern = MarkerPattern::new(family.sentinel());
        let (result_tx, results) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();

        let readers = vec![
            spawn_output_reader(streams.stdout, pattern.clone(), family.stdout_filter(), result_tx),
            spawn_error_reader(streams.stderr, family.stderr_filter(), error_tx),
        ];

        Self {
            family,
            classifier,
            pattern,
            options,
            stdin: streams.stdin,
            results,
            errors,
            errors_open: true,
            closed: false,
            next_id: AtomicU64::new(1),
            readers,
        }
    }

    pub fn options(&self) -> ChannelOptions {
        self.options
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.options.timeout = timeout;
    }

    /// Id the next request will use.
    pub fn next_execution_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// False once stdout has closed.
    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Run one round trip.
    ///
    /// `transport` is only touched on timeout, to kill the child.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = %self.family.kind(), execution_id))]
    pub async fn execute(
        &mut self,
        code: &str,
        transport: &mut dyn Transport,
    ) -> Result<String, ExecError> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::Span::current().record("execution_id", id);
        let mut pending = PendingExecution::new(id, self.pattern.marker(id));

        self.drain_stale()?;

        let payload = self.family.frame(code, &pending.marker);
        let deadline = Instant::now() + self.options.timeout;

        match tokio::time::timeout_at(deadline, self.write(&payload)).await {
            Ok(result) => result?,
            Err(_) => return Err(self.time_out(&pending, transport).await),
        }

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        while !pending.complete {
            tokio::select! {
                biased;

                frame = self.results.recv() => match frame {
                    Some(ResultFrame::Marker { marker, output }) if marker == pending.marker => {
                        pending.output = output;
                        pending.complete = true;
                    }
                    Some(ResultFrame::Marker { marker, .. }) => {
                        tracing::debug!(%marker, "discarding stale result frame");
                    }
                    Some(ResultFrame::Closed { .. }) | None => {
                        self.closed = true;
                        return Err(TransportError::Closed.into());
                    }
                },

                line = self.errors.recv(), if self.errors_open => match line {
                    Some(line) => {
                        if pending.push_error(&line, self.classifier.as_ref()) {
                            break;
                        }
                    }
                    None => self.errors_open = false,
                },

                _ = &mut sleep => {
                    return Err(self.time_out(&pending, transport).await);
                }
            }
        }

        // Only an early fatal line leaves the marker outstanding
        let watch_results = !pending.complete;
        self.drain_trailing(&mut pending, watch_results).await;

        if self.closed {
            tracing::warn!(
                execution_id = id,
                stderr = %pending.errors.trim_end(),
                "interpreter output closed after a fatal error"
            );
            return Err(TransportError::Closed.into());
        }

        if pending.fatal {
            tracing::warn!(
                execution_id = id,
                family = self.classifier.family(),
                "interpreter raised an exception"
            );
            return Err(ExecError::Exception {
                text: pending.errors.trim_end().to_string(),
            });
        }

        if !pending.errors.trim().is_empty() {
            tracing::debug!(execution_id = id, stderr = %pending.errors.trim_end(), "discarding benign stderr");
        }

        Ok(pending.output.trim().to_string())
    }

    async fn write(&mut self, payload: &str) -> Result<(), ExecError> {
        self.stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(TransportError::Write)?;
        self.stdin.flush().await.map_err(TransportError::Write)?;
        Ok(())
    }

    /// Throw away anything an abandoned request left on the queues.
    fn drain_stale(&mut self) -> Result<(), ExecError> {
        let mut dropped = 0usize;
        while let Ok(frame) = self.results.try_recv() {
            if let ResultFrame::Closed { .. } = frame {
                self.closed = true;
                return Err(TransportError::Closed.into());
            }
            dropped += 1;
        }
        loop {
            match self.errors.try_recv() {
                Ok(_) => dropped += 1,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.errors_open = false;
                    break;
                }
            }
        }
        if dropped > 0 {
            tracing::debug!(dropped, "drained stale queue entries");
        }
        Ok(())
    }

    /// Collect stderr lines that arrive shortly after the marker.
    ///
    /// After an early fatal line the marker is still on its way; accept it
    /// here so it does not linger as a stale frame. Stdout closing instead
    /// marks the channel closed.
    async fn drain_trailing(&mut self, pending: &mut PendingExecution, watch_results: bool) {
        let until = Instant::now() + self.options.trailing_drain;
        loop {
            tokio::select! {
                biased;

                frame = self.results.recv(), if watch_results && !pending.complete => match frame {
                    Some(ResultFrame::Marker { marker, output }) if marker == pending.marker => {
                        pending.output = output;
                        pending.complete = true;
                    }
                    Some(ResultFrame::Marker { .. }) => {}
                    Some(ResultFrame::Closed { .. }) | None => {
                        self.closed = true;
                        pending.complete = true;
                    }
                },

                line = self.errors.recv(), if self.errors_open => match line {
                    Some(line) => {
                        pending.push_error(&line, self.classifier.as_ref());
                    }
                    None => self.errors_open = false,
                },

                _ = tokio::time::sleep_until(until) => break,
            }
        }
    }

    async fn time_out(&mut self, pending: &PendingExecution, transport: &mut dyn Transport) -> ExecError {
        tracing::warn!(
            execution_id = pending.id,
            timeout_ms = self.options.timeout.as_millis() as u64,
            transport = %transport.describe(),
            "execution timed out, killing interpreter"
        );
        if let Err(e) = transport.kill().await {
            tracing::warn!(error = %e, "failed to kill interpreter after timeout");
        }
        self.closed = true;

        let mut stderr = pending.errors.clone();
        while let Ok(line) = self.errors.try_recv() {
            stderr.push_str(&line);
            stderr.push('\n');
        }
        ExecError::Timeout {
            timeout: self.options.timeout,
            stderr,
        }
    }
}

impl Drop for MarkerChannel {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}
