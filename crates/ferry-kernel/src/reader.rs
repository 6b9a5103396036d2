//! Stream readers: the two long-lived tasks that drain stdout and stderr.
//!
//! Readers never talk to callers directly. They turn raw bytes into lines,
//! strip REPL prompt and banner noise, and push onto two queues the
//! [`MarkerChannel`](crate::protocol::MarkerChannel) waits on:
//!
//! ```text
//!   stdout ──▶ output reader ──▶ ResultFrame::Marker { marker, output } ──▶ results
//!   stderr ──▶ error reader  ──▶ one String per non-empty line          ──▶ errors
//! ```
//!
//! Each terminator frame carries the marker it was cut at, so a frame left
//! over from an abandoned request can never be mistaken for the current one.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::transport::BoxedReader;

/// What the output reader emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultFrame {
    /// A marker line was seen; `output` is everything since the previous one.
    Marker { marker: String, output: String },
    /// stdout reached end-of-file. `output` holds any unterminated text.
    Closed { output: String },
}

/// Recognizes `<sentinel>-<digits>` at the end of a line.
#[derive(Debug, Clone)]
pub struct MarkerPattern {
    sentinel: String,
}

impl MarkerPattern {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Marker string for an execution id.
    pub fn marker(&self, id: u64) -> String {
        format!("{}-{}", self.sentinel, id)
    }

    /// Split a line into `(leading text, marker)` if it ends with a marker.
    ///
    /// Leading text is whatever the interpreter printed without a trailing
    /// newline before the marker, e.g. `print("x", end="")`.
    pub fn split<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let trimmed = line.trim();
        let needle = format!("{}-", self.sentinel);
        let start = trimmed.rfind(&needle)?;
        let digits = &trimmed[start + needle.len()..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((&trimmed[..start], &trimmed[start..]))
    }
}

/// Per-family filter for prompt prefixes and startup banner lines.
#[derive(Debug, Clone, Default)]
pub struct NoiseFilter {
    prompts: Vec<String>,
    banners: Vec<String>,
}

impl NoiseFilter {
    pub fn new<P, B>(prompts: P, banners: B) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        B: IntoIterator,
        B::Item: Into<String>,
    {
        Self {
            prompts: prompts.into_iter().map(Into::into).collect(),
            banners: banners.into_iter().map(Into::into).collect(),
        }
    }

    /// Clean one line. `None` means drop it entirely.
    ///
    /// Prompts are written without a newline, so several can pile up in
    /// front of the next real line (`>>> >>> Traceback ...`). They are
    /// stripped repeatedly.
    pub fn clean<'a>(&self, line: &'a str) -> Option<&'a str> {
        let mut rest = line;
        'strip: loop {
            for prompt in &self.prompts {
                if let Some(stripped) = rest.strip_prefix(prompt.as_str()) {
                    rest = stripped;
                    continue 'strip;
                }
            }
            break;
        }
        if self.banners.iter().any(|b| rest.starts_with(b.as_str())) {
            return None;
        }
        Some(rest)
    }
}

/// Read one line (without its terminator), lossily decoding invalid UTF-8.
///
/// Returns `None` at end-of-file.
async fn next_line(reader: &mut BufReader<BoxedReader>, buf: &mut Vec<u8>) -> Option<String> {
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => {
            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }
            Some(String::from_utf8_lossy(buf).into_owned())
        }
        Err(e) => {
            tracing::debug!(error = %e, "interpreter stream read failed");
            None
        }
    }
}

/// Drain stdout, cutting accumulated output at every marker line.
pub fn spawn_output_reader(
    stdout: BoxedReader,
    pattern: MarkerPattern,
    filter: NoiseFilter,
    results: mpsc::UnboundedSender<ResultFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut accumulated = String::new();

        while let Some(raw) = next_line(&mut reader, &mut buf).await {
            let Some(line) = filter.clean(&raw) else {
                continue;
            };

            if let Some((leading, marker)) = pattern.split(line) {
                if !leading.is_empty() {
                    accumulated.push_str(leading);
                }
                let frame = ResultFrame::Marker {
                    marker: marker.to_string(),
                    output: std::mem::take(&mut accumulated),
                };
                tracing::trace!(?frame, "result frame");
                if results.send(frame).is_err() {
                    return;
                }
            } else {
                accumulated.push_str(line);
                accumulated.push('\n');
            }
        }

        tracing::debug!("interpreter stdout closed");
        let _ = results.send(ResultFrame::Closed {
            output: accumulated,
        });
    })
}

/// Drain stderr, forwarding each non-empty line.
///
/// The queue closes (sender dropped) when stderr reaches end-of-file.
pub fn spawn_error_reader(
    stderr: BoxedReader,
    filter: NoiseFilter,
    errors: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();

        while let Some(raw) = next_line(&mut reader, &mut buf).await {
            let Some(line) = filter.clean(&raw) else {
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            if errors.send(line.to_string()).is_err() {
                return;
            }
        }
        tracing::debug!("interpreter stderr closed");
    })
}
