//! A scripted, in-memory interpreter for protocol and session tests.
//!
//! [`FakeTransport`] speaks the sh family's framing over `tokio::io::duplex`
//! pipes. Its tiny command language:
//!
//! | statement            | effect                                           |
//! |----------------------|--------------------------------------------------|
//! | `say TEXT`           | TEXT on stdout (single quotes removed)           |
//! | `warn TEXT`          | TEXT on stderr                                   |
//! | `fail TEXT`          | `sh: 1: TEXT: not found` on stderr               |
//! | `deferred_fail TEXT` | same, but written after this request's marker    |
//! | `sleep MS`           | pause                                            |
//! | `hang`               | never return                                     |
//! | `exit`               | close all pipes                                  |
//! | `stale`              | a marker line for an id nobody is waiting on     |
//! | `noop`               | nothing                                          |
//! | `NAME='VALUE'`       | assignment                                       |
//! | `printf ... "$NAME"` | the fetch/capture forms the sh family emits      |
//!
//! Anything else is reported as a missing command.

#![allow(dead_code)]

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use ferry_kernel::family::{InterpreterKind, family_for};
use ferry_kernel::{Session, SessionConfig, Transport, TransportError, TransportStreams};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

/// Counters shared between a test and its fake interpreter.
#[derive(Debug, Default)]
pub struct FakeStats {
    /// Requests written but not yet answered.
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Markers echoed back.
    pub markers: AtomicUsize,
    pub starts: AtomicUsize,
    pub kills: AtomicUsize,
}

impl FakeStats {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn markers(&self) -> usize {
        self.markers.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

pub struct FakeTransport {
    stats: Arc<FakeStats>,
    sentinel: String,
    task: Option<JoinHandle<()>>,
}

impl FakeTransport {
    pub fn new() -> (Self, Arc<FakeStats>) {
        let stats = Arc::new(FakeStats::default());
        let transport = Self {
            stats: stats.clone(),
            sentinel: family_for(InterpreterKind::Shell).sentinel().to_string(),
            task: None,
        };
        (transport, stats)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start(&mut self) -> Result<TransportStreams, TransportError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        self.stats.in_flight.store(0, Ordering::SeqCst);

        let (client_stdin, repl_stdin) = tokio::io::duplex(64 * 1024);
        let (repl_stdout, client_stdout) = tokio::io::duplex(64 * 1024);
        let (repl_stderr, client_stderr) = tokio::io::duplex(64 * 1024);

        let repl = FakeRepl {
            stdout: repl_stdout,
            stderr: repl_stderr,
            stats: self.stats.clone(),
            sentinel: self.sentinel.clone(),
            vars: HashMap::new(),
            deferred: Vec::new(),
        };
        self.task = Some(tokio::spawn(repl.run(repl_stdin)));

        Ok(TransportStreams {
            stdin: Box::new(CountingWriter {
                inner: client_stdin,
                stats: self.stats.clone(),
                sentinel: self.sentinel.clone(),
            }),
            stdout: Box::new(client_stdout),
            stderr: Box::new(client_stderr),
        })
    }

    async fn kill(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.task.take() {
            task.abort();
            self.stats.kills.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn describe(&self) -> String {
        "fake-sh".into()
    }
}

/// Session over a fresh fake with short timeouts.
pub async fn fake_session(config: SessionConfig) -> (Arc<Session>, Arc<FakeStats>) {
    let (transport, stats) = FakeTransport::new();
    let session = Arc::new(Session::with_transport(config, Box::new(transport)));
    session.initialize().await.expect("fake session starts");
    (session, stats)
}

pub fn shell_config() -> SessionConfig {
    SessionConfig::shell()
        .with_timeout(Duration::from_secs(5))
        .with_startup_timeout(Duration::from_secs(5))
}

/// Counts requests as they are written: every frame carries one marker.
struct CountingWriter {
    inner: DuplexStream,
    stats: Arc<FakeStats>,
    sentinel: String,
}

impl AsyncWrite for CountingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            let written = String::from_utf8_lossy(&buf[..*n]);
            for _ in written.matches(this.sentinel.as_str()) {
                let now = this.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                this.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
            }
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

enum Flow {
    Continue,
    Exit,
}

struct FakeRepl {
    stdout: DuplexStream,
    stderr: DuplexStream,
    stats: Arc<FakeStats>,
    sentinel: String,
    vars: HashMap<String, String>,
    deferred: Vec<String>,
}

impl FakeRepl {
    async fn run(mut self, stdin: DuplexStream) {
        let mut lines = BufReader::new(stdin).lines();
        // An `eval '...'` body may span several physical lines.
        let mut pending_eval: Option<String> = None;
        while let Ok(Some(line)) = lines.next_line().await {
            let line = match pending_eval.take() {
                Some(mut buf) => {
                    buf.push('\n');
                    buf.push_str(&line);
                    buf
                }
                None => line,
            };
            if line.starts_with("eval '") && !line.contains("'; echo '") {
                pending_eval = Some(line);
                continue;
            }
            if let Flow::Exit = self.line(&line).await {
                return;
            }
        }
    }

    async fn line(&mut self, line: &str) -> Flow {
        if let Some(rest) = line.strip_prefix("eval '") {
            let Some(split) = rest.rfind("'; echo '") else {
                self.err(&format!("sh: 1: Syntax error: {line}")).await;
                return Flow::Continue;
            };
            let body = rest[..split].replace(r"'\''", "'");
            let marker = rest[split + "'; echo '".len()..].trim_end_matches('\'').to_string();
            for stmt in body.lines() {
                if let Flow::Exit = self.statements(stmt).await {
                    return Flow::Exit;
                }
            }
            self.marker(&marker).await;
            return Flow::Continue;
        }
        if let Some(marker) = line.strip_prefix("echo '") {
            let marker = marker.trim_end_matches('\'').to_string();
            self.marker(&marker).await;
            return Flow::Continue;
        }
        self.statements(line).await
    }

    async fn statements(&mut self, line: &str) -> Flow {
        for stmt in line.split("; ") {
            if let Flow::Exit = self.statement(stmt.trim()).await {
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    async fn statement(&mut self, stmt: &str) -> Flow {
        let (word, rest) = stmt.split_once(' ').unwrap_or((stmt, ""));
        match word {
            "" | "noop" | "true" => {}
            "say" => {
                let text = rest.replace('\'', "");
                self.out(&text).await;
            }
            "warn" => self.err(rest).await,
            "fail" => self.err(&format!("sh: 1: {rest}: not found")).await,
            "deferred_fail" => self.deferred.push(format!("sh: 1: {rest}: not found")),
            "sleep" => {
                let ms = rest.trim().parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            "hang" => std::future::pending::<()>().await,
            "exit" => return Flow::Exit,
            "stale" => {
                let stale = format!("{}-999999", self.sentinel);
                self.out(&stale).await;
            }
            "printf" => self.printf(rest).await,
            w if w.starts_with("PS1=") || w.starts_with("unset") => {}
            _ => {
                if let Some((name, value)) = stmt.split_once('=')
                    && !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    let value = value.trim_matches('\'').replace(r"'\''", "'");
                    self.vars.insert(name.to_string(), value);
                } else {
                    self.err(&format!("sh: 1: {word}: not found")).await;
                }
            }
        }
        Flow::Continue
    }

    /// `printf '%s\n' "$x"` and `printf '%s\t%s\n' x "$x"`.
    async fn printf(&mut self, args: &str) {
        if let Some(var) = args.strip_prefix(r"'%s\n' ") {
            let name = var.trim_matches('"').trim_start_matches('$');
            let value = self.vars.get(name).cloned().unwrap_or_default();
            self.out(&value).await;
        } else if let Some(rest) = args.strip_prefix(r"'%s\t%s\n' ") {
            let name = rest.split_whitespace().next().unwrap_or_default();
            let value = self.vars.get(name).cloned().unwrap_or_default();
            self.out(&format!("{name}\t{value}")).await;
        }
    }

    async fn marker(&mut self, marker: &str) {
        let _ = self
            .stats
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.stats.markers.fetch_add(1, Ordering::SeqCst);
        self.out(marker).await;
        for line in std::mem::take(&mut self.deferred) {
            self.err(&line).await;
        }
    }

    async fn out(&mut self, text: &str) {
        let _ = self.stdout.write_all(format!("{text}\n").as_bytes()).await;
        let _ = self.stdout.flush().await;
    }

    async fn err(&mut self, text: &str) {
        let _ = self.stderr.write_all(format!("{text}\n").as_bytes()).await;
        let _ = self.stderr.flush().await;
    }
}

/// True when `program` is on PATH.
pub fn have(program: &str) -> bool {
    let path = std::env::var("PATH").unwrap_or_default();
    ferry_kernel::transport::resolve_in_path(program, &path).is_some()
}
