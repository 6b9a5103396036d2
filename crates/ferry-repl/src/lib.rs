//! ferry REPL: an interactive front end for one interpreter session.
//!
//! Lines are sent to the session as code. Lines starting with `/` are
//! meta-commands: variables, calls, multi-line blocks, background jobs,
//! timeouts and snapshots. Job notifications are printed before each prompt.

pub mod format;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ferry_kernel::paths;
use ferry_kernel::state::{load_from_file, save_to_file};
use ferry_kernel::{
    CallSpec, FerryConfig, InterpreterKind, JobId, JobNotification, JobScheduler, Session, Value,
};
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::format::{format_error, format_job, format_notification, format_value};

/// Result from processing one line.
#[derive(Debug, PartialEq)]
pub enum MetaResult {
    /// Continue with optional output
    Continue(Option<String>),
    /// Exit the REPL (caller should save history and exit)
    Exit,
}

/// A `/block` being collected.
#[derive(Debug)]
struct PendingBlock {
    names: Vec<String>,
    lines: Vec<String>,
}

/// REPL state: one session, one scheduler, one runtime.
pub struct Repl {
    session: Arc<Session>,
    scheduler: JobScheduler,
    notifications: Option<mpsc::Receiver<JobNotification>>,
    retention: Duration,
    block: Option<PendingBlock>,
    runtime: Runtime,
}

impl Repl {
    /// Start an interpreter of `kind` configured from `config`.
    pub fn new(kind: InterpreterKind, config: &FerryConfig) -> Result<Self> {
        let runtime = Runtime::new().context("Failed to create tokio runtime")?;
        let session = Arc::new(Session::new(config.session_config(kind)));
        runtime
            .block_on(session.initialize())
            .with_context(|| format!("Failed to start {kind} interpreter"))?;

        let scheduler = {
            let _guard = runtime.enter();
            JobScheduler::from_config(config)
        };
        let notifications = scheduler.subscribe();

        Ok(Self {
            session,
            scheduler,
            notifications,
            retention: config.job_retention(),
            block: None,
            runtime,
        })
    }

    pub fn kind(&self) -> InterpreterKind {
        self.session.kind()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Per-call timeout for subsequent calls.
    pub fn set_timeout(&self, timeout: Duration) {
        self.runtime.block_on(self.session.set_execution_timeout(timeout));
    }

    pub fn prompt(&self) -> String {
        if self.block.is_some() {
            "....> ".to_string()
        } else {
            format!("ferry({})> ", self.kind())
        }
    }

    /// Evaluate `code` as one block, print the outcome, map it to an exit code.
    pub fn run_once(&mut self, code: &str) -> ExitCode {
        match self.runtime.block_on(self.session.execute_code_block(code, &[])) {
            Ok(Value::Null) => ExitCode::SUCCESS,
            Ok(value) => {
                println!("{value}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", format_error(&e));
                ExitCode::FAILURE
            }
        }
    }

    /// Process a single line of input.
    pub fn process_line(&mut self, line: &str) -> MetaResult {
        let trimmed = line.trim();

        if let Some(block) = self.block.as_mut() {
            match trimmed {
                "/end" => {
                    let block = self.block.take();
                    return MetaResult::Continue(block.map(|b| self.finish_block(b)));
                }
                "/abort" => {
                    self.block = None;
                    return MetaResult::Continue(Some("(block discarded)".to_string()));
                }
                // Indentation matters in blocks, keep the raw line
                _ => {
                    block.lines.push(line.trim_end().to_string());
                    return MetaResult::Continue(None);
                }
            }
        }

        if trimmed.starts_with('/') {
            return self.handle_meta_command(trimmed);
        }

        match trimmed {
            "quit" | "exit" => return MetaResult::Exit,
            "help" => return self.handle_meta_command("/help"),
            "" => return MetaResult::Continue(None),
            _ => {}
        }

        let result = self.runtime.block_on(self.session.eval(trimmed));
        MetaResult::Continue(match result {
            Ok(Value::Null) => None,
            Ok(value) => Some(format_value(&value)),
            Err(e) => Some(format_error(&e)),
        })
    }

    /// Handle a meta-command (starts with /).
    fn handle_meta_command(&mut self, cmd: &str) -> MetaResult {
        let (command, rest) = cmd.split_once(char::is_whitespace).unwrap_or((cmd, ""));
        let rest = rest.trim();

        let output = match command {
            "/quit" | "/q" | "/exit" => return MetaResult::Exit,
            "/help" | "/h" | "/?" => HELP_TEXT.to_string(),
            "/vars" => self.list_vars(),
            "/get" => self.get_var(rest),
            "/set" => self.set_var(rest),
            "/call" => self.call(rest),
            "/block" => {
                let names = rest.split_whitespace().map(str::to_string).collect();
                self.block = Some(PendingBlock {
                    names,
                    lines: Vec::new(),
                });
                "(enter code, finish with /end or /abort)".to_string()
            }
            "/end" | "/abort" => "No block in progress.".to_string(),
            "/bg" => self.background(rest),
            "/jobs" => self.list_jobs(),
            "/job" => self.with_job_id(rest, |repl, id| match repl.scheduler.get_job(id) {
                Some(info) => format_job(&info),
                None => format!("No such job: {id}"),
            }),
            "/wait" => self.with_job_id(rest, |repl, id| {
                match repl.runtime.block_on(repl.scheduler.wait(id)) {
                    Some(info) => format_job(&info),
                    None => format!("No such job: {id}"),
                }
            }),
            "/cancel" => self.with_job_id(rest, |repl, id| {
                if repl.scheduler.cancel_job(id) {
                    format!("Job {id} cancelled (it keeps its slot until it returns)")
                } else {
                    format!("Job {id} is not running")
                }
            }),
            "/clean" => {
                let removed = self.scheduler.clean_completed_jobs(self.retention);
                format!("Removed {removed} finished job(s)")
            }
            "/limit" => match rest {
                "" => format!(
                    "Concurrency limit: {} ({} running)",
                    self.scheduler.concurrency_limit(),
                    self.scheduler.running_count()
                ),
                n => match n.parse::<usize>() {
                    Ok(limit) if limit > 0 => {
                        self.scheduler.set_concurrency_limit(limit);
                        format!("Concurrency limit: {limit}")
                    }
                    _ => format!("Usage: /limit N (N > 0), got {n:?}"),
                },
            },
            "/timeout" => match rest {
                "" => {
                    let timeout = self.runtime.block_on(self.session.execution_timeout());
                    format!("Timeout: {}ms", timeout.as_millis())
                }
                ms => match ms.parse::<u64>() {
                    Ok(ms) if ms > 0 => {
                        self.set_timeout(Duration::from_millis(ms));
                        format!("Timeout: {ms}ms")
                    }
                    _ => format!("Usage: /timeout MS (MS > 0), got {ms:?}"),
                },
            },
            "/restart" | "/reset" => match self.runtime.block_on(self.session.restart()) {
                Ok(()) => "Interpreter restarted".to_string(),
                Err(e) => format!("Restart failed: {e}"),
            },
            "/status" => format!(
                "Interpreter: {} ({})\nReady: {}\nVariables cached: {}\nJobs: {} running, limit {}",
                self.kind(),
                self.session
                    .config()
                    .program
                    .as_deref()
                    .unwrap_or(self.session.family().program()),
                self.session.is_ready(),
                self.runtime.block_on(self.session.cached_variables()).len(),
                self.scheduler.running_count(),
                self.scheduler.concurrency_limit(),
            ),
            "/save" => self.save(rest),
            "/load" => self.load(rest),
            _ => format!("Unknown command: {command}\nType /help for available commands."),
        };
        MetaResult::Continue(Some(output))
    }

    fn finish_block(&mut self, block: PendingBlock) -> String {
        let code = block.lines.join("\n");
        let names: Vec<&str> = block.names.iter().map(String::as_str).collect();
        match self
            .runtime
            .block_on(self.session.execute_code_block(&code, &names))
        {
            Ok(Value::Null) => "(no output)".to_string(),
            Ok(value) => format_value(&value),
            Err(e) => format_error(&e),
        }
    }

    fn list_vars(&self) -> String {
        let vars = self.runtime.block_on(self.session.cached_variables());
        if vars.is_empty() {
            return "(no variables set)".to_string();
        }
        let mut output = String::from("Variables:\n");
        for (name, value) in vars {
            output.push_str(&format!("  {} = {}\n", name, format_value(&value)));
        }
        output.trim_end().to_string()
    }

    fn get_var(&self, name: &str) -> String {
        if name.is_empty() {
            return "Usage: /get NAME".to_string();
        }
        match self.runtime.block_on(self.session.get_variable(name)) {
            Ok(value) => format_value(&value),
            Err(e) => format_error(&e),
        }
    }

    fn set_var(&self, args: &str) -> String {
        let Some((name, raw)) = args.split_once(char::is_whitespace) else {
            return "Usage: /set NAME VALUE (VALUE is JSON, or a bare string)".to_string();
        };
        let value = parse_literal(raw.trim());
        match self.runtime.block_on(self.session.set_variable(name, value)) {
            Ok(()) => format!("{name} set"),
            Err(e) => format_error(&e),
        }
    }

    fn call(&self, args: &str) -> String {
        let (target, raw) = args
            .split_once(char::is_whitespace)
            .map(|(t, r)| (t, r.trim()))
            .unwrap_or((args, ""));
        if target.is_empty() {
            return "Usage: /call NAME [JSON-ARRAY]".to_string();
        }

        let mut call = CallSpec::new(target);
        if !raw.is_empty() {
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(serde_json::Value::Array(items)) => {
                    for item in items {
                        call = call.arg(Value::from(item));
                    }
                }
                Ok(_) => return "Arguments must be a JSON array".to_string(),
                Err(e) => return format!("Invalid arguments: {e}"),
            }
        }

        match self.runtime.block_on(self.session.execute_function(&call)) {
            Ok(value) => format_value(&value),
            Err(e) => format_error(&e),
        }
    }

    fn background(&self, code: &str) -> String {
        if code.is_empty() {
            return "Usage: /bg CODE".to_string();
        }
        let session = self.session.clone();
        let owned = code.to_string();
        let _guard = self.runtime.enter();
        match self
            .scheduler
            .submit(code, async move { session.eval(&owned).await })
        {
            Ok(id) => format!("[{id}] started"),
            Err(e) => format!("Error: {e}"),
        }
    }

    fn list_jobs(&self) -> String {
        let jobs = self.scheduler.list_jobs();
        if jobs.is_empty() {
            return "(no background jobs)".to_string();
        }
        let mut output = String::from("Background jobs:\n");
        for job in jobs {
            output.push_str(&format!("  [{}] {} {}\n", job.id, job.status, job.command));
        }
        output.trim_end().to_string()
    }

    fn with_job_id(&self, raw: &str, f: impl FnOnce(&Self, JobId) -> String) -> String {
        match raw.parse::<u64>() {
            Ok(id) => f(self, JobId(id)),
            Err(_) => format!("Expected a job id, got {raw:?}"),
        }
    }

    fn save(&self, raw: &str) -> String {
        if raw.is_empty() {
            return "Usage: /save PATH (.json or .toml)".to_string();
        }
        let path = snapshot_path(raw);
        let snapshot = self.runtime.block_on(self.session.snapshot());
        match save_to_file(&path, &snapshot) {
            Ok(()) => format!("Saved {} variable(s) to {}", snapshot.len(), path.display()),
            Err(e) => format!("Save failed: {e:#}"),
        }
    }

    fn load(&self, raw: &str) -> String {
        if raw.is_empty() {
            return "Usage: /load PATH".to_string();
        }
        let path = snapshot_path(raw);
        let snapshot = match load_from_file(&path) {
            Ok(snapshot) => snapshot,
            Err(e) => return format!("Load failed: {e:#}"),
        };
        match self.runtime.block_on(self.session.restore(&snapshot)) {
            Ok(n) => format!("Restored {n} variable(s) from {}", path.display()),
            Err(e) => format_error(&e),
        }
    }

    /// Pending job notifications, oldest first.
    pub fn drain_notifications(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(rx) = self.notifications.as_mut() {
            while let Ok(note) = rx.try_recv() {
                lines.push(format_notification(&note));
            }
        }
        lines
    }

    /// Wait for background jobs, then stop the interpreter.
    pub fn shutdown(&mut self) {
        self.runtime.block_on(async {
            self.scheduler.shutdown().await;
            self.session.cleanup().await;
        });
    }
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_literal(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from(json),
        Err(_) => Value::String(raw.to_string()),
    }
}

/// Bare names land in the snapshot directory.
fn snapshot_path(raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.components().count() == 1 && !raw.starts_with('.') {
        paths::snapshot_dir().join(path)
    } else {
        path.to_path_buf()
    }
}

const HELP_TEXT: &str = r#"ferry REPL

Anything not starting with / is evaluated by the interpreter.

Meta Commands:
  /help, /?              Show this help
  /quit, /q              Exit (waits for background jobs)
  /status                Interpreter and scheduler state

Variables:
  /vars                  Show cached variables
  /get NAME              Fetch a variable from the interpreter
  /set NAME VALUE        Assign; VALUE is JSON or a bare string
  /call NAME [ARGS]      Call a function; ARGS is a JSON array
  /save PATH             Snapshot cached variables (.json or .toml)
  /load PATH             Restore a snapshot into this interpreter

Blocks:
  /block [NAMES...]      Start a multi-line block; NAMES are captured after
  /end                   Run the block in one call
  /abort                 Discard the block

Background jobs:
  /bg CODE               Run CODE as a background job
  /jobs                  List jobs
  /job ID                Show one job
  /wait ID               Wait for a job to finish
  /cancel ID             Mark a job cancelled
  /clean                 Forget finished jobs past the retention window
  /limit [N]             Show or set the concurrency limit

Session:
  /timeout [MS]          Show or set the per-call timeout
  /restart, /reset       Kill and restart the interpreter
"#;

/// Save REPL history to disk.
fn save_history(rl: &mut Editor<(), DefaultHistory>, history_path: &Path) {
    if let Some(parent) = history_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        tracing::warn!("Failed to create history directory: {}", e);
    }
    if let Err(e) = rl.save_history(history_path) {
        tracing::warn!("Failed to save history: {}", e);
    }
}

/// Run the interactive loop until `/quit` or EOF.
pub fn run(repl: &mut Repl) -> Result<()> {
    println!("ferry v{} ({})", env!("CARGO_PKG_VERSION"), repl.kind());
    println!("Type /help for commands, /quit to exit.");
    println!();

    let mut rl: Editor<(), DefaultHistory> = Editor::new().context("Failed to create editor")?;

    let history_path = paths::history_file();
    if let Err(e) = rl.load_history(&history_path) {
        // Expected on first run
        let is_not_found = matches!(&e, ReadlineError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound);
        if !is_not_found {
            tracing::warn!("Failed to load history: {}", e);
        }
    }

    loop {
        for line in repl.drain_notifications() {
            println!("{line}");
        }

        match rl.readline(&repl.prompt()) {
            Ok(line) => {
                if let Err(e) = rl.add_history_entry(line.as_str()) {
                    tracing::warn!("Failed to add history entry: {}", e);
                }

                match repl.process_line(&line) {
                    MetaResult::Continue(Some(output)) => println!("{output}"),
                    MetaResult::Continue(None) => {}
                    MetaResult::Exit => break,
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    save_history(&mut rl, &history_path);
    Ok(())
}
