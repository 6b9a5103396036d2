//! Child-process transport built on `tokio::process`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::{Transport, TransportStreams};
use crate::error::TransportError;

/// Spawns the interpreter as a child with all three stdio streams piped.
pub struct ProcessTransport {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    child: Option<Child>,
}

impl ProcessTransport {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
            cwd: None,
            child: None,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Resolve the program to an executable path.
    ///
    /// Names containing a `/` are taken as paths; bare names are looked up
    /// in `$PATH`.
    pub fn resolve(&self) -> Option<String> {
        if self.program.contains('/') {
            let path = Path::new(&self.program);
            return path.is_file().then(|| self.program.clone());
        }
        let path_var = std::env::var("PATH").unwrap_or_default();
        resolve_in_path(&self.program, &path_var)
    }

    /// OS process id of the running child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn start(&mut self) -> Result<TransportStreams, TransportError> {
        if self.child.is_some() {
            self.kill().await?;
        }

        let executable = self.resolve().ok_or_else(|| TransportError::NotFound {
            program: self.program.clone(),
        })?;

        // Spawn by name so argv[0] stays short; diagnostics are prefixed
        // with it and matched by the family filters.
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            program: executable.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(TransportError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(TransportError::MissingPipe("stderr"))?;

        tracing::debug!(program = %executable, pid = ?child.id(), "spawned interpreter");
        self.child = Some(child);

        Ok(TransportStreams {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        })
    }

    async fn kill(&mut self) -> Result<(), TransportError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(?status, "interpreter already exited");
                Ok(())
            }
            _ => {
                tracing::debug!(pid = ?child.id(), "killing interpreter");
                child.kill().await.map_err(TransportError::Kill)
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Find `name` in a colon-separated PATH string.
///
/// Returns the full path of the first executable regular file found.
pub fn resolve_in_path(name: &str, path_var: &str) -> Option<String> {
    for dir in path_var.split(':') {
        if dir.is_empty() {
            continue;
        }

        let full_path = format!("{}/{}", dir, name);
        let path = Path::new(&full_path);

        if path.is_file() {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(metadata) = path.metadata()
                    && metadata.permissions().mode() & 0o111 != 0
                {
                    return Some(full_path);
                }
            }

            #[cfg(not(unix))]
            {
                return Some(full_path);
            }
        }
    }

    None
}
