//! Session and scheduler configuration.
//!
//! [`SessionConfig`] is built in code. [`FerryConfig`] is loaded from
//! `~/.config/ferry/config.toml` and turned into session configs per kind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::family::InterpreterKind;
use crate::paths;
use crate::protocol::{ChannelOptions, DEFAULT_EXECUTION_TIMEOUT, DEFAULT_TRAILING_DRAIN};

/// Environment variable overriding the default execution timeout.
pub const TIMEOUT_ENV: &str = "FERRY_TIMEOUT_MS";

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for one [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub kind: InterpreterKind,
    /// Program to run instead of the family default.
    pub program: Option<String>,
    /// Arguments appended after the family's own.
    pub extra_args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub execution_timeout: Duration,
    /// Window for stderr lines trailing the marker.
    pub trailing_drain: Duration,
    /// Deadline for the prelude round trip during `initialize`.
    pub startup_timeout: Duration,
    /// Re-seed cached variables into the fresh interpreter on `restart`.
    pub replay_on_restart: bool,
}

impl SessionConfig {
    pub fn new(kind: InterpreterKind) -> Self {
        Self {
            kind,
            program: None,
            extra_args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            trailing_drain: DEFAULT_TRAILING_DRAIN,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            replay_on_restart: false,
        }
    }

    pub fn python() -> Self {
        Self::new(InterpreterKind::Python)
    }

    pub fn r() -> Self {
        Self::new(InterpreterKind::R)
    }

    pub fn shell() -> Self {
        Self::new(InterpreterKind::Shell)
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_trailing_drain(mut self, window: Duration) -> Self {
        self.trailing_drain = window;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_replay_on_restart(mut self, replay: bool) -> Self {
        self.replay_on_restart = replay;
        self
    }

    pub(crate) fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            timeout: self.execution_timeout,
            trailing_drain: self.trailing_drain,
        }
    }
}

/// `[interpreters.<kind>]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FerryConfig {
    /// Default execution timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub default_timeout_ms: u64,

    /// Background jobs allowed to run at once.
    #[serde(default = "default_max_jobs")]
    pub max_concurrent_jobs: usize,

    /// Capacity of the job notification queue.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// Terminal jobs older than this are pruned by `clean_completed_jobs`.
    #[serde(default = "default_retention")]
    pub job_retention_secs: u64,

    /// Keyed by kind name (`python`, `r`, `sh`); parsed leniently.
    #[serde(default)]
    pub interpreters: HashMap<String, InterpreterConfig>,
}

fn default_timeout() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT.as_millis() as u64
}

fn default_max_jobs() -> usize {
    4
}

fn default_notification_capacity() -> usize {
    64
}

fn default_retention() -> u64 {
    3600
}

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout(),
            max_concurrent_jobs: default_max_jobs(),
            notification_capacity: default_notification_capacity(),
            job_retention_secs: default_retention(),
            interpreters: HashMap::new(),
        }
    }
}

impl FerryConfig {
    /// Load from the default path, then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Get the default config file path.
    pub fn config_path() -> PathBuf {
        paths::config_dir().join("config.toml")
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            self.default_timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("{TIMEOUT_ENV} must be milliseconds, got {raw:?}"))?;
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    /// Session config for `kind` with this file's overrides applied.
    pub fn session_config(&self, kind: InterpreterKind) -> SessionConfig {
        let mut config = SessionConfig::new(kind).with_timeout(self.default_timeout());
        let interp = self
            .interpreters
            .iter()
            .find(|(name, _)| name.parse::<InterpreterKind>().ok() == Some(kind))
            .map(|(_, interp)| interp);
        if let Some(interp) = interp {
            config.program = interp.program.clone();
            config.extra_args = interp.args.clone();
            config.env = interp.env.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FerryConfig::default();
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.notification_capacity, 64);
        assert!(config.interpreters.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
default_timeout_ms = 5000
max_concurrent_jobs = 2
job_retention_secs = 60

[interpreters.python]
program = "/opt/py/bin/python3"
args = ["-X", "utf8"]

[interpreters.sh]
env = { LC_ALL = "C" }
"#;

        let config: FerryConfig = toml::from_str(toml).expect("parse failed");
        assert_eq!(config.default_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.notification_capacity, 64);
        assert_eq!(config.job_retention(), Duration::from_secs(60));

        let py = config.session_config(InterpreterKind::Python);
        assert_eq!(py.program.as_deref(), Some("/opt/py/bin/python3"));
        assert_eq!(py.extra_args, vec!["-X", "utf8"]);
        assert_eq!(py.execution_timeout, Duration::from_secs(5));

        let sh = config.session_config(InterpreterKind::Shell);
        assert_eq!(sh.env.get("LC_ALL").map(String::as_str), Some("C"));
        assert!(sh.program.is_none());
    }

    #[test]
    fn parse_minimal_config() {
        let config: FerryConfig = toml::from_str("").expect("parse failed");
        assert_eq!(config.max_concurrent_jobs, 4);
    }

    #[test]
    fn load_from_missing_file_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = FerryConfig::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn session_builder() {
        let config = SessionConfig::shell()
            .with_program("/bin/dash")
            .with_timeout(Duration::from_millis(10))
            .with_env("LANG", "C")
            .with_replay_on_restart(true);
        assert_eq!(config.kind, InterpreterKind::Shell);
        assert_eq!(config.channel_options().timeout, Duration::from_millis(10));
        assert_eq!(config.channel_options().trailing_drain, DEFAULT_TRAILING_DRAIN);
        assert!(config.replay_on_restart);
    }

    #[test]
    fn config_file_lives_in_ferry_config_dir() {
        let path = FerryConfig::config_path();
        assert_eq!(path, paths::config_dir().join("config.toml"));
        assert!(path.starts_with(paths::xdg_config_home()));
    }
}
