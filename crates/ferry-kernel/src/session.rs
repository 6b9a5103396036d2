//! Sessions: one long-lived interpreter treated as a synchronous call target.
//!
//! A [`Session`] owns a transport, the [`MarkerChannel`] attached to it and
//! a mirrored variable cache. Every operation takes the session's
//! `tokio::sync::Mutex` for its whole round trip, so calls against one
//! session never overlap and run in lock acquisition order.
//!
//! ```text
//!   idle ──initialize──▶ ready ──timeout / transport failure──▶ not ready
//!                          ▲                                        │
//!                          └──────────────── restart ───────────────┘
//! ```
//!
//! Exceptions raised by interpreter code leave the session ready. Anything
//! that may have desynchronized the pipes (a timeout, a closed stream)
//! kills the child; the session must be restarted before it is used again.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ferry_types::{CallSpec, Value, json_to_value};
use tokio::sync::Mutex;

use crate::classifier::OutputClassifier;
use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::family::{InterpreterFamily, InterpreterKind, family_for};
use crate::protocol::MarkerChannel;
use crate::state::VariableSnapshot;
use crate::transport::{ProcessTransport, Transport};

struct SessionState {
    transport: Box<dyn Transport>,
    channel: Option<MarkerChannel>,
    variables: BTreeMap<String, Value>,
    timeout: Duration,
}

/// A driven interpreter.
pub struct Session {
    config: SessionConfig,
    family: Arc<dyn InterpreterFamily>,
    classifier: Arc<dyn OutputClassifier>,
    program: String,
    available: AtomicBool,
    ready: AtomicBool,
    state: Mutex<SessionState>,
}

impl Session {
    /// Session over a real child process.
    ///
    /// Availability is decided here, by looking the program up on PATH.
    pub fn new(config: SessionConfig) -> Self {
        let family = family_for(config.kind);
        let program = config
            .program
            .clone()
            .unwrap_or_else(|| family.program().to_string());

        let mut args = family.args();
        args.extend(config.extra_args.iter().cloned());

        let mut env: HashMap<String, String> = family.env().into_iter().collect();
        env.extend(config.env.clone());

        let transport = ProcessTransport::new(program.clone(), args)
            .with_env(env)
            .with_cwd(config.cwd.clone());
        let available = transport.resolve().is_some();
        if !available {
            tracing::info!(kind = %config.kind, %program, "interpreter not found on PATH");
        }

        let mut session = Self::with_transport(config, Box::new(transport));
        session.program = program;
        session.available = AtomicBool::new(available);
        session
    }

    /// Session over any transport, e.g. in-memory pipes.
    pub fn with_transport(config: SessionConfig, transport: Box<dyn Transport>) -> Self {
        let family = family_for(config.kind);
        let classifier: Arc<dyn OutputClassifier> = Arc::new(family.classifier());
        let program = family.program().to_string();
        let timeout = config.execution_timeout;
        Self {
            config,
            family,
            classifier,
            program,
            available: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                transport,
                channel: None,
                variables: BTreeMap::new(),
                timeout,
            }),
        }
    }

    /// Replace the family's default exception classifier.
    ///
    /// Takes effect at the next `initialize` or `restart`.
    pub fn with_classifier(mut self, classifier: Arc<dyn OutputClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn kind(&self) -> InterpreterKind {
        self.config.kind
    }

    pub fn family(&self) -> &Arc<dyn InterpreterFamily> {
        &self.family
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Ready for calls: initialized and not invalidated since.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// The interpreter binary was found.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Start the interpreter and install the family prelude.
    ///
    /// A no-op on a session that is already ready.
    #[tracing::instrument(level = "debug", skip(self), fields(kind = %self.kind()))]
    pub async fn initialize(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if self.is_ready() && state.channel.is_some() {
            return Ok(());
        }
        self.start_locked(&mut state).await
    }

    /// Kill and re-launch the interpreter.
    ///
    /// With `replay_on_restart` the cached variables are assigned again in
    /// the fresh interpreter; otherwise the cache is cleared.
    #[tracing::instrument(level = "debug", skip(self), fields(kind = %self.kind()))]
    pub async fn restart(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;
        self.start_locked(&mut state).await?;

        if !self.config.replay_on_restart {
            state.variables.clear();
            return Ok(());
        }

        let cached: Vec<(String, Value)> = state
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in cached {
            let code = self.family.assign(&name, &value);
            self.round_trip(&mut state, &code).await?;
        }
        tracing::info!(kind = %self.kind(), replayed = state.variables.len(), "replayed cached variables");
        Ok(())
    }

    /// Kill the interpreter and forget all session state.
    #[tracing::instrument(level = "debug", skip(self), fields(kind = %self.kind()))]
    pub async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;
        state.variables.clear();
        tracing::info!(kind = %self.kind(), "session cleaned up");
    }

    /// Render `call` with literal arguments, run it, and decode the result.
    #[tracing::instrument(level = "debug", skip(self, call), fields(kind = %self.kind(), target = %call.target))]
    pub async fn execute_function(&self, call: &CallSpec) -> Result<Value, SessionError> {
        if !self.family.is_valid_target(&call.target) {
            return Err(SessionError::InvalidName(call.target.clone()));
        }
        if let Some((bad, _)) = call
            .keyword
            .iter()
            .find(|(name, _)| !self.family.is_valid_name(name))
        {
            return Err(SessionError::InvalidName(bad.clone()));
        }

        let code = self.family.render_call(call);
        let mut state = self.lock_ready().await?;
        let output = self.round_trip(&mut state, &code).await?;
        Ok(self.family.parse_value(&output))
    }

    /// Run arbitrary code and decode whatever it printed.
    #[tracing::instrument(level = "debug", skip(self, code), fields(kind = %self.kind()))]
    pub async fn eval(&self, code: &str) -> Result<Value, SessionError> {
        let mut state = self.lock_ready().await?;
        let output = self.round_trip(&mut state, code).await?;
        Ok(self.family.parse_value(&output))
    }

    /// Assign a variable in the interpreter and mirror it in the cache.
    #[tracing::instrument(level = "debug", skip(self, value), fields(kind = %self.kind()))]
    pub async fn set_variable(&self, name: &str, value: Value) -> Result<(), SessionError> {
        self.check_name(name)?;
        let mut state = self.lock_ready().await?;
        self.set_locked(&mut state, name, value).await
    }

    /// Read a variable back from the interpreter (never from the cache).
    #[tracing::instrument(level = "debug", skip(self), fields(kind = %self.kind()))]
    pub async fn get_variable(&self, name: &str) -> Result<Value, SessionError> {
        self.check_name(name)?;
        let mut state = self.lock_ready().await?;
        let code = self.family.fetch(name);
        let output = self.round_trip(&mut state, &code).await?;
        let value = self.family.parse_value(&output);
        state.variables.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Run a multi-statement block, then capture `names` from the interpreter.
    ///
    /// With no names, returns the decoded output of the block itself. With
    /// names, returns an object mapping each name to its value and updates
    /// the cache. Both round trips happen under one lock acquisition.
    #[tracing::instrument(level = "debug", skip(self, code), fields(kind = %self.kind()))]
    pub async fn execute_code_block(
        &self,
        code: &str,
        names: &[&str],
    ) -> Result<Value, SessionError> {
        for name in names {
            self.check_name(name)?;
        }
        let mut state = self.lock_ready().await?;
        let output = self.round_trip(&mut state, code).await?;
        if names.is_empty() {
            return Ok(self.family.parse_value(&output));
        }

        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let capture = self.family.capture(&names);
        let output = self.round_trip(&mut state, &capture).await?;
        let captured = self.family.parse_capture(&names, &output);

        let Value::Json(serde_json::Value::Object(map)) = &captured else {
            return Err(SessionError::Decode(format!(
                "expected an object of {} variable(s), got {output:?}",
                names.len()
            )));
        };
        for (name, json) in map {
            state
                .variables
                .insert(name.clone(), json_to_value(json.clone()));
        }
        Ok(captured)
    }

    /// Change the deadline for subsequent calls.
    pub async fn set_execution_timeout(&self, timeout: Duration) {
        let mut state = self.state.lock().await;
        state.timeout = timeout;
        if let Some(channel) = state.channel.as_mut() {
            channel.set_timeout(timeout);
        }
    }

    pub async fn execution_timeout(&self) -> Duration {
        self.state.lock().await.timeout
    }

    /// Copy of the variable cache.
    ///
    /// Holds only what was set or fetched through this session; it is not
    /// authoritative for the interpreter's namespace.
    pub async fn cached_variables(&self) -> BTreeMap<String, Value> {
        self.state.lock().await.variables.clone()
    }

    pub async fn snapshot(&self) -> VariableSnapshot {
        VariableSnapshot::new(self.kind(), self.cached_variables().await)
    }

    /// Assign every variable in `snapshot`. Returns how many were set.
    #[tracing::instrument(level = "debug", skip(self, snapshot), fields(kind = %self.kind()))]
    pub async fn restore(&self, snapshot: &VariableSnapshot) -> Result<usize, SessionError> {
        if snapshot.kind != self.kind() {
            return Err(SessionError::SnapshotMismatch {
                expected: self.kind().to_string(),
                found: snapshot.kind.to_string(),
            });
        }
        for name in snapshot.variables.keys() {
            self.check_name(name)?;
        }
        let mut state = self.lock_ready().await?;
        for (name, value) in &snapshot.variables {
            self.set_locked(&mut state, name, value.clone()).await?;
        }
        Ok(snapshot.variables.len())
    }

    fn check_name(&self, name: &str) -> Result<(), SessionError> {
        if self.family.is_valid_name(name) {
            Ok(())
        } else {
            Err(SessionError::InvalidName(name.to_string()))
        }
    }

    fn not_ready(&self) -> SessionError {
        if self.is_available() {
            SessionError::NotReady {
                kind: self.kind().to_string(),
            }
        } else {
            SessionError::Unavailable {
                program: self.program.clone(),
            }
        }
    }

    /// Take the lock, failing fast when the session cannot serve calls.
    ///
    /// Readiness is checked again after acquisition: a caller queued behind
    /// a call that timed out must not run against the dead channel.
    async fn lock_ready(&self) -> Result<tokio::sync::MutexGuard<'_, SessionState>, SessionError> {
        if !self.is_ready() {
            return Err(self.not_ready());
        }
        let state = self.state.lock().await;
        if !self.is_ready() || state.channel.is_none() {
            return Err(self.not_ready());
        }
        Ok(state)
    }

    async fn set_locked(
        &self,
        state: &mut SessionState,
        name: &str,
        value: Value,
    ) -> Result<(), SessionError> {
        let code = self.family.assign(name, &value);
        self.round_trip(state, &code).await?;
        state.variables.insert(name.to_string(), value);
        Ok(())
    }

    /// One round trip with the lock held. Invalidates the session on
    /// timeout or transport failure.
    async fn round_trip(&self, state: &mut SessionState, code: &str) -> Result<String, SessionError> {
        let SessionState {
            transport, channel, ..
        } = state;
        let Some(chan) = channel.as_mut() else {
            return Err(self.not_ready());
        };

        match chan.execute(code, transport.as_mut()).await {
            Ok(output) => Ok(output),
            Err(e) => {
                if e.kind().invalidates_session() {
                    tracing::warn!(kind = %self.kind(), error = %e, "session invalidated");
                    self.ready.store(false, Ordering::SeqCst);
                    *channel = None;
                    if let Err(kill) = transport.kill().await {
                        tracing::debug!(error = %kill, "kill after failure");
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn start_locked(&self, state: &mut SessionState) -> Result<(), SessionError> {
        if !self.is_available() {
            return Err(self.not_ready());
        }

        let streams = match state.transport.start().await {
            Ok(streams) => streams,
            Err(TransportError::NotFound { program }) => {
                self.available.store(false, Ordering::SeqCst);
                return Err(SessionError::Unavailable { program });
            }
            Err(e) => return Err(e.into()),
        };

        let mut options = self.config.channel_options();
        options.timeout = self.config.startup_timeout;
        state.channel = Some(MarkerChannel::attach(
            streams,
            self.family.clone(),
            self.classifier.clone(),
            options,
        ));
        self.ready.store(true, Ordering::SeqCst);

        // The first round trip also absorbs anything printed at startup.
        let prelude = self.family.prelude().unwrap_or_default();
        if let Err(e) = self.round_trip(state, &prelude).await {
            self.ready.store(false, Ordering::SeqCst);
            state.channel = None;
            if let Err(kill) = state.transport.kill().await {
                tracing::debug!(error = %kill, "kill after failed start");
            }
            tracing::warn!(kind = %self.kind(), error = %e, "interpreter failed to start");
            return Err(e);
        }

        let timeout = state.timeout;
        if let Some(channel) = state.channel.as_mut() {
            channel.set_timeout(timeout);
        }
        tracing::info!(kind = %self.kind(), transport = %state.transport.describe(), "session ready");
        Ok(())
    }

    async fn stop_locked(&self, state: &mut SessionState) {
        self.ready.store(false, Ordering::SeqCst);
        state.channel = None;
        if let Err(e) = state.transport.kill().await {
            tracing::debug!(error = %e, "kill during stop");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.kind())
            .field("program", &self.program)
            .field("ready", &self.is_ready())
            .field("available", &self.is_available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing() -> Session {
        Session::new(SessionConfig::python().with_program("definitely-not-a-real-binary-xyz"))
    }

    #[test]
    fn missing_program_is_unavailable() {
        let session = missing();
        assert!(!session.is_available());
        assert!(!session.is_ready());
    }

    #[tokio::test]
    async fn unavailable_session_refuses_to_start() {
        let session = missing();
        match session.initialize().await {
            Err(SessionError::Unavailable { program }) => {
                assert_eq!(program, "definitely-not-a-real-binary-xyz")
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
        assert!(matches!(
            session.eval("1").await,
            Err(SessionError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn uninitialized_session_is_not_ready() {
        let session = Session::new(SessionConfig::shell());
        assert!(session.is_available());
        assert!(matches!(
            session.eval("echo hi").await,
            Err(SessionError::NotReady { .. })
        ));
    }

    #[tokio::test]
    async fn names_are_validated_before_locking() {
        let session = Session::new(SessionConfig::shell());
        assert!(matches!(
            session.set_variable("a; rm -rf /", Value::Null).await,
            Err(SessionError::InvalidName(_))
        ));
        let call = CallSpec::new("ls; reboot");
        assert!(matches!(
            session.execute_function(&call).await,
            Err(SessionError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn restore_rejects_other_kind() {
        let session = Session::new(SessionConfig::shell());
        let snap = VariableSnapshot::new(InterpreterKind::Python, BTreeMap::new());
        assert!(matches!(
            session.restore(&snap).await,
            Err(SessionError::SnapshotMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn timeout_setting_is_kept() {
        let session = Session::new(SessionConfig::shell());
        session.set_execution_timeout(Duration::from_millis(125)).await;
        assert_eq!(session.execution_timeout().await, Duration::from_millis(125));
    }
}
