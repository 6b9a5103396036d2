//! Session behavior against the scripted in-memory interpreter.
//!
//! Tests verify:
//! - values, absent values and benign stderr
//! - exception classification, including diagnostics that trail the marker
//! - timeouts invalidate the session; restart recovers it
//! - one call in flight per session, whatever the number of callers
//! - variable cache, capture, snapshots

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{FakeTransport, fake_session, shell_config};
use async_trait::async_trait;
use ferry_kernel::{
    CallSpec, ErrorKind, ExecError, InterpreterKind, Session, SessionError, Transport,
    TransportError, TransportStreams, Value, VariableSnapshot,
};

// ============================================================================
// Values
// ============================================================================

#[tokio::test]
async fn test_eval_returns_decoded_output() {
    let (session, _) = fake_session(shell_config()).await;
    assert_eq!(session.eval("say 2").await.unwrap(), Value::Int(2));
    assert_eq!(
        session.eval("say hello").await.unwrap(),
        Value::String("hello".into())
    );
}

#[tokio::test]
async fn test_no_output_is_null_not_failure() {
    let (session, _) = fake_session(shell_config()).await;
    assert_eq!(session.eval("noop").await.unwrap(), Value::Null);
    assert!(session.is_ready());
}

#[tokio::test]
async fn test_benign_stderr_is_discarded() {
    let (session, _) = fake_session(shell_config()).await;
    let value = session.eval("warn DeprecationWarning: old; say ok").await.unwrap();
    assert_eq!(value, Value::String("ok".into()));
}

#[tokio::test]
async fn test_execute_function_renders_literal_args() {
    let (session, _) = fake_session(shell_config()).await;
    let call = CallSpec::new("say").arg("hi");
    assert_eq!(
        session.execute_function(&call).await.unwrap(),
        Value::String("hi".into())
    );
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_exception_keeps_session_ready() {
    let (session, _) = fake_session(shell_config()).await;

    let err = session.eval("fail frobnicate").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exception);
    assert!(err.to_string().contains("frobnicate: not found"));
    assert!(session.is_ready());

    assert_eq!(session.eval("say 3").await.unwrap(), Value::Int(3));
}

#[tokio::test]
async fn test_fatal_stderr_wins_over_captured_result() {
    let (session, _) = fake_session(shell_config()).await;
    let err = session.eval("say 1; deferred_fail late").await.unwrap_err();
    match err {
        SessionError::Exec(ExecError::Exception { text }) => assert!(text.contains("late")),
        other => panic!("expected exception, got {other:?}"),
    }
    assert_eq!(session.eval("say 4").await.unwrap(), Value::Int(4));
}

#[tokio::test]
async fn test_stale_marker_is_never_mistaken_for_current() {
    let (session, _) = fake_session(shell_config()).await;
    let value = session.eval("stale; say real").await.unwrap();
    assert_eq!(value, Value::String("real".into()));
}

#[tokio::test]
async fn test_timeout_invalidates_session() {
    let (session, stats) = fake_session(shell_config()).await;
    session.set_execution_timeout(Duration::from_millis(10)).await;

    let started = Instant::now();
    let err = session.eval("hang").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!session.is_ready());
    assert_eq!(stats.kills(), 1);

    let err = session.eval("say 1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
}

#[tokio::test]
async fn test_timeout_reports_partial_stderr() {
    let (session, _) = fake_session(shell_config()).await;
    session.set_execution_timeout(Duration::from_millis(50)).await;
    let err = session.eval("warn still working; hang").await.unwrap_err();
    assert!(err.to_string().contains("still working"), "{err}");
}

#[tokio::test]
async fn test_process_exit_is_transport_failure() {
    let (session, _) = fake_session(shell_config()).await;
    let err = session.eval("exit").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!session.is_ready());
}

#[tokio::test]
async fn test_exit_after_fatal_line_invalidates_session() {
    let (session, _) = fake_session(shell_config()).await;
    let err = session.eval("fail gone; sleep 10; exit").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!session.is_ready());
}

#[tokio::test]
async fn test_restart_recovers_after_timeout() {
    let (session, stats) = fake_session(shell_config()).await;
    session.set_execution_timeout(Duration::from_millis(10)).await;
    let _ = session.eval("hang").await;
    assert!(!session.is_ready());

    session.restart().await.unwrap();
    assert!(session.is_ready());
    assert_eq!(stats.starts(), 2);
    session.set_execution_timeout(Duration::from_secs(5)).await;
    assert_eq!(session.eval("say 5").await.unwrap(), Value::Int(5));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_overlap() {
    let (session, stats) = fake_session(shell_config()).await;

    let mut handles = Vec::new();
    for i in 0..8i64 {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            session.eval(&format!("sleep 5; say {i}")).await
        }));
    }

    let mut seen = Vec::new();
    for handle in handles {
        seen.push(handle.await.unwrap().unwrap());
    }
    seen.sort_by_key(|v| v.as_i64());
    assert_eq!(seen, (0..8).map(Value::Int).collect::<Vec<_>>());
    assert_eq!(stats.max_in_flight(), 1);
}

#[tokio::test]
async fn test_block_runs_in_one_round_trip() {
    let (session, stats) = fake_session(shell_config()).await;
    let before = stats.markers();
    let value = session
        .execute_code_block("say first\nsay ok", &[])
        .await
        .unwrap();
    assert_eq!(value, Value::String("first\nok".into()));
    assert_eq!(stats.markers() - before, 1);
}

// ============================================================================
// Variables
// ============================================================================

#[tokio::test]
async fn test_set_and_get_variable_mirror_cache() {
    let (session, _) = fake_session(shell_config()).await;
    session.set_variable("greeting", Value::from("hi there")).await.unwrap();

    assert_eq!(
        session.get_variable("greeting").await.unwrap(),
        Value::String("hi there".into())
    );
    assert_eq!(session.get_variable("unset_var").await.unwrap(), Value::Null);

    let cache = session.cached_variables().await;
    assert_eq!(cache.get("greeting"), Some(&Value::String("hi there".into())));
    assert_eq!(cache.get("unset_var"), Some(&Value::Null));
}

#[tokio::test]
async fn test_code_block_captures_names() {
    let (session, _) = fake_session(shell_config()).await;
    let captured = session
        .execute_code_block("a='one'\nb='two'", &["a", "b"])
        .await
        .unwrap();
    assert_eq!(
        captured,
        Value::Json(serde_json::json!({"a": "one", "b": "two"}))
    );
    let cache = session.cached_variables().await;
    assert_eq!(cache.get("b"), Some(&Value::String("two".into())));
}

#[tokio::test]
async fn test_invalid_capture_name_is_rejected() {
    let (session, stats) = fake_session(shell_config()).await;
    let before = stats.markers();
    let err = session
        .execute_code_block("noop", &["ok", "$(reboot)"])
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidName(_)));
    assert_eq!(stats.markers(), before);
}

#[tokio::test]
async fn test_restart_replays_cache_when_enabled() {
    let (session, _) = fake_session(shell_config().with_replay_on_restart(true)).await;
    session.set_variable("kept", Value::from("yes")).await.unwrap();

    session.restart().await.unwrap();
    assert_eq!(
        session.get_variable("kept").await.unwrap(),
        Value::String("yes".into())
    );
}

#[tokio::test]
async fn test_restart_clears_cache_by_default() {
    let (session, _) = fake_session(shell_config()).await;
    session.set_variable("gone", Value::from("x")).await.unwrap();
    session.restart().await.unwrap();
    assert!(session.cached_variables().await.is_empty());
    assert_eq!(session.get_variable("gone").await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_snapshot_restores_into_fresh_session() {
    let (source, _) = fake_session(shell_config()).await;
    source.set_variable("city", Value::from("Oslo")).await.unwrap();
    let snapshot = source.snapshot().await;
    assert_eq!(snapshot.kind, InterpreterKind::Shell);

    let (target, _) = fake_session(shell_config()).await;
    assert_eq!(target.restore(&snapshot).await.unwrap(), 1);
    assert_eq!(
        target.get_variable("city").await.unwrap(),
        Value::String("Oslo".into())
    );
}

#[tokio::test]
async fn test_cleanup_forgets_everything() {
    let (session, stats) = fake_session(shell_config()).await;
    session.set_variable("x", Value::from("1")).await.unwrap();
    session.cleanup().await;

    assert!(!session.is_ready());
    assert!(session.cached_variables().await.is_empty());
    assert_eq!(stats.kills(), 1);
    assert_eq!(session.eval("say 1").await.unwrap_err().kind(), ErrorKind::NotReady);
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let (transport, stats) = FakeTransport::new();
    let session = Arc::new(Session::with_transport(shell_config(), Box::new(transport)));
    session.initialize().await.unwrap();
    session.initialize().await.unwrap();
    assert_eq!(stats.starts(), 1);

    let empty = VariableSnapshot::new(InterpreterKind::Shell, BTreeMap::new());
    assert_eq!(session.restore(&empty).await.unwrap(), 0);
}

/// Starts, but every stream is already closed and kill always fails.
struct DeadOnArrival {
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for DeadOnArrival {
    async fn start(&mut self) -> Result<TransportStreams, TransportError> {
        let (stdin, _) = tokio::io::duplex(64);
        let (_, stdout) = tokio::io::duplex(64);
        let (_, stderr) = tokio::io::duplex(64);
        Ok(TransportStreams {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        })
    }

    async fn kill(&mut self) -> Result<(), TransportError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Kill(std::io::Error::other("already gone")))
    }

    fn is_alive(&mut self) -> bool {
        false
    }

    fn describe(&self) -> String {
        "dead-on-arrival".into()
    }
}

#[tokio::test]
async fn test_failed_start_survives_failing_kill() {
    let kills = Arc::new(AtomicUsize::new(0));
    let transport = DeadOnArrival { kills: kills.clone() };
    let session = Session::with_transport(shell_config(), Box::new(transport));

    let err = session.initialize().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!session.is_ready());
    assert!(kills.load(Ordering::SeqCst) >= 1);
}
