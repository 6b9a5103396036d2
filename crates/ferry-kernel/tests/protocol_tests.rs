//! The marker channel on its own, without a session around it.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::FakeTransport;
use ferry_kernel::classifier::{OutputClassifier, SignatureClassifier, Verdict};
use ferry_kernel::family::{InterpreterKind, family_for};
use ferry_kernel::protocol::{ChannelOptions, MarkerChannel};
use ferry_kernel::{ExecError, Transport, TransportError};

async fn channel(
    classifier: Arc<dyn OutputClassifier>,
    timeout: Duration,
) -> (MarkerChannel, FakeTransport) {
    let (mut transport, _) = FakeTransport::new();
    let streams = transport.start().await.unwrap();
    let channel = MarkerChannel::attach(
        streams,
        family_for(InterpreterKind::Shell),
        classifier,
        ChannelOptions {
            timeout,
            trailing_drain: Duration::from_millis(30),
        },
    );
    (channel, transport)
}

fn shell_classifier() -> Arc<dyn OutputClassifier> {
    family_for(InterpreterKind::Shell).classifier().into_shared()
}

#[tokio::test]
async fn test_execution_ids_increase_per_channel() {
    let (mut a, mut ta) = channel(shell_classifier(), Duration::from_secs(5)).await;
    let (b, _tb) = channel(shell_classifier(), Duration::from_secs(5)).await;

    assert_eq!(a.next_execution_id(), 1);
    a.execute("noop", &mut ta).await.unwrap();
    a.execute("noop", &mut ta).await.unwrap();
    assert_eq!(a.next_execution_id(), 3);
    assert_eq!(b.next_execution_id(), 1);
}

#[tokio::test]
async fn test_output_is_trimmed() {
    let (mut chan, mut t) = channel(shell_classifier(), Duration::from_secs(5)).await;
    let out = chan.execute("say   padded  ", &mut t).await.unwrap();
    assert_eq!(out, "padded");
}

#[tokio::test]
async fn test_custom_classifier_overrides_family() {
    let strict = SignatureClassifier::new("strict", ["DeprecationWarning"]).into_shared();
    let (mut chan, mut t) = channel(strict, Duration::from_secs(5)).await;

    match chan.execute("warn DeprecationWarning: old api", &mut t).await {
        Err(ExecError::Exception { text }) => assert!(text.contains("old api")),
        other => panic!("expected exception, got {other:?}"),
    }
    // The default shell signatures no longer apply.
    assert_eq!(chan.execute("fail nothing; say 1", &mut t).await.unwrap(), "1");
}

#[tokio::test]
async fn test_timeout_kills_and_closes_channel() {
    let (mut chan, mut t) = channel(shell_classifier(), Duration::from_millis(10)).await;
    match chan.execute("hang", &mut t).await {
        Err(ExecError::Timeout { timeout, .. }) => assert_eq!(timeout, Duration::from_millis(10)),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!chan.is_open());
    assert!(!t.is_alive());
    assert!(matches!(
        chan.execute("say 1", &mut t).await,
        Err(ExecError::Transport(TransportError::Closed))
    ));
}

#[tokio::test]
async fn test_abandoned_output_does_not_leak_into_next_call() {
    let (mut chan, mut t) = channel(shell_classifier(), Duration::from_secs(5)).await;
    // Frames for markers nobody waits on, plus leftover stderr.
    chan.execute("stale; warn leftover; say first", &mut t).await.unwrap();
    chan.execute("stale; stale", &mut t).await.unwrap();
    assert_eq!(chan.execute("say second", &mut t).await.unwrap(), "second");
}

/// Shell signatures, remembering every text it was asked about.
#[derive(Default)]
struct RecordingClassifier {
    seen: Mutex<Vec<String>>,
}

impl OutputClassifier for RecordingClassifier {
    fn classify(&self, stderr: &str) -> Verdict {
        self.seen.lock().unwrap().push(stderr.to_string());
        family_for(InterpreterKind::Shell).classifier().classify(stderr)
    }

    fn family(&self) -> &str {
        "recording"
    }
}

#[tokio::test]
async fn test_each_stderr_line_is_classified_once() {
    let recorder = Arc::new(RecordingClassifier::default());
    let (mut chan, mut t) = channel(recorder.clone(), Duration::from_secs(5)).await;

    let out = chan
        .execute("warn one; warn two; warn three; say ok", &mut t)
        .await
        .unwrap();
    assert_eq!(out, "ok");

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(seen, ["one", "two", "three"]);
}

#[tokio::test]
async fn test_fatal_line_found_among_noise() {
    let recorder = Arc::new(RecordingClassifier::default());
    let (mut chan, mut t) = channel(recorder.clone(), Duration::from_secs(5)).await;

    match chan.execute("warn chatter; fail nope; warn after", &mut t).await {
        Err(ExecError::Exception { text }) => {
            assert!(text.contains("chatter"), "{text}");
            assert!(text.contains("nope: not found"), "{text}");
        }
        other => panic!("expected exception, got {other:?}"),
    }
    assert!(recorder.seen.lock().unwrap().iter().all(|text| !text.contains('\n')));
}

#[tokio::test]
async fn test_output_closing_after_fatal_line_is_transport_failure() {
    let (mut chan, mut t) = channel(shell_classifier(), Duration::from_secs(5)).await;
    // The fatal line ends the wait early; stdout then closes during the drain.
    match chan.execute("fail gone; sleep 10; exit", &mut t).await {
        Err(ExecError::Transport(TransportError::Closed)) => {}
        other => panic!("expected closed transport, got {other:?}"),
    }
    assert!(!chan.is_open());
}
