//! Output formatting for the REPL.
//!
//! Values print with quotes on strings so `"1"` and `1` stay distinguishable.
//! Failures carry their kind so a timeout never reads like an exception.

use ferry_kernel::{JobInfo, JobNotification, JobStatus, SessionError, Value};

/// Format a Value for display (with quotes on strings).
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        // Multi-line output reads better unquoted
        Value::String(s) if s.contains('\n') => s.clone(),
        Value::String(s) => format!("\"{s}\""),
        Value::Json(json) => {
            serde_json::to_string_pretty(json).unwrap_or_else(|_| json.to_string())
        }
    }
}

/// `✗ [kind] message`, plus a restart hint when the session is gone.
pub fn format_error(err: &SessionError) -> String {
    let kind = err.kind();
    let mut out = format!("✗ [{kind}] {err}");
    if kind.invalidates_session() {
        out.push_str("\n  (interpreter stopped; /restart to start a fresh one)");
    }
    out
}

/// One job, with its outcome when finished.
pub fn format_job(info: &JobInfo) -> String {
    let mut out = format!("[{}] {} {}", info.id, status_mark(info.status), info.command);
    if let Some(result) = &info.result {
        out.push_str(&format!("\n  => {}", format_value(result)));
    }
    if let Some(error) = &info.error {
        out.push_str(&format!("\n  !! {error}"));
    }
    if let Some(ended) = info.ended_at {
        let took = ended - info.started_at;
        out.push_str(&format!("\n  took {}ms", took.num_milliseconds()));
    }
    out
}

/// The line printed before the next prompt when a job finishes.
pub fn format_notification(note: &JobNotification) -> String {
    let outcome = match (&note.result, &note.error) {
        (_, Some(error)) => error.to_string(),
        (Some(value), None) => format_value(value),
        (None, None) => "done".to_string(),
    };
    format!(
        "[{}] {} {}: {}",
        note.id,
        status_mark(note.status),
        note.command,
        outcome
    )
}

fn status_mark(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Running => "…",
        JobStatus::Completed => "✓",
        JobStatus::Failed => "✗",
    }
}
