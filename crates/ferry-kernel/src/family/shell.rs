//! POSIX `sh` driven interactively over pipes.
//!
//! `-i` keeps the shell alive after syntax errors in special builtins such
//! as `eval`. Interactive shells write prompts and job-control warnings to
//! stderr; both are filtered.

use ferry_types::Value;

use super::{InterpreterFamily, InterpreterKind};
use crate::classifier::SignatureClassifier;
use crate::reader::NoiseFilter;

const SENTINEL: &str = "__FERRY_SH_c04e8b__";

#[derive(Debug, Clone, Copy, Default)]
pub struct ShellFamily;

impl InterpreterFamily for ShellFamily {
    fn kind(&self) -> InterpreterKind {
        InterpreterKind::Shell
    }

    fn program(&self) -> &str {
        "sh"
    }

    fn args(&self) -> Vec<String> {
        vec!["-i".into()]
    }

    fn env(&self) -> Vec<(String, String)> {
        vec![
            ("PS1".into(), String::new()),
            ("PS2".into(), String::new()),
            ("ENV".into(), String::new()),
        ]
    }

    fn sentinel(&self) -> &str {
        SENTINEL
    }

    fn stdout_filter(&self) -> NoiseFilter {
        NoiseFilter::default()
    }

    fn stderr_filter(&self) -> NoiseFilter {
        NoiseFilter::new(
            ["$ ", "# ", "> "],
            [
                "sh: 0: can't access tty",
                "sh: cannot set terminal process group",
                "sh: no job control in this shell",
                "bash: cannot set terminal process group",
                "bash: no job control in this shell",
            ],
        )
    }

    fn classifier(&self) -> SignatureClassifier {
        SignatureClassifier::new(
            "shell",
            [
                ": not found",
                "command not found",
                "Syntax error",
                "syntax error",
                "No such file or directory",
                "Permission denied",
            ],
        )
    }

    fn block_keywords(&self) -> &[&str] {
        &["if", "for", "while", "until", "case", "{", "("]
    }

    fn marker_statement(&self, marker: &str) -> String {
        format!("echo '{marker}'")
    }

    fn wrap_block(&self, code: &str, marker: &str) -> String {
        format!("eval {}; echo '{marker}'", single_quoted(code))
    }

    fn prelude(&self) -> Option<String> {
        Some("PS1=''; PS2=''; unset PROMPT_COMMAND 2>/dev/null; true".into())
    }

    fn render_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "''".into(),
            other => single_quoted(&other.to_string()),
        }
    }

    fn render_call(&self, call: &ferry_types::CallSpec) -> String {
        let mut words = vec![call.target.clone()];
        words.extend(call.positional.iter().map(|v| self.render_value(v)));
        words.extend(
            call.keyword
                .iter()
                .map(|(k, v)| format!("--{k}={}", self.render_value(v))),
        );
        words.join(" ")
    }

    fn assign(&self, name: &str, value: &Value) -> String {
        format!("{name}={}", self.render_value(value))
    }

    fn fetch(&self, name: &str) -> String {
        format!("printf '%s\\n' \"${name}\"")
    }

    fn capture(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| format!("printf '%s\\t%s\\n' {n} \"${n}\""))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Lines are `name<TAB>value`; a line without a tab continues the
    /// previous value.
    fn parse_capture(&self, names: &[String], output: &str) -> Value {
        let mut map = serde_json::Map::new();
        let mut current: Option<(String, String)> = None;
        for line in output.lines() {
            match line.split_once('\t') {
                Some((name, value)) if names.iter().any(|n| n == name) => {
                    if let Some((k, v)) = current.take() {
                        map.insert(k, serde_json::Value::String(v));
                    }
                    current = Some((name.to_string(), value.to_string()));
                }
                _ => {
                    if let Some((_, v)) = current.as_mut() {
                        v.push('\n');
                        v.push_str(line);
                    }
                }
            }
        }
        if let Some((k, v)) = current {
            map.insert(k, serde_json::Value::String(v));
        }
        Value::Json(serde_json::Value::Object(map))
    }

    fn is_valid_target(&self, target: &str) -> bool {
        !target.is_empty()
            && target
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
    }
}

/// Quote for sh: `'` becomes `'\''`.
fn single_quoted(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
