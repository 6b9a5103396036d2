//! Interpreter families: everything that differs between Python, R and sh.
//!
//! The marker protocol and stream readers are shared. A family only
//! supplies the per-language pieces:
//!
//! - how to launch the REPL and which sentinel to print
//! - what prompt/banner noise to strip
//! - which stderr signatures mean a call failed
//! - how to wrap multi-statement code so it runs as one unit
//! - how values and calls are rendered as source text, and parsed back

mod python;
mod r;
mod shell;

pub use python::PythonFamily;
pub use r::RFamily;
pub use shell::ShellFamily;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ferry_types::{CallSpec, Value};
use serde::{Deserialize, Serialize};

use crate::classifier::SignatureClassifier;
use crate::reader::NoiseFilter;

/// Which interpreter a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpreterKind {
    Python,
    R,
    #[serde(alias = "sh")]
    Shell,
}

impl InterpreterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpreterKind::Python => "python",
            InterpreterKind::R => "r",
            InterpreterKind::Shell => "shell",
        }
    }

    pub fn all() -> [InterpreterKind; 3] {
        [InterpreterKind::Python, InterpreterKind::R, InterpreterKind::Shell]
    }
}

impl fmt::Display for InterpreterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterpreterKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(InterpreterKind::Python),
            "r" => Ok(InterpreterKind::R),
            "shell" | "sh" => Ok(InterpreterKind::Shell),
            other => Err(format!(
                "invalid interpreter kind: {other} (expected 'python', 'r' or 'sh')"
            )),
        }
    }
}

/// The registered family for a kind.
pub fn family_for(kind: InterpreterKind) -> Arc<dyn InterpreterFamily> {
    match kind {
        InterpreterKind::Python => Arc::new(PythonFamily),
        InterpreterKind::R => Arc::new(RFamily),
        InterpreterKind::Shell => Arc::new(ShellFamily),
    }
}

/// Per-language knowledge used by sessions and the marker protocol.
pub trait InterpreterFamily: Send + Sync + fmt::Debug {
    fn kind(&self) -> InterpreterKind;

    /// Default program name, looked up on PATH.
    fn program(&self) -> &str;

    /// Arguments that put the program into a pipe-driven REPL.
    fn args(&self) -> Vec<String>;

    /// Extra environment for the child.
    fn env(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Fixed, improbable marker prefix.
    fn sentinel(&self) -> &str;

    fn stdout_filter(&self) -> NoiseFilter;

    fn stderr_filter(&self) -> NoiseFilter;

    /// Default exception signatures.
    fn classifier(&self) -> SignatureClassifier;

    /// Leading words that make even a single line a block.
    fn block_keywords(&self) -> &[&str];

    /// Statement that prints `marker` on its own line and flushes stdout.
    fn marker_statement(&self, marker: &str) -> String;

    /// Wrap a multi-statement body so it and the marker print run as one unit.
    fn wrap_block(&self, code: &str, marker: &str) -> String;

    /// Helper code installed once per interpreter start.
    ///
    /// Must be a single line so it travels as a single-unit request.
    fn prelude(&self) -> Option<String> {
        None
    }

    /// Render a value as a source literal.
    fn render_value(&self, value: &Value) -> String;

    /// Render a call with literal arguments.
    fn render_call(&self, call: &CallSpec) -> String {
        let mut args: Vec<String> = call
            .positional
            .iter()
            .map(|v| self.render_value(v))
            .collect();
        args.extend(
            call.keyword
                .iter()
                .map(|(k, v)| format!("{k}={}", self.render_value(v))),
        );
        format!("{}({})", call.target, args.join(", "))
    }

    /// Statement assigning `value` to `name`.
    fn assign(&self, name: &str, value: &Value) -> String;

    /// Code whose output is the value of `name`.
    fn fetch(&self, name: &str) -> String;

    /// Code whose output describes every variable in `names`.
    fn capture(&self, names: &[String]) -> String;

    /// Decode output produced by [`fetch`](Self::fetch) or by evaluation.
    fn parse_value(&self, output: &str) -> Value {
        Value::from_output(output)
    }

    /// Decode output produced by [`capture`](Self::capture).
    fn parse_capture(&self, _names: &[String], output: &str) -> Value {
        self.parse_value(output)
    }

    /// Whether `name` can be interpolated as a variable name.
    fn is_valid_name(&self, name: &str) -> bool {
        is_identifier(name)
    }

    /// Whether `target` can be interpolated as a call target.
    fn is_valid_target(&self, target: &str) -> bool {
        !target.is_empty() && target.split('.').all(|part| self.is_valid_name(part))
    }

    /// True when a single line would leave the REPL waiting for a
    /// continuation line, which would swallow the marker statement.
    fn leaves_open(&self, _line: &str) -> bool {
        false
    }

    /// True for code that must go through [`wrap_block`](Self::wrap_block).
    fn is_multi_statement(&self, code: &str) -> bool {
        let code = code.trim();
        if code.contains('\n') || self.leaves_open(code) {
            return true;
        }
        self.block_keywords().iter().any(|kw| {
            code.strip_prefix(kw).is_some_and(|rest| {
                let ends_word = kw
                    .chars()
                    .last()
                    .is_some_and(|c| !(c.is_alphanumeric() || c == '_'));
                ends_word || rest.is_empty() || !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_')
            })
        })
    }

    /// Final text written to stdin for one request, newline-terminated.
    fn frame(&self, code: &str, marker: &str) -> String {
        let code = code.trim_end();
        if self.is_multi_statement(code) {
            format!("{}\n", self.wrap_block(code, marker))
        } else {
            format!("{code}\n{}\n", self.marker_statement(marker))
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A double-quoted literal with JSON escapes.
///
/// JSON's escape set (`\"`, `\\`, `\n`, `\uXXXX`) is understood by both
/// Python and R string literals.
pub fn quoted(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}
