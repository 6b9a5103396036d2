//! Call descriptions handed to a session by an upstream parser.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A function call to run inside an interpreter.
///
/// Produced by whatever front end parses the host language; ferry only
/// renders it into the target interpreter's call syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
    /// Function name as the interpreter sees it (may be dotted, e.g. `math.sqrt`).
    pub target: String,
    /// Positional arguments, in order.
    #[serde(default)]
    pub positional: Vec<Value>,
    /// Keyword arguments, in order.
    #[serde(default)]
    pub keyword: Vec<(String, Value)>,
}

impl CallSpec {
    /// A call with no arguments.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            positional: Vec::new(),
            keyword: Vec::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    /// Short human-readable label, used for job listings.
    pub fn label(&self) -> String {
        let argc = self.positional.len() + self.keyword.len();
        format!("{}/{}", self.target, argc)
    }
}
