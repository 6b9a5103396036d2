//! Deciding whether stderr text means a call failed.
//!
//! Interpreters write plenty to stderr that is not a failure: deprecation
//! warnings, package startup messages, progress bars. Only text carrying a
//! known exception signature turns a round trip into a failure. The
//! signatures differ per interpreter family, so the decision is a trait.

use std::sync::Arc;

/// Classifier decision for accumulated stderr text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Diagnostic noise. Discarded once the call succeeds.
    Benign,
    /// The interpreter reported an exception or syntax error.
    Fatal,
}

/// Pluggable stderr predicate, one per interpreter family.
pub trait OutputClassifier: Send + Sync {
    fn classify(&self, stderr: &str) -> Verdict;

    /// Family tag, for logs.
    fn family(&self) -> &str;
}

/// Substring matcher over a fixed set of signatures.
///
/// Each signature is tested against the whole text; if it starts with `^`
/// it only matches at the beginning of a line.
#[derive(Debug, Clone)]
pub struct SignatureClassifier {
    family: String,
    signatures: Vec<String>,
}

impl SignatureClassifier {
    pub fn new<I, S>(family: impl Into<String>, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            family: family.into(),
            signatures: signatures.into_iter().map(Into::into).collect(),
        }
    }

    /// Register an extra signature.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signatures.push(signature.into());
        self
    }

    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }

    pub fn into_shared(self) -> Arc<dyn OutputClassifier> {
        Arc::new(self)
    }

    fn matches(&self, text: &str) -> bool {
        self.signatures.iter().any(|sig| match sig.strip_prefix('^') {
            Some(anchored) => text.lines().any(|line| line.trim_start().starts_with(anchored)),
            None => text.contains(sig.as_str()),
        })
    }
}

impl OutputClassifier for SignatureClassifier {
    fn classify(&self, stderr: &str) -> Verdict {
        if self.matches(stderr) {
            Verdict::Fatal
        } else {
            Verdict::Benign
        }
    }

    fn family(&self) -> &str {
        &self.family
    }
}
