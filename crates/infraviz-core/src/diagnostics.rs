use serde::{Deserialize, Serialize};

use crate::pipeline::PassKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
}

/// A non-fatal finding raised while transforming a graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<PassKind>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub message: String,
}

/// Collects degraded-but-correct outcomes for operators. Every entry is also
/// emitted as a `tracing` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    #[serde(skip)]
    pass: Option<PassKind>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute subsequent entries to `pass`.
    pub fn enter(&mut self, pass: PassKind) {
        self.pass = Some(pass);
    }

    pub fn leave(&mut self) {
        self.pass = None;
    }

    pub fn info(&mut self, node: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(pass = ?self.pass, node, "{message}");
        self.push(Severity::Info, node, message);
    }

    pub fn warn(&mut self, node: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(pass = ?self.pass, node, "{message}");
        self.push(Severity::Warning, node, message);
    }

    fn push(&mut self, severity: Severity, node: Option<&str>, message: String) {
        self.entries.push(Diagnostic {
            pass: self.pass,
            severity,
            node: node.map(str::to_string),
            message,
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
