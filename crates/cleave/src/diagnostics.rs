//! Recoverable build diagnostics
//!
//! Warnings are attached to the compilation and never abort the build. Each one
//! carries the identities of the modules and chunks involved so tooling can
//! point users at the responsible entry or import.

use std::fmt;

use log::warn;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// Module is not reachable from any entry and was left out of every chunk
    OrphanModule,
    /// Split-chunks hit its iteration cap; the last valid state was kept
    OptimizationDidNotConverge,
    /// A single module is larger than a cache group's `max-size`
    MaxSizeExceeded,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrphanModule => write!(f, "orphan-module"),
            Self::OptimizationDidNotConverge => write!(f, "optimization-did-not-converge"),
            Self::MaxSizeExceeded => write!(f, "max-size-exceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    /// Identities of the implicated modules
    pub modules: Vec<String>,
    /// Names or identities of the implicated chunks
    pub chunks: Vec<String>,
}

impl Diagnostic {
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            modules: Vec::new(),
            chunks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_modules(mut self, modules: impl IntoIterator<Item = String>) -> Self {
        self.modules.extend(modules);
        self
    }

    #[must_use]
    pub fn with_chunks(mut self, chunks: impl IntoIterator<Item = String>) -> Self {
        self.chunks.extend(chunks);
        self
    }
}

/// Ordered list of diagnostics collected during one build
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        warn!("[{}] {}", diagnostic.kind, diagnostic.message);
        self.0.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: Diagnostics) {
        self.0.extend(diagnostics.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(move |d| d.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
