//! Diagnostic collection for the compile pipeline.
//!
//! Diagnostics are never raised as errors across component boundaries (see
//! the propagation policy): every pass pushes into a shared
//! [`DiagnosticCollector`] and keeps going. Only whole-compile failures use
//! [`crate::error::CompileError`].

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A position in a source file, file-qualified so diagnostics can be sorted
/// across an entire compile (file, then line, then column).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: Option<PathBuf>,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Location {
    pub fn new(file: impl Into<Option<PathBuf>>, start_line: u32, start_col: u32) -> Self {
        Self {
            file: file.into(),
            start_line,
            start_col,
            end_line: start_line,
            end_col: start_col,
        }
    }

    pub fn spanning(
        file: impl Into<Option<PathBuf>>,
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
    ) -> Self {
        Self {
            file: file.into(),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// An insertion-order tiebreaker key is kept separately by the
    /// collector; this orders by the three fields the spec names.
    fn sort_key(&self) -> (Option<&Path>, u32, u32) {
        (self.file.as_deref(), self.start_line, self.start_col)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(
                f,
                "{}:{}:{}",
                file.display(),
                self.start_line + 1,
                self.start_col + 1
            ),
            None => write!(f, "{}:{}", self.start_line + 1, self.start_col + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Groups diagnostics by the taxonomy in the error-handling design, purely
/// for statistics/filtering — the [`Severity`] is what actually governs
/// exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCategory {
    Syntax,
    NameCollision,
    MissingMetadata,
    DuplicateMetadata,
    UnknownReference,
    RuleApplicationFailure,
    RuleSetParameterMismatch,
    RuleSetParseError,
    Deprecation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: DiagnosticCategory,
    pub message: String,
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn error(category: DiagnosticCategory, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category,
            message: message.into(),
            location: None,
        }
    }

    pub fn warning(category: DiagnosticCategory, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            category,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {} ({})", self.severity, self.message, loc),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Collects diagnostics across every pass of a single compile invocation.
///
/// Its lifecycle is the compile: one collector is created per
/// [`crate::compiler::Compiler::compile`] call and handed, by reference,
/// through import, expansion, resolution and export. This replaces the
/// process-wide logger/statistics singleton the source tooling in this
/// space traditionally uses (see the redesign notes).
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    entries: Mutex<Vec<(usize, Diagnostic)>>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a diagnostic; safe to call from parallel exporters.
    pub fn push(&self, diagnostic: Diagnostic) {
        let mut entries = self.entries.lock().unwrap();
        let seq = entries.len();
        entries.push((seq, diagnostic));
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, d)| d.severity == Severity::Error)
            .count()
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, d)| d.severity)
            .max()
    }

    /// Diagnostics sorted by (file, line, column, insertion order), the
    /// deterministic order required even when exporters ran in parallel.
    pub fn sorted(&self) -> Vec<Diagnostic> {
        let mut entries = self.entries.lock().unwrap().clone();
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            let key_a = a.location.as_ref().map(Location::sort_key);
            let key_b = b.location.as_ref().map(Location::sort_key);
            match (key_a, key_b) {
                (Some(ka), Some(kb)) => ka.cmp(&kb).then(seq_a.cmp(seq_b)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => seq_a.cmp(seq_b),
            }
        });
        entries.into_iter().map(|(_, d)| d).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
