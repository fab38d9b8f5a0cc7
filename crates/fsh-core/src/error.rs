//! Whole-compile error type.
//!
//! Per-rule and per-entity failures never reach here — they become
//! [`crate::diagnostics::Diagnostic`]s and the surrounding entity or
//! artifact survives. `CompileError` is reserved for conditions where
//! continuing would be meaningless.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("no source files supplied")]
    NoSources,
}
