//! Result alias for whole-compile operations.

use crate::error::CompileError;

pub type Result<T> = std::result::Result<T, CompileError>;
