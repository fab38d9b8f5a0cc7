//! Core compiler for a shorthand authoring language that targets canonical
//! healthcare-interoperability resources (FHIR-shaped `StructureDefinition`,
//! `ValueSet`, `CodeSystem`, and friends).
//!
//! This crate is THE CORE named in the design: the grammar-driven importer,
//! the entity/rule data model with its path algebra, and the multi-pass
//! exporter. Disk configuration loading, dependency-package download, a CLI,
//! and a logging sink are deliberately out of scope here — see `fsh-cli` for
//! the thin binary that supplies them.
//!
//! [`compiler::Compiler::compile`] is the single entry point a caller needs;
//! everything else in this crate is a building block it assembles.

pub mod alias;
pub mod compiler;
pub mod config;
pub mod defstore;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod fisher;
pub mod import;
pub mod lexer;
pub mod model;
pub mod package;
pub mod parser;
pub mod path_resolver;
pub mod result;
pub mod ruleset;
pub mod soft_index;
pub mod string_lit;

pub use compiler::Compiler;
pub use config::CompilerConfig;
pub use diagnostics::DiagnosticCollector;
pub use error::CompileError;
pub use import::SourceFile;
pub use package::Package;
pub use result::Result;
