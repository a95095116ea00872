//! The compile engine seam.
//!
//! The engine does the actual parsing, semantic analysis and code
//! generation. The incremental state never looks inside engine handles: it
//! stores them, hands them back for add/remove operations, and asks the
//! engine to emit the aggregate unit.
//!
//! # Architecture
//!
//! ```text
//! reference path ──► resolve_reference ──► Reference ─┐
//!                                                     ├─► build_unit ──► Unit ──► emit ──► EmitOutput
//! source path ─────► parse_source ───────► Source ────┘        ▲
//!                                                              │
//!                          add_/remove_reference, add_/remove_source (incremental)
//! ```

pub mod command;

use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::options::{SymbolFormat, UnitOptions};

pub use command::{CommandEngine, CommandEngineConfig};

/// Interface to the external compiler.
///
/// Handles are opaque to the caller. `Sync` is required because a full build
/// resolves and parses inputs in parallel.
pub trait CompileEngine: Send + Sync {
    /// Resolved reference (e.g. loaded metadata of a library).
    type Reference: Send + Sync;
    /// Parsed source unit.
    type Source: Send + Sync;
    /// Aggregate compilation built from sources and references.
    type Unit: Send;

    /// Resolve a reference. `path` is absolute.
    fn resolve_reference(&self, path: &Path) -> Result<Self::Reference>;

    /// Read and parse a source file. `path` is absolute.
    fn parse_source(&self, path: &Path, defines: &[String]) -> Result<Self::Source>;

    /// Build a unit from scratch.
    fn build_unit(
        &self,
        sources: &[&Self::Source],
        references: &[&Self::Reference],
        options: &UnitOptions,
    ) -> Result<Self::Unit>;

    fn add_reference(&self, unit: &mut Self::Unit, reference: &Self::Reference);

    fn remove_reference(&self, unit: &mut Self::Unit, reference: &Self::Reference);

    fn add_source(&self, unit: &mut Self::Unit, source: &Self::Source);

    fn remove_source(&self, unit: &mut Self::Unit, source: &Self::Source);

    /// Emit the unit into memory.
    ///
    /// Compile errors are reported through [`EmitOutput::diagnostics`];
    /// `Err` is reserved for failures of the engine itself.
    fn emit(&self, unit: &Self::Unit, symbols: Option<SymbolFormat>) -> Result<EmitOutput>;
}

/// In-memory result of an emit.
#[derive(Debug, Clone, Default)]
pub struct EmitOutput {
    pub binary: Vec<u8>,
    pub symbols: Option<Vec<u8>>,
    pub diagnostics: Vec<Diagnostic>,
    pub success: bool,
}

/// Diagnostic severity as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Hidden,
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Parse an engine severity name. Unknown names map to `Hidden`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "error" => Severity::Error,
            "warning" => Severity::Warning,
            "info" | "note" => Severity::Info,
            _ => Severity::Hidden,
        }
    }
}

/// A location in source code (1-indexed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.file, self.line, self.column)
    }
}

/// A single compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub location: Option<SourceLocation>,
    /// The engine escalated this warning to an error.
    pub warning_as_error: bool,
}

impl Diagnostic {
    /// `path(line,col): kind code: message`, or `kind code: message` without a location.
    pub fn format(&self, kind: &str) -> String {
        match &self.location {
            Some(loc) => format!("{loc}: {kind} {}: {}", self.code, self.message),
            None => format!("{kind} {}: {}", self.code, self.message),
        }
    }
}
