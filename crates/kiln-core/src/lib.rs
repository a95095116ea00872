//! Core of the Kiln incremental build server.
//!
//! This crate provides:
//! - Change detection between successive file-list snapshots
//! - The compile engine seam and a process-driving engine
//! - Incremental compilation state per output, with output reuse
//! - The registry of states shared by the server
//! - Debug-symbol conversion

pub mod engine;
pub mod error;
pub mod incremental;
pub mod options;
pub mod registry;
pub mod result;
pub mod symbols;
pub mod tracker;

pub use engine::{
    CommandEngine, CommandEngineConfig, CompileEngine, Diagnostic, EmitOutput, Severity,
    SourceLocation,
};
pub use error::{Error, Result};
pub use incremental::{BuildKind, BuildReport, CachedArtifact, IncrementalCompiler, OutputAction};
pub use options::{BuildOptions, DebugSymbolMode, OutputReuse, SymbolFormat, UnitOptions};
pub use registry::{BuildRegistry, BuildService};
pub use result::BuildResult;
pub use symbols::{MissingConverter, SymbolConverter, ToolConverter};
pub use tracker::{ChangeSet, ChangeTracker, FileRecord, FileSnapshot};
