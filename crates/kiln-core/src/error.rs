//! Error types for kiln-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for kiln-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kiln-core.
#[derive(Debug, Error)]
pub enum Error {
    /// A reference could not be resolved by the compile engine.
    #[error("unresolved reference: {path}: {message}")]
    UnresolvedReference { path: PathBuf, message: String },

    /// A source file could not be read or parsed by the compile engine.
    #[error("cannot parse source: {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The compile engine itself failed (not a diagnostic).
    #[error("compile engine failure: {0}")]
    Engine(String),

    /// Debug-symbol conversion failed.
    #[error("debug symbol conversion failed: {0}")]
    SymbolConversion(String),

    /// Writing or reading a build artifact failed.
    #[error("IO error at {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A build state lock was poisoned by a panicking build.
    #[error("build state lock poisoned: {0}")]
    Poisoned(String),
}

impl Error {
    /// Whether this error was caused by a build input rather than by infrastructure.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::UnresolvedReference { .. } | Error::Parse { .. })
    }
}
