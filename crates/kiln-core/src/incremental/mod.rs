//! Incremental compilation state for one output.
//!
//! An [`IncrementalCompiler`] owns the engine session for a single output
//! binary. The first request, and any request whose identity differs from
//! the previous one, performs a full build. Every other request diffs the
//! reference and source lists against the previous request and applies only
//! the delta to the engine unit before emitting.
//!
//! When the reuse policy allows it and nothing relevant changed, the bytes of
//! the last successful emit are written again without running the engine.

mod artifact;
mod session;

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::engine::CompileEngine;
use crate::error::{Error, Result};
use crate::options::{
    BuildOptions, DebugSymbolMode, OutputReuse, SymbolFormat, native_symbol_path,
    portable_symbol_path,
};
use crate::result::BuildResult;
use crate::symbols::SymbolConverter;
use crate::tracker::ChangeSet;

pub use artifact::{CachedArtifact, write_artifact};
pub use session::Session;

/// How the last request was compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    Full,
    Incremental,
}

/// What the last request wrote to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputAction {
    Emitted,
    Reused,
}

/// Summary of the last completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub kind: BuildKind,
    pub action: OutputAction,
    pub references: ChangeSet,
    pub sources: ChangeSet,
}

/// Compilation state for one output binary.
///
/// Not synchronized: the registry holds each state behind its own mutex.
pub struct IncrementalCompiler<E: CompileEngine> {
    engine: Arc<E>,
    converter: Arc<dyn SymbolConverter>,
    /// Options of the last request that produced or updated the session.
    options: Option<BuildOptions>,
    session: Option<Session<E>>,
    artifact: Option<CachedArtifact>,
    last_report: Option<BuildReport>,
    /// Number of sessions created so far.
    generation: u64,
}

impl<E: CompileEngine> IncrementalCompiler<E> {
    pub fn new(engine: Arc<E>, converter: Arc<dyn SymbolConverter>) -> Self {
        Self {
            engine,
            converter,
            options: None,
            session: None,
            artifact: None,
            last_report: None,
            generation: 0,
        }
    }

    /// Build `options`, fully or incrementally.
    ///
    /// Compile errors are part of the returned [`BuildResult`]. `Err` means
    /// the request could not be processed (an input could not be resolved,
    /// the engine or the file system failed) and is propagated unchanged.
    pub fn build(&mut self, options: &BuildOptions) -> Result<BuildResult> {
        let start = Instant::now();

        let incremental = self.session.is_some()
            && self
                .options
                .as_ref()
                .is_some_and(|previous| previous.same_identity(options));

        let result = if incremental {
            self.build_incremental(options)
        } else {
            self.build_full(options)
        };

        match &result {
            Ok(build) => info!(
                "Built {} in {:?} (succeeded: {}, {} warnings, {} errors)",
                options.output,
                start.elapsed(),
                build.succeeded,
                build.warnings.len(),
                build.errors.len()
            ),
            Err(e) => warn!("Build of {} failed: {}", options.output, e),
        }

        result
    }

    fn build_full(&mut self, options: &BuildOptions) -> Result<BuildResult> {
        info!(
            "BuildFull {} ({} references, {} sources)",
            options.output,
            options.references.len(),
            options.files.len()
        );

        let session = Session::create(self.engine.as_ref(), options)?;

        self.session = Some(session);
        self.artifact = None;
        self.options = Some(options.clone());
        self.generation += 1;

        let result = self.emit(options);
        self.last_report = Some(BuildReport {
            kind: BuildKind::Full,
            action: OutputAction::Emitted,
            references: ChangeSet::default(),
            sources: ChangeSet::default(),
        });
        result
    }

    fn build_incremental(&mut self, options: &BuildOptions) -> Result<BuildResult> {
        let Some(session) = self.session.as_mut() else {
            return self.build_full(options);
        };

        info!("BuildIncremental {}", options.output);

        let pending = session.pending(options);
        let resolved = session.resolve(self.engine.as_ref(), options, &pending)?;

        let references = pending.references.clone();
        let sources = pending.sources.clone();
        session.apply(self.engine.as_ref(), pending, resolved);
        self.options = Some(options.clone());

        let reusable = reuse_allowed(options.output_reuse, &references, &sources)
            && self
                .artifact
                .as_ref()
                .is_some_and(|artifact| artifact.matches(options));

        let (result, action) = if reusable {
            (self.reuse(options), OutputAction::Reused)
        } else {
            (self.emit(options), OutputAction::Emitted)
        };

        self.last_report = Some(BuildReport {
            kind: BuildKind::Incremental,
            action,
            references,
            sources,
        });
        result
    }

    fn reuse(&self, options: &BuildOptions) -> Result<BuildResult> {
        info!("Reuse prebuilt output {}", options.output);
        if let Some(artifact) = &self.artifact {
            artifact.write_to(options)?;
        }
        Ok(BuildResult::success())
    }

    fn emit(&mut self, options: &BuildOptions) -> Result<BuildResult> {
        // Whatever happens below, the old bytes no longer describe the unit.
        self.artifact = None;

        let Some(session) = self.session.as_ref() else {
            return Err(Error::Engine("no compilation session".to_string()));
        };

        let format = options.debug_symbols.emit_format();
        debug!("Emit {} (symbols: {:?})", options.output, format);
        let output = self.engine.emit(session.unit(), format)?;

        let binary_path = options.output_path();
        write_artifact(&binary_path, &output.binary)?;

        let emitted_symbols = match (format, &output.symbols) {
            (Some(SymbolFormat::Native), Some(bytes)) => {
                write_artifact(&native_symbol_path(&binary_path), bytes)?;
                true
            }
            (Some(SymbolFormat::Portable), Some(bytes)) => {
                write_artifact(&portable_symbol_path(&binary_path), bytes)?;
                true
            }
            _ => false,
        };

        let mut result = BuildResult::from_diagnostics(output.success, &output.diagnostics);

        let symbols = if options.debug_symbols == DebugSymbolMode::Converted && emitted_symbols {
            match self.convert_symbols(&binary_path) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Symbol conversion for {} failed: {}", options.output, e);
                    // Symbols from an earlier emit no longer match the binary.
                    remove_if_present(&portable_symbol_path(&binary_path));
                    result
                        .warnings
                        .push(format!("warning: debug symbols were not converted: {e}"));
                    None
                }
            }
        } else {
            output.symbols
        };

        if result.succeeded {
            self.artifact = Some(CachedArtifact {
                binary: output.binary,
                symbols,
                debug_symbols: options.debug_symbols,
            });
        }

        Ok(result)
    }

    /// Run the converter on `binary`, drop the native symbols and load the
    /// converted ones.
    fn convert_symbols(&self, binary: &Path) -> Result<Vec<u8>> {
        let code = self.converter.convert(binary)?;
        debug!("Symbol converter exited with {}", code);

        remove_if_present(&native_symbol_path(binary));

        let converted = portable_symbol_path(binary);
        fs::read(&converted).map_err(|e| {
            Error::SymbolConversion(format!(
                "converter exited with {code} and produced no {}: {e}",
                converted.display()
            ))
        })
    }

    /// Options of the last request that reached the engine.
    pub fn options(&self) -> Option<&BuildOptions> {
        self.options.as_ref()
    }

    pub fn session(&self) -> Option<&Session<E>> {
        self.session.as_ref()
    }

    pub fn artifact(&self) -> Option<&CachedArtifact> {
        self.artifact.as_ref()
    }

    pub fn last_report(&self) -> Option<&BuildReport> {
        self.last_report.as_ref()
    }

    /// Number of full builds that created a session.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

/// Whether `policy` lets unchanged inputs skip the emit.
fn reuse_allowed(policy: OutputReuse, references: &ChangeSet, sources: &ChangeSet) -> bool {
    match policy {
        OutputReuse::None => false,
        OutputReuse::WhenNoChange => references.is_empty() && sources.is_empty(),
        OutputReuse::WhenNoSourceChange => {
            sources.is_empty() && references.is_membership_unchanged()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn changes(added: &[&str], changed: &[&str], removed: &[&str]) -> ChangeSet {
        let paths = |list: &[&str]| list.iter().map(PathBuf::from).collect();
        ChangeSet {
            added: paths(added),
            changed: paths(changed),
            removed: paths(removed),
        }
    }

    #[test]
    fn test_reuse_policy_none() {
        let empty = ChangeSet::default();
        assert!(!reuse_allowed(OutputReuse::None, &empty, &empty));
    }

    #[test]
    fn test_reuse_when_no_change() {
        let empty = ChangeSet::default();
        let touched = changes(&[], &["r1.dll"], &[]);
        assert!(reuse_allowed(OutputReuse::WhenNoChange, &empty, &empty));
        assert!(!reuse_allowed(OutputReuse::WhenNoChange, &touched, &empty));
        assert!(!reuse_allowed(OutputReuse::WhenNoChange, &empty, &touched));
    }

    #[test]
    fn test_reuse_when_no_source_change() {
        let empty = ChangeSet::default();
        let rebuilt_reference = changes(&[], &["r1.dll"], &[]);
        let new_reference = changes(&["r2.dll"], &[], &[]);
        let dropped_reference = changes(&[], &[], &["r1.dll"]);
        let edited_source = changes(&[], &["a.cs"], &[]);

        let policy = OutputReuse::WhenNoSourceChange;
        assert!(reuse_allowed(policy, &rebuilt_reference, &empty));
        assert!(!reuse_allowed(policy, &new_reference, &empty));
        assert!(!reuse_allowed(policy, &dropped_reference, &empty));
        assert!(!reuse_allowed(policy, &empty, &edited_source));
    }
}
