//! Build states keyed by output, scoped to one project.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;
use tracing::{error, info};

use crate::engine::CompileEngine;
use crate::error::{Error, Result};
use crate::incremental::IncrementalCompiler;
use crate::options::BuildOptions;
use crate::result::BuildResult;
use crate::symbols::SymbolConverter;

/// Something that can serve build requests.
///
/// The transport layer only depends on this trait.
pub trait BuildService: Send + Sync {
    fn build(&self, project: &str, options: BuildOptions) -> Result<BuildResult>;
}

type Entry<E> = Arc<Mutex<IncrementalCompiler<E>>>;

struct RegistryInner<E: CompileEngine> {
    /// Identity of the project the entries belong to.
    project: Option<String>,
    /// One state per output path.
    entries: FxHashMap<String, Entry<E>>,
}

/// Registry of incremental states.
///
/// Structural changes (flush, insert) hold the registry lock; a build only
/// holds the lock of its own entry, so different outputs build concurrently
/// and requests for the same output are serialized.
pub struct BuildRegistry<E: CompileEngine> {
    engine: Arc<E>,
    converter: Arc<dyn SymbolConverter>,
    inner: Mutex<RegistryInner<E>>,
}

fn lock_error<T>(e: PoisonError<T>) -> Error {
    Error::Poisoned(format!("Build registry lock poisoned (thread panicked): {}", e))
}

impl<E: CompileEngine> BuildRegistry<E> {
    pub fn new(engine: Arc<E>, converter: Arc<dyn SymbolConverter>) -> Self {
        Self {
            engine,
            converter,
            inner: Mutex::new(RegistryInner {
                project: None,
                entries: FxHashMap::default(),
            }),
        }
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, RegistryInner<E>>> {
        self.inner.lock().map_err(lock_error)
    }

    /// Get the entry for `output` in `project`, flushing on a project change.
    fn entry(&self, project: &str, output: &str) -> Result<Entry<E>> {
        let mut inner = self.lock_inner()?;

        if inner.project.as_deref() != Some(project) {
            if !inner.entries.is_empty() {
                info!(
                    "Project changed to {}, dropping {} build states",
                    project,
                    inner.entries.len()
                );
            }
            inner.entries.clear();
            inner.project = Some(project.to_string());
        }

        let entry = inner
            .entries
            .entry(output.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IncrementalCompiler::new(
                    Arc::clone(&self.engine),
                    Arc::clone(&self.converter),
                )))
            });
        Ok(Arc::clone(entry))
    }

    /// Build `options` in the state for its output.
    pub fn build(&self, project: &str, options: &BuildOptions) -> Result<BuildResult> {
        let entry = self.entry(project, &options.output)?;
        let mut state = entry.lock().map_err(lock_error)?;

        state.build(options).inspect_err(|e| {
            error!("Build of {} in {} failed: {}", options.output, project, e);
        })
    }

    /// Identity of the project the current entries belong to.
    pub fn project(&self) -> Result<Option<String>> {
        Ok(self.lock_inner()?.project.clone())
    }

    /// Number of outputs with a state.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock_inner()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock_inner()?.entries.is_empty())
    }

    /// Run `f` with the state of `output`, if one exists.
    pub fn inspect<R>(
        &self,
        output: &str,
        f: impl FnOnce(&IncrementalCompiler<E>) -> R,
    ) -> Result<Option<R>> {
        let entry = match self.lock_inner()?.entries.get(output) {
            Some(entry) => Arc::clone(entry),
            None => return Ok(None),
        };
        let state = entry.lock().map_err(lock_error)?;
        Ok(Some(f(&state)))
    }
}

impl<E: CompileEngine> BuildService for BuildRegistry<E> {
    fn build(&self, project: &str, options: BuildOptions) -> Result<BuildResult> {
        BuildRegistry::build(self, project, &options)
    }
}
