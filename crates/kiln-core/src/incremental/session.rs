//! Engine handles for one compilation and the trackers that produced them.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::engine::CompileEngine;
use crate::error::Result;
use crate::options::BuildOptions;
use crate::tracker::{ChangeSet, ChangeTracker, FileSnapshot};

/// Engine handles keyed by request path, plus the aggregate unit.
///
/// The handle maps and the unit always agree: every handle in a map has
/// been added to the unit exactly once.
pub struct Session<E: CompileEngine> {
    references: FxHashMap<PathBuf, E::Reference>,
    sources: FxHashMap<PathBuf, E::Source>,
    unit: E::Unit,
    reference_tracker: ChangeTracker,
    source_tracker: ChangeTracker,
}

/// Snapshots taken for a request, with their changes against the session.
pub struct PendingChanges {
    pub references: ChangeSet,
    pub sources: ChangeSet,
    reference_snapshot: FileSnapshot,
    source_snapshot: FileSnapshot,
}

/// Handles resolved for the added and changed paths of a [`PendingChanges`].
pub struct ResolvedHandles<E: CompileEngine> {
    references: FxHashMap<PathBuf, E::Reference>,
    sources: FxHashMap<PathBuf, E::Source>,
}

impl<E: CompileEngine> Session<E> {
    /// Resolve every reference, parse every source and build the unit.
    ///
    /// Nothing is kept if any step fails.
    pub fn create(engine: &E, options: &BuildOptions) -> Result<Self> {
        let reference_paths = unique_paths(&options.references);
        let source_paths = unique_paths(&options.files);

        for path in &reference_paths {
            debug!("+ {}", path.display());
        }
        for path in &source_paths {
            debug!("+ {}", path.display());
        }

        // Baselines are taken before reading so an edit made while parsing
        // shows up as a change on the next request.
        let reference_snapshot = FileSnapshot::capture(options.work_dir(), &reference_paths);
        let source_snapshot = FileSnapshot::capture(options.work_dir(), &source_paths);

        let references = resolve_references(engine, options, &reference_paths)?;
        let sources = parse_sources(engine, options, &source_paths)?;

        let unit = {
            let reference_handles: Vec<&E::Reference> =
                references.iter().map(|(_, handle)| handle).collect();
            let source_handles: Vec<&E::Source> = sources.iter().map(|(_, handle)| handle).collect();
            engine.build_unit(&source_handles, &reference_handles, &options.unit_options())?
        };

        let mut reference_tracker = ChangeTracker::new();
        reference_tracker.commit(reference_snapshot);
        let mut source_tracker = ChangeTracker::new();
        source_tracker.commit(source_snapshot);

        Ok(Self {
            references: references.into_iter().collect(),
            sources: sources.into_iter().collect(),
            unit,
            reference_tracker,
            source_tracker,
        })
    }

    /// Capture both collections and diff them against the last commit.
    pub fn pending(&self, options: &BuildOptions) -> PendingChanges {
        let reference_snapshot = FileSnapshot::capture(options.work_dir(), &options.references);
        let source_snapshot = FileSnapshot::capture(options.work_dir(), &options.files);
        PendingChanges {
            references: self.reference_tracker.preview(&reference_snapshot),
            sources: self.source_tracker.preview(&source_snapshot),
            reference_snapshot,
            source_snapshot,
        }
    }

    /// Produce handles for everything added or changed.
    ///
    /// Runs before the session is touched, so a failure here leaves the
    /// session and its baselines exactly as they were.
    pub fn resolve(
        &self,
        engine: &E,
        options: &BuildOptions,
        pending: &PendingChanges,
    ) -> Result<ResolvedHandles<E>> {
        let reference_paths: Vec<PathBuf> = touched(&pending.references).cloned().collect();
        let source_paths: Vec<PathBuf> = touched(&pending.sources).cloned().collect();

        Ok(ResolvedHandles {
            references: resolve_references(engine, options, &reference_paths)?
                .into_iter()
                .collect(),
            sources: parse_sources(engine, options, &source_paths)?
                .into_iter()
                .collect(),
        })
    }

    /// Apply pending changes with their resolved handles and commit the
    /// snapshots. References go first so sources bind against them.
    pub fn apply(&mut self, engine: &E, pending: PendingChanges, resolved: ResolvedHandles<E>) {
        let ResolvedHandles {
            references,
            sources,
        } = resolved;

        apply_changes(
            &mut self.references,
            &mut self.unit,
            &pending.references,
            references,
            |unit, handle| engine.add_reference(unit, handle),
            |unit, handle| engine.remove_reference(unit, handle),
        );
        apply_changes(
            &mut self.sources,
            &mut self.unit,
            &pending.sources,
            sources,
            |unit, handle| engine.add_source(unit, handle),
            |unit, handle| engine.remove_source(unit, handle),
        );

        self.reference_tracker.commit(pending.reference_snapshot);
        self.source_tracker.commit(pending.source_snapshot);
    }

    pub fn unit(&self) -> &E::Unit {
        &self.unit
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn has_source(&self, path: &Path) -> bool {
        self.sources.contains_key(path)
    }

    pub fn has_reference(&self, path: &Path) -> bool {
        self.references.contains_key(path)
    }
}

fn touched(changes: &ChangeSet) -> impl Iterator<Item = &PathBuf> {
    changes.added.iter().chain(changes.changed.iter())
}

/// Request paths in order of first occurrence.
fn unique_paths(paths: &[String]) -> Vec<PathBuf> {
    let mut seen = FxHashSet::default();
    paths
        .iter()
        .map(PathBuf::from)
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

fn resolve_references<E: CompileEngine>(
    engine: &E,
    options: &BuildOptions,
    paths: &[PathBuf],
) -> Result<Vec<(PathBuf, E::Reference)>> {
    paths
        .par_iter()
        .map(|path| {
            let handle = engine.resolve_reference(&options.resolve(path))?;
            Ok((path.clone(), handle))
        })
        .collect()
}

fn parse_sources<E: CompileEngine>(
    engine: &E,
    options: &BuildOptions,
    paths: &[PathBuf],
) -> Result<Vec<(PathBuf, E::Source)>> {
    paths
        .par_iter()
        .map(|path| {
            let handle = engine.parse_source(&options.resolve(path), &options.defines)?;
            Ok((path.clone(), handle))
        })
        .collect()
}

/// Added, then changed (old handle out, new handle in), then removed.
fn apply_changes<H, U>(
    handles: &mut FxHashMap<PathBuf, H>,
    unit: &mut U,
    changes: &ChangeSet,
    mut resolved: FxHashMap<PathBuf, H>,
    add: impl Fn(&mut U, &H),
    remove: impl Fn(&mut U, &H),
) {
    for path in &changes.added {
        info!("+ {}", path.display());
        if let Some(handle) = resolved.remove(path) {
            if let Some(previous) = handles.remove(path) {
                remove(unit, &previous);
            }
            add(unit, &handle);
            handles.insert(path.clone(), handle);
        }
    }

    for path in &changes.changed {
        info!("* {}", path.display());
        if let Some(handle) = resolved.remove(path) {
            if let Some(previous) = handles.remove(path) {
                remove(unit, &previous);
            }
            add(unit, &handle);
            handles.insert(path.clone(), handle);
        }
    }

    for path in &changes.removed {
        info!("- {}", path.display());
        if let Some(previous) = handles.remove(path) {
            remove(unit, &previous);
        }
    }
}
