//! Change detection between two file snapshots.
//!
//! A [`ChangeTracker`] remembers the last `(path, modified-at)` snapshot it
//! was given and reports what was added, changed, or removed on the next
//! update. The first update only establishes the baseline and always
//! reports no changes.
//!
//! Callers that must not advance the baseline until dependent work succeeds
//! use [`ChangeTracker::preview`] followed by [`ChangeTracker::commit`].

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A file path with the modification time observed when it was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            modified,
        }
    }

    /// Capture a record for `path`, resolved against `base`.
    ///
    /// A file that cannot be stat'ed gets `UNIX_EPOCH`, so it still takes part
    /// in the diff and the compile engine reports the real problem.
    pub fn capture(base: &Path, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let modified = fs::metadata(base.join(&path))
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        Self { path, modified }
    }
}

/// Records sorted by path with no duplicate paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSnapshot {
    records: Vec<FileRecord>,
}

impl FileSnapshot {
    /// Build a snapshot from records in any order.
    ///
    /// When a path occurs more than once, the first occurrence wins.
    pub fn new(records: impl IntoIterator<Item = FileRecord>) -> Self {
        let mut records: Vec<FileRecord> = records.into_iter().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records.dedup_by(|later, earlier| later.path == earlier.path);
        Self { records }
    }

    /// Capture modification times for `paths` relative to `base`.
    pub fn capture<I, P>(base: &Path, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::new(paths.into_iter().map(|p| FileRecord::capture(base, p)))
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Difference between two snapshots. Each list is sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub changed: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ChangeSet {
    /// No path was added, changed, or removed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// The set of paths is the same; only timestamps may differ.
    pub fn is_membership_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Linear merge of two sorted snapshots.
    pub fn between(old: &FileSnapshot, new: &FileSnapshot) -> Self {
        let old = old.records();
        let new = new.records();
        let mut changes = ChangeSet::default();

        let (mut i, mut j) = (0, 0);
        while i < new.len() && j < old.len() {
            match new[i].path.cmp(&old[j].path) {
                Ordering::Equal => {
                    if new[i].modified != old[j].modified {
                        changes.changed.push(new[i].path.clone());
                    }
                    i += 1;
                    j += 1;
                }
                Ordering::Less => {
                    changes.added.push(new[i].path.clone());
                    i += 1;
                }
                Ordering::Greater => {
                    changes.removed.push(old[j].path.clone());
                    j += 1;
                }
            }
        }
        changes.added.extend(new[i..].iter().map(|r| r.path.clone()));
        changes.removed.extend(old[j..].iter().map(|r| r.path.clone()));

        changes
    }
}

/// Tracks one file collection across successive build requests.
///
/// Not synchronized: the owning build state serializes all calls.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    baseline: Option<FileSnapshot>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a baseline snapshot has been recorded.
    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Compute the changes against the baseline without recording `snapshot`.
    pub fn preview(&self, snapshot: &FileSnapshot) -> ChangeSet {
        match &self.baseline {
            Some(baseline) => ChangeSet::between(baseline, snapshot),
            None => ChangeSet::default(),
        }
    }

    /// Make `snapshot` the new baseline.
    pub fn commit(&mut self, snapshot: FileSnapshot) {
        self.baseline = Some(snapshot);
    }

    /// Diff `snapshot` against the baseline and record it as the new baseline.
    pub fn update(&mut self, snapshot: FileSnapshot) -> ChangeSet {
        let changes = self.preview(&snapshot);
        self.commit(snapshot);
        changes
    }

    /// Capture timestamps for `paths` under `base` and update.
    pub fn update_paths<I, P>(&mut self, base: &Path, paths: I) -> ChangeSet
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.update(FileSnapshot::capture(base, paths))
    }
}
