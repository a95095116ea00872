//! Shared helpers for kiln-core integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use kiln_core::engine::{CompileEngine, Diagnostic, EmitOutput, Severity, SourceLocation};
use kiln_core::options::{SymbolFormat, native_symbol_path, portable_symbol_path};
use kiln_core::{BuildOptions, Error, OutputReuse, Result, SymbolConverter, UnitOptions};

// =============================================================================
// Mock engine
// =============================================================================

/// Unit built by [`MockEngine`]: the set of things currently added to it.
#[derive(Debug, Default)]
pub struct MockUnit {
    pub assembly_name: String,
    pub references: BTreeSet<String>,
    pub sources: BTreeMap<String, String>,
}

/// Engine that records every call.
///
/// Sources containing `ERROR` produce an error diagnostic, `WARN` a warning
/// and `ESCALATE` a warning reported as an error. Missing files cannot be
/// resolved or parsed.
#[derive(Debug, Default)]
pub struct MockEngine {
    pub resolves: AtomicUsize,
    pub parses: AtomicUsize,
    pub units: AtomicUsize,
    pub emits: AtomicUsize,
    pub fail_emit: AtomicBool,
    pub ops: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn emits(&self) -> usize {
        self.emits.load(Ordering::SeqCst)
    }

    pub fn units(&self) -> usize {
        self.units.load(Ordering::SeqCst)
    }

    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    /// Take the recorded add/remove operations.
    pub fn take_ops(&self) -> Vec<String> {
        std::mem::take(&mut *self.ops.lock().unwrap())
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl CompileEngine for MockEngine {
    type Reference = String;
    type Source = (String, String);
    type Unit = MockUnit;

    fn resolve_reference(&self, path: &Path) -> Result<String> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(Error::UnresolvedReference {
                path: path.to_path_buf(),
                message: "file not found".to_string(),
            });
        }
        Ok(file_name(path))
    }

    fn parse_source(&self, path: &Path, _defines: &[String]) -> Result<(String, String)> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        let text = fs::read_to_string(path).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok((file_name(path), text))
    }

    fn build_unit(
        &self,
        sources: &[&(String, String)],
        references: &[&String],
        options: &UnitOptions,
    ) -> Result<MockUnit> {
        self.units.fetch_add(1, Ordering::SeqCst);
        Ok(MockUnit {
            assembly_name: options.assembly_name.clone(),
            references: references.iter().map(|r| (*r).clone()).collect(),
            sources: sources
                .iter()
                .map(|(name, text)| (name.clone(), text.clone()))
                .collect(),
        })
    }

    fn add_reference(&self, unit: &mut MockUnit, reference: &String) {
        self.record(format!("+ref {reference}"));
        unit.references.insert(reference.clone());
    }

    fn remove_reference(&self, unit: &mut MockUnit, reference: &String) {
        self.record(format!("-ref {reference}"));
        unit.references.remove(reference);
    }

    fn add_source(&self, unit: &mut MockUnit, source: &(String, String)) {
        self.record(format!("+src {}", source.0));
        unit.sources.insert(source.0.clone(), source.1.clone());
    }

    fn remove_source(&self, unit: &mut MockUnit, source: &(String, String)) {
        self.record(format!("-src {}", source.0));
        unit.sources.remove(&source.0);
    }

    fn emit(&self, unit: &MockUnit, symbols: Option<SymbolFormat>) -> Result<EmitOutput> {
        let n = self.emits.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_emit.load(Ordering::SeqCst) {
            return Err(Error::Engine("emitter crashed".to_string()));
        }

        let mut diagnostics = Vec::new();
        for (name, text) in &unit.sources {
            let location = Some(SourceLocation::new(name.clone(), 1, 1));
            if text.contains("ERROR") {
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    code: "CS0103".to_string(),
                    message: "The name does not exist".to_string(),
                    location: location.clone(),
                    warning_as_error: false,
                });
            }
            if text.contains("WARN") {
                diagnostics.push(Diagnostic {
                    severity: Severity::Warning,
                    code: "CS0168".to_string(),
                    message: "Variable declared but never used".to_string(),
                    location: location.clone(),
                    warning_as_error: false,
                });
            }
            if text.contains("ESCALATE") {
                diagnostics.push(Diagnostic {
                    severity: Severity::Warning,
                    code: "CS0618".to_string(),
                    message: "Member is obsolete".to_string(),
                    location,
                    warning_as_error: true,
                });
            }
        }
        let success = !diagnostics.iter().any(|d| d.severity == Severity::Error);

        let binary = format!(
            "{}|refs={:?}|srcs={:?}|emit#{n}",
            unit.assembly_name,
            unit.references,
            unit.sources.keys().collect::<Vec<_>>()
        )
        .into_bytes();
        let symbols = symbols.map(|format| format!("{format:?} symbols for emit#{n}").into_bytes());

        Ok(EmitOutput {
            binary,
            symbols,
            diagnostics,
            success,
        })
    }
}

/// Engine that saves a new version of one source right after parsing it,
/// the way an editor save can land in the middle of a build.
#[derive(Debug, Default)]
pub struct SaveDuringParse {
    pub inner: MockEngine,
    /// File name, new contents and modification time of the pending save.
    pub save: Mutex<Option<(String, String, SystemTime)>>,
}

impl SaveDuringParse {
    pub fn new(name: &str, contents: &str, modified: SystemTime) -> Self {
        Self {
            inner: MockEngine::default(),
            save: Mutex::new(Some((name.to_string(), contents.to_string(), modified))),
        }
    }
}

impl CompileEngine for SaveDuringParse {
    type Reference = String;
    type Source = (String, String);
    type Unit = MockUnit;

    fn resolve_reference(&self, path: &Path) -> Result<String> {
        self.inner.resolve_reference(path)
    }

    fn parse_source(&self, path: &Path, defines: &[String]) -> Result<(String, String)> {
        let parsed = self.inner.parse_source(path, defines)?;

        let mut save = self.save.lock().unwrap();
        if save.as_ref().is_some_and(|(name, _, _)| *name == parsed.0)
            && let Some((_, contents, modified)) = save.take()
        {
            fs::write(path, contents).unwrap();
            let file = fs::File::options().write(true).open(path).unwrap();
            file.set_modified(modified).unwrap();
        }

        Ok(parsed)
    }

    fn build_unit(
        &self,
        sources: &[&(String, String)],
        references: &[&String],
        options: &UnitOptions,
    ) -> Result<MockUnit> {
        self.inner.build_unit(sources, references, options)
    }

    fn add_reference(&self, unit: &mut MockUnit, reference: &String) {
        self.inner.add_reference(unit, reference);
    }

    fn remove_reference(&self, unit: &mut MockUnit, reference: &String) {
        self.inner.remove_reference(unit, reference);
    }

    fn add_source(&self, unit: &mut MockUnit, source: &(String, String)) {
        self.inner.add_source(unit, source);
    }

    fn remove_source(&self, unit: &mut MockUnit, source: &(String, String)) {
        self.inner.remove_source(unit, source);
    }

    fn emit(&self, unit: &MockUnit, symbols: Option<SymbolFormat>) -> Result<EmitOutput> {
        self.inner.emit(unit, symbols)
    }
}

/// Converter that always fails without touching the disk.
#[derive(Debug, Default)]
pub struct FailingConverter;

impl SymbolConverter for FailingConverter {
    fn convert(&self, _binary: &Path) -> Result<i32> {
        Err(Error::SymbolConversion("converter crashed".to_string()))
    }
}

// =============================================================================
// Mock symbol converter
// =============================================================================

/// Converter that turns `X.pdb` into `X.dll.mdb` with a marker prefix.
#[derive(Debug, Default)]
pub struct MockConverter {
    pub calls: AtomicUsize,
}

impl SymbolConverter for MockConverter {
    fn convert(&self, binary: &Path) -> Result<i32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let native = fs::read(native_symbol_path(binary))?;
        let mut converted = b"CONVERTED:".to_vec();
        converted.extend(native);
        fs::write(portable_symbol_path(binary), converted)?;
        Ok(0)
    }
}

// =============================================================================
// Project helpers
// =============================================================================

/// Scratch project directory.
pub struct TestProject {
    pub dir: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn work_directory(&self) -> String {
        self.path().display().to_string()
    }

    /// Write a file and give it a distinct, deterministic modification time.
    pub fn write(&self, name: &str, contents: &str, stamp: u64) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        self.touch(name, stamp);
        path
    }

    pub fn touch(&self, name: &str, stamp: u64) {
        let file = fs::File::options()
            .write(true)
            .open(self.path().join(name))
            .unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + stamp))
            .unwrap();
    }

    pub fn read(&self, name: &str) -> Vec<u8> {
        fs::read(self.path().join(name)).unwrap()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path().join(name).exists()
    }

    /// A project with sources `a.cs`, `b.cs` and references `r1.dll`, `r2.dll`.
    pub fn with_defaults() -> Self {
        let project = Self::new();
        project.write("a.cs", "class A {}", 1);
        project.write("b.cs", "class B {}", 1);
        project.write("r1.dll", "metadata r1", 1);
        project.write("r2.dll", "metadata r2", 1);
        project
    }

    pub fn options(&self, files: &[&str], references: &[&str]) -> BuildOptions {
        BuildOptions {
            work_directory: self.work_directory(),
            assembly_name: "Game".to_string(),
            output: "Library/Game.dll".to_string(),
            defines: vec!["DEBUG".to_string()],
            references: references.iter().map(|s| s.to_string()).collect(),
            files: files.iter().map(|s| s.to_string()).collect(),
            output_reuse: OutputReuse::WhenNoChange,
            ..Default::default()
        }
    }
}
