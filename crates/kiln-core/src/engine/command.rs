//! Compile engine backed by an external compiler process.
//!
//! Sources are read once when parsed and staged into a scratch directory on
//! every emit, so the compiler always sees the exact text the session holds
//! even if the files changed on disk after the diff was taken.
//!
//! The compiler is invoked as:
//!
//! ```text
//! <program> <args...> --name <assembly> --out <bin> [--symbols <sym> --symbol-format native|portable]
//!           [--define D]... [--reference R]... [--nowarn C]... [--unsafe] <extra flags...> <sources...>
//! ```
//!
//! and must print one JSON diagnostic per stdout line:
//!
//! ```text
//! {"severity":"warning","code":"CS0168","message":"...","file":"...","line":3,"column":7,"warning_as_error":false}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::options::{SymbolFormat, UnitOptions};

use super::{CompileEngine, Diagnostic, EmitOutput, Severity, SourceLocation};

/// Which compiler program to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandEngineConfig {
    pub program: PathBuf,
    /// Arguments placed before the generated ones.
    pub args: Vec<String>,
}

/// Engine that shells out to a compiler for every emit.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    config: CommandEngineConfig,
}

/// A reference that was found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceHandle {
    path: PathBuf,
}

/// A source file's text as read at parse time.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    path: PathBuf,
    text: Arc<str>,
}

/// Everything one compiler invocation needs.
#[derive(Debug, Clone)]
pub struct CommandUnit {
    options: UnitOptions,
    sources: BTreeMap<PathBuf, Arc<str>>,
    references: BTreeSet<PathBuf>,
}

impl CommandUnit {
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }
}

/// JSON diagnostic line printed by the compiler.
#[derive(Debug, Deserialize)]
struct WireDiagnostic {
    severity: String,
    #[serde(default)]
    code: Option<String>,
    message: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    column: Option<usize>,
    #[serde(default)]
    warning_as_error: bool,
}

impl CommandEngine {
    pub fn new(config: CommandEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandEngineConfig {
        &self.config
    }

    /// Write every source into `dir`, returning staged path -> original path.
    fn stage_sources(unit: &CommandUnit, dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut staged = Vec::with_capacity(unit.sources.len());
        for (index, (original, text)) in unit.sources.iter().enumerate() {
            let file_name = original
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "source".to_string());
            let path = dir.join(format!("{index:05}_{file_name}"));
            fs::write(&path, text.as_bytes()).map_err(|source| Error::Artifact {
                path: path.clone(),
                source,
            })?;
            staged.push((path, original.clone()));
        }
        Ok(staged)
    }

    fn build_command(
        &self,
        unit: &CommandUnit,
        binary: &Path,
        symbols: Option<(&Path, SymbolFormat)>,
        staged: &[(PathBuf, PathBuf)],
    ) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg("--name")
            .arg(&unit.options.assembly_name)
            .arg("--out")
            .arg(binary);

        if let Some((path, format)) = symbols {
            let format = match format {
                SymbolFormat::Native => "native",
                SymbolFormat::Portable => "portable",
            };
            cmd.arg("--symbols")
                .arg(path)
                .arg("--symbol-format")
                .arg(format);
        }

        for define in &unit.options.defines {
            cmd.arg("--define").arg(define);
        }
        for reference in &unit.references {
            cmd.arg("--reference").arg(reference);
        }
        for code in &unit.options.suppressed {
            cmd.arg("--nowarn").arg(code);
        }
        if unit.options.allow_unsafe {
            cmd.arg("--unsafe");
        }
        cmd.args(&unit.options.extra_flags);
        cmd.args(staged.iter().map(|(path, _)| path));
        cmd
    }

    /// Parse compiler stdout, mapping staged file names back to the originals.
    fn parse_diagnostics(stdout: &str, staged: &FxHashMap<String, String>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<WireDiagnostic>(line) {
                Ok(wire) => {
                    let location = wire.file.map(|file| {
                        let file = staged.get(&file).cloned().unwrap_or(file);
                        SourceLocation::new(file, wire.line.unwrap_or(1), wire.column.unwrap_or(1))
                    });
                    diagnostics.push(Diagnostic {
                        severity: Severity::from_name(&wire.severity),
                        code: wire.code.unwrap_or_default(),
                        message: wire.message,
                        location,
                        warning_as_error: wire.warning_as_error,
                    });
                }
                Err(e) => {
                    let preview: String = line.chars().take(100).collect();
                    tracing::debug!("Ignoring non-diagnostic compiler output: {} (line: {})", e, preview);
                }
            }
        }

        diagnostics
    }
}

impl CompileEngine for CommandEngine {
    type Reference = ReferenceHandle;
    type Source = SourceHandle;
    type Unit = CommandUnit;

    fn resolve_reference(&self, path: &Path) -> Result<ReferenceHandle> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(ReferenceHandle {
                path: path.to_path_buf(),
            }),
            Ok(_) => Err(Error::UnresolvedReference {
                path: path.to_path_buf(),
                message: "not a file".to_string(),
            }),
            Err(e) => Err(Error::UnresolvedReference {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    fn parse_source(&self, path: &Path, _defines: &[String]) -> Result<SourceHandle> {
        let text = fs::read_to_string(path).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(SourceHandle {
            path: path.to_path_buf(),
            text: Arc::from(text),
        })
    }

    fn build_unit(
        &self,
        sources: &[&SourceHandle],
        references: &[&ReferenceHandle],
        options: &UnitOptions,
    ) -> Result<CommandUnit> {
        Ok(CommandUnit {
            options: options.clone(),
            sources: sources
                .iter()
                .map(|s| (s.path.clone(), s.text.clone()))
                .collect(),
            references: references.iter().map(|r| r.path.clone()).collect(),
        })
    }

    fn add_reference(&self, unit: &mut CommandUnit, reference: &ReferenceHandle) {
        unit.references.insert(reference.path.clone());
    }

    fn remove_reference(&self, unit: &mut CommandUnit, reference: &ReferenceHandle) {
        unit.references.remove(&reference.path);
    }

    fn add_source(&self, unit: &mut CommandUnit, source: &SourceHandle) {
        unit.sources.insert(source.path.clone(), source.text.clone());
    }

    fn remove_source(&self, unit: &mut CommandUnit, source: &SourceHandle) {
        unit.sources.remove(&source.path);
    }

    fn emit(&self, unit: &CommandUnit, symbols: Option<SymbolFormat>) -> Result<EmitOutput> {
        let scratch = tempfile::Builder::new().prefix("kiln-emit-").tempdir()?;
        let staged = Self::stage_sources(unit, scratch.path())?;

        let binary_path = scratch.path().join("out.bin");
        let symbol_path = scratch.path().join("out.sym");
        let symbol_arg = symbols.map(|format| (symbol_path.as_path(), format));

        let output = self
            .build_command(unit, &binary_path, symbol_arg, &staged)
            .output()
            .map_err(|e| {
                Error::Engine(format!(
                    "Failed to run compiler '{}': {}",
                    self.config.program.display(),
                    e
                ))
            })?;

        let staged_names: FxHashMap<String, String> = staged
            .iter()
            .map(|(s, o)| (s.display().to_string(), o.display().to_string()))
            .collect();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut diagnostics = Self::parse_diagnostics(&stdout, &staged_names);
        let success = output.status.success();

        if !success && diagnostics.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                code: String::new(),
                message: format!("compiler exited with {}: {}", output.status, stderr.trim()),
                location: None,
                warning_as_error: false,
            });
        }

        let binary = match fs::read(&binary_path) {
            Ok(bytes) => bytes,
            Err(_) if !success => Vec::new(),
            Err(source) => {
                return Err(Error::Artifact {
                    path: binary_path,
                    source,
                });
            }
        };
        let symbols = symbols.and_then(|_| fs::read(&symbol_path).ok());

        Ok(EmitOutput {
            binary,
            symbols,
            diagnostics,
            success,
        })
    }
}
