//! Build request options.
//!
//! `BuildOptions` travels over the wire from client to server, so it derives
//! both serde (loopback HTTP, settings) and rkyv (local channel) codecs.
//! Paths are kept as strings relative to `work_directory`.

use std::path::{Path, PathBuf};

use rkyv::Archive;
use serde::{Deserialize, Serialize};

/// Which debug-symbol file accompanies the emitted binary.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DebugSymbolMode {
    /// No debug symbols.
    #[default]
    None,
    /// Engine-native symbols next to the binary (`out.pdb`).
    Native,
    /// Native symbols converted to the portable format by an external tool.
    Converted,
    /// Portable symbols emitted directly by the engine (`out.dll.mdb`).
    Portable,
}

/// The symbol format requested from the compile engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolFormat {
    Native,
    Portable,
}

/// Extension of native symbol files, replacing the binary's extension.
pub const NATIVE_SYMBOL_EXTENSION: &str = "pdb";

/// Suffix of portable symbol files, appended to the binary's file name.
pub const PORTABLE_SYMBOL_SUFFIX: &str = ".mdb";

impl DebugSymbolMode {
    /// Format the compile engine must emit for this mode.
    pub fn emit_format(self) -> Option<SymbolFormat> {
        match self {
            DebugSymbolMode::None => None,
            DebugSymbolMode::Native | DebugSymbolMode::Converted => Some(SymbolFormat::Native),
            DebugSymbolMode::Portable => Some(SymbolFormat::Portable),
        }
    }

    /// Path of the symbol file the build finally leaves next to `binary`.
    pub fn symbol_path(self, binary: &Path) -> Option<PathBuf> {
        match self {
            DebugSymbolMode::None => None,
            DebugSymbolMode::Native => Some(native_symbol_path(binary)),
            DebugSymbolMode::Converted | DebugSymbolMode::Portable => {
                Some(portable_symbol_path(binary))
            }
        }
    }
}

/// `out/Game.dll` -> `out/Game.pdb`
pub fn native_symbol_path(binary: &Path) -> PathBuf {
    binary.with_extension(NATIVE_SYMBOL_EXTENSION)
}

/// `out/Game.dll` -> `out/Game.dll.mdb`
pub fn portable_symbol_path(binary: &Path) -> PathBuf {
    let mut name = binary.as_os_str().to_owned();
    name.push(PORTABLE_SYMBOL_SUFFIX);
    PathBuf::from(name)
}

/// When a previously emitted binary may be written again instead of emitting.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OutputReuse {
    /// Always emit.
    #[default]
    None,
    /// Reuse when neither sources nor references changed.
    WhenNoChange,
    /// Reuse when sources are unchanged and no reference was added or removed.
    WhenNoSourceChange,
}

/// One build request for one output.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(default)]
pub struct BuildOptions {
    pub work_directory: String,
    pub assembly_name: String,
    /// Output binary, relative to `work_directory` unless absolute.
    pub output: String,
    pub defines: Vec<String>,
    pub references: Vec<String>,
    pub files: Vec<String>,
    pub debug_symbols: DebugSymbolMode,
    pub output_reuse: OutputReuse,
    pub allow_unsafe: bool,
    /// Compiler flags passed through to the engine untouched.
    pub extra_flags: Vec<String>,
    /// Diagnostic codes the engine must not report.
    pub suppressed: Vec<String>,
}

impl BuildOptions {
    /// Whether `other` can continue the compilation session built for `self`.
    ///
    /// Anything outside the identity (file lists, symbol mode, reuse policy,
    /// flags) is handled incrementally or per build.
    pub fn same_identity(&self, other: &BuildOptions) -> bool {
        self.work_directory == other.work_directory
            && self.assembly_name == other.assembly_name
            && self.output == other.output
            && self.defines == other.defines
            && self.suppressed == other.suppressed
    }

    pub fn work_dir(&self) -> &Path {
        Path::new(&self.work_directory)
    }

    /// Resolve a request path against the work directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.work_dir().join(path)
    }

    /// Absolute location of the output binary.
    pub fn output_path(&self) -> PathBuf {
        self.resolve(&self.output)
    }

    /// Absolute location of the final debug-symbol file, if any.
    pub fn symbol_path(&self) -> Option<PathBuf> {
        self.debug_symbols.symbol_path(&self.output_path())
    }

    /// Options the compile engine needs to assemble a unit.
    pub fn unit_options(&self) -> UnitOptions {
        UnitOptions {
            assembly_name: self.assembly_name.clone(),
            defines: self.defines.clone(),
            allow_unsafe: self.allow_unsafe,
            suppressed: self.suppressed.clone(),
            extra_flags: self.extra_flags.clone(),
        }
    }
}

/// Unit-level settings handed to [`CompileEngine::build_unit`](crate::engine::CompileEngine::build_unit).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOptions {
    pub assembly_name: String,
    pub defines: Vec<String>,
    pub allow_unsafe: bool,
    pub suppressed: Vec<String>,
    pub extra_flags: Vec<String>,
}
