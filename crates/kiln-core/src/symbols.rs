//! Debug-symbol conversion.
//!
//! In [`DebugSymbolMode::Converted`](crate::options::DebugSymbolMode::Converted)
//! the engine emits native symbols and an external tool rewrites them into
//! the portable format. The tool works on convention-based sibling paths:
//! given `Game.dll` it reads `Game.pdb` and writes `Game.dll.mdb`.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// Converts the native symbols next to a binary into portable symbols.
pub trait SymbolConverter: Send + Sync {
    /// Run the conversion for `binary` and return the tool's exit code.
    fn convert(&self, binary: &Path) -> Result<i32>;
}

/// Base name of the conversion tool.
const TOOL_NAME: &str = "pdb2mdb";

/// Runs the conversion tool as a child process.
#[derive(Debug, Clone)]
pub struct ToolConverter {
    tool: PathBuf,
}

impl ToolConverter {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// Locate the conversion tool.
    ///
    /// Looks in the following order:
    /// 1. `KILN_SYMBOL_CONVERTER` environment variable
    /// 2. Same directory as the current executable
    /// 3. System PATH
    pub fn locate() -> Result<Self> {
        if let Ok(path) = std::env::var("KILN_SYMBOL_CONVERTER") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Self::new(path));
            }
        }

        let tool_name = if cfg!(windows) {
            format!("{TOOL_NAME}.exe")
        } else {
            TOOL_NAME.to_string()
        };

        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let candidate = exe_dir.join(&tool_name);
            if candidate.exists() {
                return Ok(Self::new(candidate));
            }
        }

        if let Ok(path) = which::which(&tool_name) {
            return Ok(Self::new(path));
        }

        Err(Error::SymbolConversion(format!(
            "Could not find {tool_name}. Set KILN_SYMBOL_CONVERTER or ensure it's in PATH."
        )))
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }
}

impl SymbolConverter for ToolConverter {
    fn convert(&self, binary: &Path) -> Result<i32> {
        let status = Command::new(&self.tool).arg(binary).status().map_err(|e| {
            Error::SymbolConversion(format!(
                "Failed to run '{}': {}",
                self.tool.display(),
                e
            ))
        })?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Converter used when no tool is available; every conversion fails.
#[derive(Debug, Clone, Default)]
pub struct MissingConverter {
    reason: String,
}

impl MissingConverter {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl SymbolConverter for MissingConverter {
    fn convert(&self, _binary: &Path) -> Result<i32> {
        Err(Error::SymbolConversion(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_converter_fails() {
        let converter = MissingConverter::new("no pdb2mdb");
        let err = converter.convert(Path::new("Game.dll")).unwrap_err();
        assert!(err.to_string().contains("no pdb2mdb"));
    }

    #[cfg(unix)]
    #[test]
    fn test_tool_exit_code() {
        let converter = ToolConverter::new("false");
        let code = converter.convert(Path::new("Game.dll")).unwrap();
        assert_ne!(code, 0);
    }
}
