//! Emitted output kept in memory for reuse, and writing outputs to disk.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::options::{BuildOptions, DebugSymbolMode};

/// Bytes of the last successful emit.
#[derive(Debug, Clone)]
pub struct CachedArtifact {
    pub binary: Vec<u8>,
    /// Symbols in the final on-disk format of `debug_symbols`.
    pub symbols: Option<Vec<u8>>,
    /// Symbol mode the bytes were produced for.
    pub debug_symbols: DebugSymbolMode,
}

impl CachedArtifact {
    /// Whether this artifact can satisfy a request with `options`.
    pub fn matches(&self, options: &BuildOptions) -> bool {
        self.debug_symbols == options.debug_symbols
    }

    /// Write the cached binary and symbols to the paths `options` names.
    pub fn write_to(&self, options: &BuildOptions) -> Result<()> {
        write_artifact(&options.output_path(), &self.binary)?;
        if let (Some(path), Some(symbols)) = (options.symbol_path(), &self.symbols) {
            write_artifact(&path, symbols)?;
        }
        Ok(())
    }
}

/// Write `bytes` to `path` through a temporary sibling and a rename.
///
/// The temporary file is flushed and closed before the rename, and removed
/// if anything fails, so `path` is never left half-written.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    let artifact_error = |source: std::io::Error| Error::Artifact {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(artifact_error)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".kiln-tmp");
    let temp_path = std::path::PathBuf::from(temp_name);

    let written = (|| -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();

    let renamed = written.and_then(|()| fs::rename(&temp_path, path));
    if let Err(e) = renamed {
        let _ = fs::remove_file(&temp_path);
        return Err(artifact_error(e));
    }

    Ok(())
}
