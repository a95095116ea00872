//! Settings file (`kiln.json`).
//!
//! Looked up next to the executable unless `--settings` names a file. A
//! missing default file means defaults; a file that was named explicitly
//! must exist.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use kiln_core::{CommandEngineConfig, DebugSymbolMode, OutputReuse};
use kiln_server::{ClientConfig, DEFAULT_HTTP_PORT, TransportConfig, TransportKind};
use serde::{Deserialize, Serialize};

/// File name of the default settings file.
pub const SETTINGS_FILE: &str = "kiln.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub debug_symbols: DebugSymbolMode,
    pub output_reuse: OutputReuse,
    /// Overrides the platform's transport.
    pub transport: Option<TransportKind>,
    pub http_base_port: u16,
    pub socket_dir: Option<PathBuf>,
    /// Overall client deadline; 0 waits forever.
    pub client_timeout_secs: u64,
    /// Process to treat as the owner when no owner marker is given.
    pub owner_process_name: Option<String>,
    pub compiler: CommandEngineConfig,
    /// Debug symbol conversion tool; located automatically when unset.
    pub symbol_converter: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_symbols: DebugSymbolMode::Portable,
            output_reuse: OutputReuse::WhenNoChange,
            transport: None,
            http_base_port: DEFAULT_HTTP_PORT,
            socket_dir: None,
            client_timeout_secs: 300,
            owner_process_name: None,
            compiler: CommandEngineConfig::default(),
            symbol_converter: None,
        }
    }
}

impl Settings {
    /// Load from `explicit`, or from `kiln.json` beside the executable.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        match default_path() {
            Some(path) if path.exists() => Self::load_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load one settings file.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings {}", path.display()))
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            kind: self.transport.unwrap_or_else(TransportKind::for_host),
            http_port: self.http_base_port,
            socket_dir: self.socket_dir.clone(),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            transport: self.transport_config(),
            timeout: (self.client_timeout_secs > 0)
                .then(|| Duration::from_secs(self.client_timeout_secs)),
            ..Default::default()
        }
    }
}

fn default_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join(SETTINGS_FILE))
}
