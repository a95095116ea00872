//! Logging setup for both modes.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Log file written by the server, which usually has no console.
pub const SERVER_LOG_FILE: &str = "kiln-server.log";

fn filter(verbose: bool, default: Level) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { default };
    EnvFilter::from_default_env().add_directive(level.into())
}

/// Client mode: warnings and errors to stderr.
pub fn init_client(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose, Level::WARN))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Server mode: stderr plus a log file under `work_dir`.
pub fn init_server(verbose: bool, work_dir: &Path) {
    let path = server_log_path(work_dir);
    let (file, open_error) = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => (Some(file), None),
        Err(e) => (None, Some(e)),
    };

    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let file_layer = file.map(|file| {
        fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter(verbose, Level::INFO))
        .with(console)
        .with(file_layer)
        .init();

    if let Some(e) = open_error {
        tracing::warn!("Could not open log file {}: {}", path.display(), e);
    }
}

/// `Temp/kiln-server.log` when the project has a `Temp` directory, else
/// `kiln-server.log` in `work_dir`.
pub fn server_log_path(work_dir: &Path) -> PathBuf {
    let temp = work_dir.join("Temp");
    if temp.is_dir() {
        temp.join(SERVER_LOG_FILE)
    } else {
        work_dir.join(SERVER_LOG_FILE)
    }
}
