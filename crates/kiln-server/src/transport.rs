//! Transport selection and endpoint addresses.
//!
//! Client and server both derive the endpoint from the owning process id
//! through [`Endpoint::resolve`], so they always agree on where to meet.
//! Every address has the shape `<scheme>://<host>/kiln.build/<owner-pid>`;
//! only the scheme and host are transport specific.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Fixed path segment shared by all endpoint addresses.
pub const NAMESPACE: &str = "kiln.build";

/// Base port of the loopback HTTP transport.
pub const DEFAULT_HTTP_PORT: u16 = 52000;

/// How client and server talk to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Unix domain socket, or a named pipe on Windows.
    LocalSocket,
    /// HTTP on the loopback interface at a fixed port.
    LoopbackHttp,
}

impl TransportKind {
    /// Platform default: loopback HTTP on macOS, a local socket elsewhere.
    pub fn for_host() -> Self {
        if cfg!(target_os = "macos") {
            TransportKind::LoopbackHttp
        } else {
            TransportKind::LocalSocket
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Port of the loopback HTTP transport.
    pub http_port: u16,
    /// Directory for Unix domain sockets. Defaults to the runtime directory,
    /// else the temp directory.
    pub socket_dir: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::for_host(),
            http_port: DEFAULT_HTTP_PORT,
            socket_dir: None,
        }
    }
}

impl TransportConfig {
    #[cfg(not(windows))]
    fn socket_root(&self) -> PathBuf {
        self.socket_dir
            .clone()
            .or_else(dirs::runtime_dir)
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Where the server for one owning process listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix socket file, or a Windows pipe name.
    LocalSocket { owner: u32, path: PathBuf },
    /// `http://127.0.0.1:<port>/kiln.build/<owner>`
    LoopbackHttp { owner: u32, port: u16 },
}

impl Endpoint {
    /// Derive the endpoint for `owner` under `config`.
    pub fn resolve(config: &TransportConfig, owner: u32) -> Self {
        match config.kind {
            TransportKind::LocalSocket => Endpoint::LocalSocket {
                owner,
                path: local_socket_path(config, owner),
            },
            TransportKind::LoopbackHttp => Endpoint::LoopbackHttp {
                owner,
                port: config.http_port,
            },
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Endpoint::LocalSocket { .. } => TransportKind::LocalSocket,
            Endpoint::LoopbackHttp { .. } => TransportKind::LoopbackHttp,
        }
    }

    pub fn owner(&self) -> u32 {
        match self {
            Endpoint::LocalSocket { owner, .. } | Endpoint::LoopbackHttp { owner, .. } => *owner,
        }
    }

    /// Route of the build call on the HTTP transport.
    pub fn route(&self) -> String {
        format!("/{NAMESPACE}/{}", self.owner())
    }

    /// Full URL of the build call, for the HTTP transport.
    pub fn url(&self) -> Option<String> {
        match self {
            Endpoint::LoopbackHttp { port, .. } => {
                Some(format!("http://127.0.0.1:{port}{}", self.route()))
            }
            Endpoint::LocalSocket { .. } => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::LocalSocket { path, .. } => {
                let scheme = if cfg!(windows) { "pipe" } else { "unix" };
                write!(f, "{scheme}://localhost{} ({})", self.route(), path.display())
            }
            Endpoint::LoopbackHttp { port, .. } => {
                write!(f, "http://127.0.0.1:{port}{}", self.route())
            }
        }
    }
}

#[cfg(windows)]
fn local_socket_path(_config: &TransportConfig, owner: u32) -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{NAMESPACE}\{owner}"))
}

#[cfg(not(windows))]
fn local_socket_path(config: &TransportConfig, owner: u32) -> PathBuf {
    config
        .socket_root()
        .join(NAMESPACE)
        .join(format!("{owner}.sock"))
}
