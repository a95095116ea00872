//! Kiln build server transport and process lifecycle.
//!
//! # Architecture
//!
//! The crate consists of:
//! - **Transport**: platform-selected endpoint addresses shared by both sides
//! - **Protocol**: build request/response messages and rkyv framing
//! - **Owner**: owning-process discovery and liveness
//! - **Server**: lifecycle state machine, local-socket accept loop
//! - **Routes**: loopback HTTP handlers
//! - **Client**: retry loop that launches a server on demand

pub mod client;
pub mod error;
pub mod owner;
pub mod protocol;
pub mod routes;
pub mod server;
pub mod transport;

pub use client::{
    BuildClient, ClientConfig, InProcessLauncher, LaunchedServer, ProcessLauncher, ServerLauncher,
};
pub use error::{ServerError, ServerResult};
pub use owner::{OWNER_DEFINE_PREFIX, is_alive, resolve_owner};
pub use protocol::{BuildRequest, BuildResponse};
pub use routes::{AppState, create_router};
pub use server::{BuildServer, ServerConfig, ServerState};
pub use transport::{DEFAULT_HTTP_PORT, Endpoint, NAMESPACE, TransportConfig, TransportKind};
