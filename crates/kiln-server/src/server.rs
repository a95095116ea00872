//! Server lifecycle.
//!
//! ```text
//! Idle ──run──► Starting ──endpoint open──► Listening ──owner exit / shutdown──► Closing ──► Terminated
//!                  │
//!                  └── owner missing / endpoint cannot be opened ──► Terminated (error)
//! ```
//!
//! Builds run on the blocking pool; the registry serializes requests for the
//! same output and lets different outputs build in parallel.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kiln_core::BuildService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::owner;
use crate::protocol::{BuildRequest, BuildResponse, read_frame, write_frame};
use crate::routes::{AppState, create_router};
use crate::transport::{Endpoint, TransportConfig};

/// Lifecycle state of a [`BuildServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Starting,
    Listening,
    Closing,
    Terminated,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Owning process; 0 runs until shutdown is requested.
    pub owner: u32,
    pub transport: TransportConfig,
    /// How often the owner's liveness is checked.
    pub owner_poll_interval: Duration,
    /// How long a local-socket client may take to send its request.
    pub read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            owner: 0,
            transport: TransportConfig::default(),
            owner_poll_interval: Duration::from_millis(500),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// A build server bound to one owning process.
pub struct BuildServer {
    config: ServerConfig,
    service: Arc<dyn BuildService>,
    state: watch::Sender<ServerState>,
}

/// An opened endpoint.
enum Listener {
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: std::path::PathBuf,
    },
    #[cfg(windows)]
    Pipe {
        server: tokio::net::windows::named_pipe::NamedPipeServer,
        name: String,
    },
    Http(TcpListener),
}

impl BuildServer {
    pub fn new(config: ServerConfig, service: Arc<dyn BuildService>) -> Self {
        let (state, _) = watch::channel(ServerState::Idle);
        Self {
            config,
            service,
            state,
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::resolve(&self.config.transport, self.config.owner)
    }

    fn transition(&self, next: ServerState) {
        let previous = self.state.send_replace(next);
        debug!("Server state {:?} -> {:?}", previous, next);
    }

    /// Run until the owner exits or `shutdown` completes.
    pub async fn run(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> ServerResult<()> {
        self.transition(ServerState::Starting);

        let owner = self.config.owner;
        if owner != 0 && !owner::is_alive(owner) {
            self.transition(ServerState::Terminated);
            return Err(ServerError::OwnerNotFound(format!(
                "process {owner} is not running"
            )));
        }

        let endpoint = self.endpoint();
        let listener = match bind(&endpoint).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("{}", e);
                self.transition(ServerState::Terminated);
                return Err(e);
            }
        };

        info!("Kiln server listening at {}", endpoint);
        self.transition(ServerState::Listening);

        let interval = self.config.owner_poll_interval;
        let stop = async move {
            tokio::select! {
                _ = shutdown => info!("Received shutdown signal"),
                _ = wait_for_exit(owner, interval) => info!("Owning process {} exited", owner),
            }
        };

        let served = serve(
            listener,
            Arc::clone(&self.service),
            owner,
            self.config.read_timeout,
            stop,
        )
        .await;

        self.transition(ServerState::Closing);
        if let Endpoint::LocalSocket { path, .. } = &endpoint
            && cfg!(unix)
            && let Err(e) = std::fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Could not remove {}: {}", path.display(), e);
        }
        self.transition(ServerState::Terminated);

        info!("Server shutdown complete");
        served
    }
}

/// Resolve when `owner` is no longer running. Never resolves for owner 0.
pub async fn wait_for_exit(owner: u32, interval: Duration) {
    if owner == 0 {
        return std::future::pending().await;
    }
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if !owner::is_alive(owner) {
            return;
        }
    }
}

fn bind_error(endpoint: &Endpoint, e: impl std::fmt::Display) -> ServerError {
    ServerError::Bind {
        address: endpoint.to_string(),
        message: e.to_string(),
    }
}

async fn bind(endpoint: &Endpoint) -> ServerResult<Listener> {
    match endpoint {
        Endpoint::LoopbackHttp { port, .. } => {
            let addr = SocketAddr::from(([127, 0, 0, 1], *port));
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| bind_error(endpoint, e))?;
            Ok(Listener::Http(listener))
        }
        #[cfg(unix)]
        Endpoint::LocalSocket { path, .. } => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| bind_error(endpoint, e))?;
            }
            // A live server answers; a leftover file from a dead one is removed.
            if path.exists() {
                if tokio::net::UnixStream::connect(path).await.is_ok() {
                    return Err(bind_error(endpoint, "another server is already listening"));
                }
                tokio::fs::remove_file(path)
                    .await
                    .map_err(|e| bind_error(endpoint, e))?;
            }
            let listener =
                tokio::net::UnixListener::bind(path).map_err(|e| bind_error(endpoint, e))?;
            Ok(Listener::Unix {
                listener,
                path: path.clone(),
            })
        }
        #[cfg(windows)]
        Endpoint::LocalSocket { path, .. } => {
            use tokio::net::windows::named_pipe::ServerOptions;

            let name = path.to_string_lossy().into_owned();
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&name)
                .map_err(|e| bind_error(endpoint, e))?;
            Ok(Listener::Pipe { server, name })
        }
        #[cfg(not(any(unix, windows)))]
        Endpoint::LocalSocket { .. } => Err(bind_error(
            endpoint,
            "local sockets are not supported on this platform",
        )),
    }
}

async fn serve(
    listener: Listener,
    service: Arc<dyn BuildService>,
    owner: u32,
    read_timeout: Duration,
    stop: impl Future<Output = ()> + Send + 'static,
) -> ServerResult<()> {
    match listener {
        Listener::Http(listener) => {
            let app = create_router(Arc::new(AppState { service, owner }));
            axum::serve(listener, app)
                .with_graceful_shutdown(stop)
                .await?;
            Ok(())
        }
        #[cfg(unix)]
        Listener::Unix { listener, path } => {
            tokio::pin!(stop);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    res = listener.accept() => match res {
                        Ok((stream, _addr)) => {
                            tokio::spawn(handle_connection(
                                stream,
                                Arc::clone(&service),
                                read_timeout,
                            ));
                        }
                        Err(e) => error!("Failed to accept connection on {}: {}", path.display(), e),
                    },
                }
            }
            Ok(())
        }
        #[cfg(windows)]
        Listener::Pipe { mut server, name } => {
            use tokio::net::windows::named_pipe::ServerOptions;

            tokio::pin!(stop);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    res = server.connect() => {
                        if let Err(e) = res {
                            error!("Failed to accept connection on {}: {}", name, e);
                            continue;
                        }
                        let connected = server;
                        server = ServerOptions::new().create(&name)?;
                        tokio::spawn(handle_connection(
                            connected,
                            Arc::clone(&service),
                            read_timeout,
                        ));
                    }
                }
            }
            Ok(())
        }
    }
}

/// Serve one request on a local-socket connection.
///
/// A client that has not sent a complete request within `read_timeout` is
/// dropped.
pub async fn handle_connection<S>(
    mut stream: S,
    service: Arc<dyn BuildService>,
    read_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request: BuildRequest =
        match tokio::time::timeout(read_timeout, read_frame(&mut stream)).await {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                warn!("Dropping connection: {}", e);
                return;
            }
            Err(_) => {
                warn!("Dropping connection: no request after {:?}", read_timeout);
                return;
            }
        };

    let response = dispatch(service, request).await;
    if let Err(e) = write_frame(&mut stream, &response).await {
        warn!("Could not send build response: {}", e);
    }
}

/// Run a build request on the blocking pool.
pub async fn dispatch(service: Arc<dyn BuildService>, request: BuildRequest) -> BuildResponse {
    let BuildRequest { project, options } = request;
    let output = options.output.clone();
    debug!("Build request for {} in {}", output, project);

    match tokio::task::spawn_blocking(move || service.build(&project, options)).await {
        Ok(Ok(result)) => BuildResponse::Built(result),
        Ok(Err(e)) => BuildResponse::Failed {
            message: e.to_string(),
        },
        Err(e) => BuildResponse::Failed {
            message: format!("Build of {output} did not complete: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{BuildOptions, BuildResult};

    struct FixedService;

    impl BuildService for FixedService {
        fn build(&self, _project: &str, options: BuildOptions) -> kiln_core::Result<BuildResult> {
            if options.output.is_empty() {
                return Err(kiln_core::Error::Engine("no output".to_string()));
            }
            Ok(BuildResult::success())
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.owner, 0);
        assert_eq!(config.owner_poll_interval, Duration::from_millis(500));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_dispatch() {
        let service: Arc<dyn BuildService> = Arc::new(FixedService);
        let ok = dispatch(
            Arc::clone(&service),
            BuildRequest {
                project: "/p".to_string(),
                options: BuildOptions {
                    output: "Game.dll".to_string(),
                    ..Default::default()
                },
            },
        )
        .await;
        assert_eq!(ok, BuildResponse::Built(BuildResult::success()));

        let failed = dispatch(
            service,
            BuildRequest {
                project: "/p".to_string(),
                options: BuildOptions::default(),
            },
        )
        .await;
        assert!(matches!(failed, BuildResponse::Failed { message } if message.contains("no output")));
    }

    #[tokio::test]
    async fn test_connection_over_duplex() {
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_connection(
            server,
            Arc::new(FixedService),
            Duration::from_secs(5),
        ));

        let request = BuildRequest {
            project: "/p".to_string(),
            options: BuildOptions {
                output: "Game.dll".to_string(),
                ..Default::default()
            },
        };
        write_frame(&mut client, &request).await.unwrap();
        let response: BuildResponse = read_frame(&mut client).await.unwrap();
        assert!(response.into_result().unwrap().succeeded);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_client_is_dropped() {
        let (mut client, server) = tokio::io::duplex(4096);

        let handled = tokio::time::timeout(
            Duration::from_secs(2),
            handle_connection(server, Arc::new(FixedService), Duration::from_millis(50)),
        )
        .await;
        assert!(handled.is_ok());

        // The server side is gone, so the client sees end of stream.
        let response: Result<BuildResponse, _> = read_frame(&mut client).await;
        assert!(response.is_err());
    }

    #[tokio::test]
    async fn test_missing_owner_terminates() {
        let mut child = std::process::Command::new(if cfg!(windows) { "cmd" } else { "true" })
            .args(if cfg!(windows) { vec!["/C", "exit"] } else { vec![] })
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let server = BuildServer::new(
            ServerConfig {
                owner: pid,
                ..Default::default()
            },
            Arc::new(FixedService),
        );
        let err = server.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, ServerError::OwnerNotFound(_)));
        assert_eq!(server.state(), ServerState::Terminated);
    }

    #[tokio::test]
    async fn test_wait_for_exit_without_owner_never_resolves() {
        let waited =
            tokio::time::timeout(Duration::from_millis(50), wait_for_exit(0, Duration::from_millis(5)))
                .await;
        assert!(waited.is_err());
    }
}
