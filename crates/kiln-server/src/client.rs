//! Client side: send a build to the owner's server, starting one if needed.
//!
//! The loop is:
//! 1. Call `build` at the endpoint derived from the owner pid.
//! 2. On success, return the result.
//! 3. If nothing is listening and no server was started yet, launch one,
//!    wait [`ClientConfig::launch_delay`] and retry.
//! 4. If a launched server is still coming up, poll it every
//!    [`ClientConfig::poll_interval`]; if it has exited, give up.
//! 5. Any other failure ends the loop.
//!
//! The whole loop is bounded by [`ClientConfig::timeout`].

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use kiln_core::{BuildResult, BuildService};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::protocol::{BuildRequest, BuildResponse, read_frame, write_frame};
use crate::server::{BuildServer, ServerConfig};
use crate::transport::{Endpoint, TransportConfig};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    /// Overall deadline for one build call; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Wait after launching a server before the first retry.
    pub launch_delay: Duration,
    /// Liveness poll interval while a launched server comes up.
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            timeout: Some(Duration::from_secs(300)),
            launch_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Starts a server bound to an owning process.
pub trait ServerLauncher: Send + Sync {
    fn launch(&self, owner: u32) -> ServerResult<Box<dyn LaunchedServer>>;
}

/// Handle to a server started by a [`ServerLauncher`].
pub trait LaunchedServer: Send {
    /// Whether the server has stopped (it can no longer start listening).
    fn has_exited(&mut self) -> bool;
}

/// Launches the server as a separate process: `<program> <args..> server <owner>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Launch the currently running executable.
    pub fn current_exe() -> ServerResult<Self> {
        let exe = std::env::current_exe().map_err(|e| {
            ServerError::Launch(format!("Could not determine current executable: {}", e))
        })?;
        Ok(Self::new(exe))
    }

    /// Add an argument placed before `server <owner>`.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl ServerLauncher for ProcessLauncher {
    fn launch(&self, owner: u32) -> ServerResult<Box<dyn LaunchedServer>> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("server")
            .arg(owner.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let child = command.spawn().map_err(|e| {
            ServerError::Launch(format!(
                "Failed to spawn '{}': {}",
                self.program.display(),
                e
            ))
        })?;

        info!("Spawned server process {} for owner {}", child.id(), owner);
        Ok(Box::new(ServerProcess { child }))
    }
}

struct ServerProcess {
    child: Child,
}

impl LaunchedServer for ServerProcess {
    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }
}

/// Hosts the server on a background thread of the calling process.
pub struct InProcessLauncher {
    service: Arc<dyn BuildService>,
    transport: TransportConfig,
}

impl InProcessLauncher {
    pub fn new(service: Arc<dyn BuildService>, transport: TransportConfig) -> Self {
        Self { service, transport }
    }
}

impl ServerLauncher for InProcessLauncher {
    fn launch(&self, owner: u32) -> ServerResult<Box<dyn LaunchedServer>> {
        let config = ServerConfig {
            owner,
            transport: self.transport.clone(),
            ..Default::default()
        };
        let service = Arc::clone(&self.service);

        let handle = std::thread::Builder::new()
            .name("kiln-server".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Could not start server runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(async move {
                    let server = BuildServer::new(config, service);
                    if let Err(e) = server.run(std::future::pending()).await {
                        error!("In-process server stopped: {}", e);
                    }
                });
            })
            .map_err(|e| ServerError::Launch(format!("Failed to start server thread: {}", e)))?;

        info!("Started in-process server for owner {}", owner);
        Ok(Box::new(ServerThread { handle }))
    }
}

struct ServerThread {
    handle: JoinHandle<()>,
}

impl LaunchedServer for ServerThread {
    fn has_exited(&mut self) -> bool {
        self.handle.is_finished()
    }
}

/// Sends build requests, launching a server on demand.
pub struct BuildClient {
    config: ClientConfig,
    launcher: Arc<dyn ServerLauncher>,
    http: reqwest::Client,
}

impl BuildClient {
    pub fn new(config: ClientConfig, launcher: Arc<dyn ServerLauncher>) -> Self {
        Self {
            config,
            launcher,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build through the server of `owner`.
    ///
    /// Every failure is folded into a failed [`BuildResult`] carrying the
    /// message.
    pub async fn build(&self, owner: u32, request: &BuildRequest) -> BuildResult {
        match self.try_build(owner, request).await {
            Ok(result) => result,
            Err(ServerError::Remote(message)) => {
                warn!("Build of {} failed: {}", request.options.output, message);
                BuildResult::failure(message)
            }
            Err(e) => {
                error!("Build of {} failed: {}", request.options.output, e);
                BuildResult::failure(e.to_string())
            }
        }
    }

    /// Build through the server of `owner`, reporting failures as errors.
    pub async fn try_build(&self, owner: u32, request: &BuildRequest) -> ServerResult<BuildResult> {
        let endpoint = Endpoint::resolve(&self.config.transport, owner);
        let attempt = self.retry(&endpoint, request);

        match self.config.timeout {
            Some(limit) if !limit.is_zero() => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| ServerError::Timeout(limit))?,
            _ => attempt.await,
        }
    }

    async fn retry(&self, endpoint: &Endpoint, request: &BuildRequest) -> ServerResult<BuildResult> {
        let mut launched: Option<Box<dyn LaunchedServer>> = None;

        loop {
            let error = match self.send(endpoint, request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_unreachable() => e,
                Err(e) => return Err(e),
            };

            match launched.as_mut() {
                None => {
                    debug!("{}; launching a server", error);
                    launched = Some(self.launcher.launch(endpoint.owner())?);
                    tokio::time::sleep(self.config.launch_delay).await;
                }
                Some(server) => {
                    if server.has_exited() {
                        return Err(ServerError::Launch(format!(
                            "server for owner {} exited before listening at {}",
                            endpoint.owner(),
                            endpoint
                        )));
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// One attempt at a remote build call.
    pub async fn send(&self, endpoint: &Endpoint, request: &BuildRequest) -> ServerResult<BuildResult> {
        match endpoint {
            Endpoint::LoopbackHttp { .. } => self.send_http(endpoint, request).await,
            Endpoint::LocalSocket { .. } => send_local(endpoint, request).await,
        }
    }

    async fn send_http(&self, endpoint: &Endpoint, request: &BuildRequest) -> ServerResult<BuildResult> {
        let url = endpoint
            .url()
            .ok_or_else(|| ServerError::Protocol(format!("{endpoint} is not an HTTP endpoint")))?;

        let response = match self.http.post(&url).json(request).send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() => {
                return Err(ServerError::Unreachable(format!("{endpoint}: {e}")));
            }
            Err(e) => {
                return Err(ServerError::Protocol(format!(
                    "Request to {endpoint} failed: {e}"
                )));
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ServerError::Unreachable(format!(
                "{endpoint}: no server for this owner"
            )));
        }
        if !status.is_success() {
            return Err(ServerError::Protocol(format!(
                "{endpoint} answered {status}"
            )));
        }

        let body: BuildResponse = response
            .json()
            .await
            .map_err(|e| ServerError::Protocol(format!("Invalid response from {endpoint}: {e}")))?;
        body.into_result()
    }
}

async fn exchange<S>(stream: &mut S, request: &BuildRequest) -> ServerResult<BuildResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(stream, request).await?;
    let response: BuildResponse = read_frame(stream).await?;
    response.into_result()
}

#[cfg(unix)]
async fn send_local(endpoint: &Endpoint, request: &BuildRequest) -> ServerResult<BuildResult> {
    use std::io::ErrorKind;

    let Endpoint::LocalSocket { path, .. } = endpoint else {
        return Err(ServerError::Protocol(format!(
            "{endpoint} is not a local socket"
        )));
    };

    let mut stream = match tokio::net::UnixStream::connect(path).await {
        Ok(stream) => stream,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Err(ServerError::Unreachable(format!("{endpoint}: {e}")));
        }
        Err(e) => {
            return Err(ServerError::Io {
                path: path.clone(),
                message: e.to_string(),
            });
        }
    };

    exchange(&mut stream, request).await
}

#[cfg(windows)]
async fn send_local(endpoint: &Endpoint, request: &BuildRequest) -> ServerResult<BuildResult> {
    use std::io::ErrorKind;
    use tokio::net::windows::named_pipe::ClientOptions;

    const ERROR_PIPE_BUSY: i32 = 231;

    let Endpoint::LocalSocket { path, .. } = endpoint else {
        return Err(ServerError::Protocol(format!(
            "{endpoint} is not a local socket"
        )));
    };

    // A busy pipe has a live server behind it; wait for a free instance.
    let mut pipe = loop {
        match ClientOptions::new().open(path.as_os_str()) {
            Ok(pipe) => break pipe,
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ServerError::Unreachable(format!("{endpoint}: {e}")));
            }
            Err(e) => {
                return Err(ServerError::Io {
                    path: path.clone(),
                    message: e.to_string(),
                });
            }
        }
    };

    exchange(&mut pipe, request).await
}

#[cfg(not(any(unix, windows)))]
async fn send_local(endpoint: &Endpoint, _request: &BuildRequest) -> ServerResult<BuildResult> {
    Err(ServerError::Protocol(format!(
        "{endpoint}: local sockets are not supported on this platform"
    )))
}
