//! Client mode: one compile through the owner's build server.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use kiln_core::BuildResult;
use kiln_server::{
    BuildClient, BuildRequest, InProcessLauncher, ProcessLauncher, ServerLauncher, resolve_owner,
};
use tracing::{debug, info};

use crate::args::CompilerArgs;
use crate::logging;
use crate::serve;
use crate::settings::Settings;

/// Command line of one client invocation.
pub struct ClientOptions {
    pub args: Vec<String>,
    pub owner: Option<u32>,
    pub in_process: bool,
    pub settings_path: Option<PathBuf>,
    pub verbose: bool,
}

/// Send one build and print its diagnostics.
///
/// Exits with 0 when the build succeeded and 1 otherwise.
pub async fn execute(options: ClientOptions) -> anyhow::Result<ExitCode> {
    logging::init_client(options.verbose);

    let settings = Settings::load(options.settings_path.as_deref())?;
    let work_dir = std::env::current_dir().context("Failed to get current directory")?;

    let args = CompilerArgs::parse(&options.args, &work_dir)?;
    let build = args.into_options(&work_dir, settings.debug_symbols, settings.output_reuse);
    info!("Output: {}", build.output);

    let (owner, launcher) = if options.in_process {
        let launcher: Arc<dyn ServerLauncher> = Arc::new(InProcessLauncher::new(
            serve::registry(&settings)?,
            settings.transport_config(),
        ));
        (std::process::id(), launcher)
    } else {
        let owner = resolve_owner(
            options.owner,
            &build.defines,
            settings.owner_process_name.as_deref(),
        )?;
        (owner, Arc::new(server_launcher(&options)?) as Arc<dyn ServerLauncher>)
    };
    debug!("Owning process: {}", owner);

    let request = BuildRequest {
        project: project_identity(&work_dir),
        options: build,
    };

    let client = BuildClient::new(settings.client_config(), launcher);
    let result = client.build(owner, &request).await;
    print_result(&result);

    Ok(if result.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Launches `kiln server <owner>` with the same settings and verbosity.
fn server_launcher(options: &ClientOptions) -> anyhow::Result<ProcessLauncher> {
    let mut launcher = ProcessLauncher::current_exe()?;
    if let Some(path) = &options.settings_path {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.clone());
        launcher = launcher.arg("--settings").arg(path);
    }
    if options.verbose {
        launcher = launcher.arg("--verbose");
    }
    Ok(launcher)
}

fn project_identity(work_dir: &Path) -> String {
    work_dir.to_string_lossy().into_owned()
}

fn print_result(result: &BuildResult) {
    for warning in &result.warnings {
        println!("{}", warning);
    }
    for error in &result.errors {
        println!("{}", error);
    }
}
