//! Server mode: `kiln server <owner-pid>`.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use kiln_core::{
    BuildRegistry, CommandEngine, MissingConverter, SymbolConverter, ToolConverter,
};
use kiln_server::{BuildServer, ServerConfig};
use tracing::{error, info, warn};

use crate::logging;
use crate::settings::Settings;

/// Run the build server until the owner exits or Ctrl+C.
pub async fn execute(
    owner: u32,
    settings_path: Option<&Path>,
    verbose: bool,
) -> anyhow::Result<ExitCode> {
    let work_dir = std::env::current_dir().context("Failed to get current directory")?;
    logging::init_server(verbose, &work_dir);
    info!("Kiln server {} starting for owner {}", env!("CARGO_PKG_VERSION"), owner);

    let result = run(owner, settings_path).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result.map(|()| ExitCode::SUCCESS)
}

async fn run(owner: u32, settings_path: Option<&Path>) -> anyhow::Result<()> {
    let settings = Settings::load(settings_path)?;
    let registry = registry(&settings)?;

    let config = ServerConfig {
        owner,
        transport: settings.transport_config(),
        ..Default::default()
    };
    let server = BuildServer::new(config, registry);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    server.run(shutdown).await?;
    Ok(())
}

/// The registry the server builds with, configured from `settings`.
pub fn registry(settings: &Settings) -> anyhow::Result<Arc<BuildRegistry<CommandEngine>>> {
    if settings.compiler.program.as_os_str().is_empty() {
        bail!("No compiler configured (set \"compiler.program\" in the settings file)");
    }

    let engine = Arc::new(CommandEngine::new(settings.compiler.clone()));
    Ok(Arc::new(BuildRegistry::new(engine, symbol_converter(settings))))
}

fn symbol_converter(settings: &Settings) -> Arc<dyn SymbolConverter> {
    if let Some(tool) = &settings.symbol_converter {
        return Arc::new(ToolConverter::new(tool));
    }
    match ToolConverter::locate() {
        Ok(converter) => Arc::new(converter),
        Err(e) => Arc::new(MissingConverter::new(e.to_string())),
    }
}
