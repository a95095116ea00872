//! Kiln CLI - incremental compilation through a long-lived build server.
//!
//! Called with compiler arguments it acts as a client: it sends the build to
//! the server of the owning process, starting one when none is running.
//! `kiln server <owner-pid>` runs the server itself.

mod args;
mod compile;
mod logging;
mod serve;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Incremental compilation server with a compiler-compatible command line")]
#[command(version)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Settings file (default: kiln.json next to the executable)
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Owning process id; overrides the owner define
    #[arg(long, value_name = "PID")]
    owner: Option<u32>,

    /// Host the server on a thread of this process
    #[arg(long)]
    in_process: bool,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,

    /// Print version
    #[arg(long, action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Compiler arguments and response files (@file)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    args: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the build server for an owning process
    Server {
        /// Process id of the owner; the server exits with it (0 = never)
        owner: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Some(Command::Server { owner }) => {
            serve::execute(owner, cli.settings.as_deref(), cli.verbose).await
        }
        None => {
            let options = compile::ClientOptions {
                args: cli.args,
                owner: cli.owner,
                in_process: cli.in_process,
                settings_path: cli.settings,
                verbose: cli.verbose,
            };
            compile::execute(options).await
        }
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
