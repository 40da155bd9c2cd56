//! zext-cli - Operator console for zext
//!
//! Runs one command given on the command line, or reads commands from
//! standard input until `exit` or end of input:
//! - `extract` / `compress` the configured source into the configured destination
//! - `extract view` to page through files a pending extraction would overwrite
//! - `status`, `terminate` and `forceterminate` to control the task queue

use anyhow::Result;
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process;
use tracing::error;
use tracing_subscriber::EnvFilter;
use zext_core::{BuildError, Config, Engine};

mod console;

use console::{Command, Console, TaskFailed};

/// zext - queued extraction and compression of nested archives
#[derive(Parser)]
#[command(name = "zext")]
#[command(author, version, about = "Queued extraction and compression of nested archives", long_about = None)]
struct Cli {
    /// Configuration file to use instead of the one in the user config directory
    #[arg(long, global = true, env = "ZEXT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all log output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Name pending conflict warnings are tracked under
    #[arg(long, global = true, default_value = "console")]
    requester: String,

    /// Run a single command and exit; without one, commands are read from stdin
    #[command(subcommand)]
    command: Option<Command>,
}

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let result = run();

    match result {
        Ok(_) => process::exit(0),
        Err(e) => {
            error!("Error: {:#}", e);
            process::exit(map_error_to_exit_code(&e));
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    let config = Config::load_or_create(&config_path)?;
    let engine = Engine::from_config(&config)?;

    let stdout = io::stdout();
    let mut console = Console::new(engine, config, config_path, cli.requester, stdout.lock());

    match cli.command {
        Some(command) => console.run_once(command),
        None => console.run_interactive(io::stdin().lock()),
    }
}

fn map_error_to_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(core_err) = err.downcast_ref::<zext_core::Error>() {
        match core_err {
            zext_core::Error::Io(_) => 2,
            zext_core::Error::Build(BuildError::SourceNotFound(_)) => 2,
            zext_core::Error::Build(_) => 3,
            zext_core::Error::Stage(_) => 4,
            zext_core::Error::Submit(_) => 5,
            zext_core::Error::Config(_) => 1,
        }
    } else if err.is::<TaskFailed>() {
        4
    } else if err.is::<std::io::Error>() {
        2
    } else {
        1
    }
}
