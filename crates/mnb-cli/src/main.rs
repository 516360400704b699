//! mnb CLI
//!
//! Command-line entry point for mnb, the Matrix to Nextcloud media bridge.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnb_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

/// Filter used when neither `RUST_LOG` nor `--verbose` is given
const DEFAULT_LOG_FILTER: &str = "mnb_core=info,mnb=info";

const VERBOSE_LOG_FILTER: &str = "mnb_core=debug,mnb=debug";

#[derive(Parser)]
#[command(name = "mnb")]
#[command(about = "mnb - Mirror Matrix room media into Nextcloud")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for the bridge
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run the bridge until interrupted (default)
    Run,
    /// Show config location, cursor and configured rooms
    Status,
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Forget the sync cursor so the next run starts fresh
    ResetCursor,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum ConfigCommands {
    /// Show the effective configuration, passwords redacted
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let output = Output::new(OutputFormat::from_flags(cli.json));
    let config_path = cli.config.unwrap_or_else(Config::config_file_path);
    let config = Config::load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::run(config).await,
        Commands::Status => commands::status::show(&config, &config_path, &output),
        Commands::Config { command } => match command {
            Some(ConfigCommands::Show) | None => commands::config::show(&config, &output),
        },
        Commands::ResetCursor => commands::reset::reset_cursor(&config, &output),
    }
}

/// Install the stderr subscriber
///
/// `--verbose` wins over `RUST_LOG`, which wins over the default filter.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
