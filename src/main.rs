//! Kiln - incremental container builds
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kiln::cli::{Cli, Commands};
use kiln::config::ConfigManager;
use kiln::error::{KilnError, KilnResult};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> KilnResult<()> {
    let cli = Cli::parse();

    let project = match cli.project {
        Some(ref dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|e| KilnError::io("getting current directory", e))?,
    };

    // Load configuration
    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Find local config unless --no-local is set
    let local_config_path: Option<PathBuf> = if cli.no_local {
        None
    } else {
        ConfigManager::find_local_config(&project)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, &config.general.log_format);

    match local_config_path {
        Some(ref path) => debug!("Found local config: {}", path.display()),
        None if cli.no_local => debug!("Local config discovery disabled (--no-local)"),
        None => {}
    }
    debug!("Project root: {}", project.display());

    // Ensure state directories exist
    ConfigManager::ensure_state_dirs().await?;

    // Dispatch to command
    match cli.command {
        Commands::Build(args) => kiln::cli::commands::build(args, &config, &project).await,
        Commands::Plan(args) => kiln::cli::commands::plan(args, &config, &project).await,
        Commands::Graph(args) => kiln::cli::commands::graph(args, &config, &project).await,
        Commands::Cache(args) => kiln::cli::commands::cache(args, &config, &project).await,
        Commands::Config(args) => kiln::cli::commands::config(args, &config, &config_manager).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `log_format = "json"` switches to JSON lines
fn init_logging(verbose: u8, format: &str) {
    let filter = match verbose {
        0 => EnvFilter::new("kiln=warn"),
        1 => EnvFilter::new("kiln=info"),
        _ => EnvFilter::new("kiln=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
