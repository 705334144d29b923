//! CLI argument definitions using clap derive

use crate::config::FailurePolicy;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Kiln - incremental builds in isolated containers
///
/// Rebuilds only the targets whose inputs changed, running every build
/// step in a fresh container.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Project directory (defaults to current directory)
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub project: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local kiln.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a target and everything it depends on
    Build(BuildArgs),

    /// Show what building a target would run, without running it
    Plan(PlanArgs),

    /// Print the dependency or build graph in Graphviz format
    Graph(GraphArgs),

    /// Inspect or clear the artifact cache
    Cache(CacheArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Target path as declared in the build file
    pub target: String,

    /// Maximum concurrent build steps (overrides build.jobs)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Cache handling when the build fails (overrides cache.on_failure)
    #[arg(long, value_enum)]
    pub on_failure: Option<FailurePolicyArg>,

    /// Directory to write the artifact to (overrides build.output_dir)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Target path as declared in the build file
    pub target: String,
}

/// Arguments for the graph command
#[derive(Parser, Debug)]
pub struct GraphArgs {
    /// Show the pruned build graph for this target instead of the whole project
    pub target: Option<String>,
}

/// Failure policy as accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FailurePolicyArg {
    /// Delete the whole cache
    Purge,
    /// Remove entries written by the failed run
    Invalidate,
    /// Leave the cache untouched
    Keep,
}

impl From<FailurePolicyArg> for FailurePolicy {
    fn from(arg: FailurePolicyArg) -> Self {
        match arg {
            FailurePolicyArg::Purge => FailurePolicy::Purge,
            FailurePolicyArg::Invalidate => FailurePolicy::Invalidate,
            FailurePolicyArg::Keep => FailurePolicy::Keep,
        }
    }
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the merged configuration
    Show,

    /// Show the global configuration file path
    Path,
}

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached artifacts
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show the cache directory
    Path,

    /// Delete every cached artifact
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
