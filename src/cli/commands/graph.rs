//! Graph command - Graphviz output

use crate::build::Engine;
use crate::cli::args::GraphArgs;
use crate::config::Config;
use crate::error::KilnResult;
use crate::graph::{build_graph_dot, dependency_graph_dot};
use std::path::Path;

/// Execute the graph command
///
/// Without a target, prints the full dependency graph colored by
/// staleness; with one, prints the pruned build graph for it.
pub async fn execute(args: GraphArgs, config: &Config, project: &Path) -> KilnResult<()> {
    let engine = Engine::from_config(project, config).await?;

    let dot = match args.target {
        Some(target) => build_graph_dot(&engine.plan(&target).await?.graph),
        None => {
            let staleness = engine.staleness().await?;
            dependency_graph_dot(engine.graph(), &staleness)
        }
    };

    print!("{}", dot);
    Ok(())
}
