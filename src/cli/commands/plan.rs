//! Plan command - show what a build would run

use crate::build::Engine;
use crate::cli::args::PlanArgs;
use crate::config::Config;
use crate::error::KilnResult;
use console::style;
use std::path::Path;

/// Execute the plan command
pub async fn execute(args: PlanArgs, config: &Config, project: &Path) -> KilnResult<()> {
    let engine = Engine::from_config(project, config).await?;
    let planned = engine.plan(&args.target).await?;

    if planned.plan.is_empty() {
        println!("{} is up to date", style(&args.target).bold());
        return Ok(());
    }

    println!(
        "{} {} step(s) for {}",
        style("Plan:").bold(),
        planned.plan.len(),
        style(&args.target).bold()
    );

    for (i, step) in planned.plan.steps().iter().enumerate() {
        let node = planned.graph.node(step.node);
        let action = match node.recipe().exec_spec() {
            Some(exec) => format!("{} $ {}", exec.environment, exec.command),
            None => "read source".to_string(),
        };
        let after = step
            .waits_on
            .iter()
            .map(|w| (w + 1).to_string())
            .collect::<Vec<_>>();

        print!("  {:>3}. {:<30} {}", i + 1, node.path(), style(action).dim());
        if after.is_empty() {
            println!();
        } else {
            println!("  {}", style(format!("(after {})", after.join(", "))).dim());
        }
    }

    let cached: Vec<&str> = planned
        .graph
        .ids()
        .map(|id| planned.graph.node(id))
        .filter(|n| n.from_cache())
        .map(|n| n.path())
        .collect();
    if !cached.is_empty() {
        println!("{} {}", style("From cache:").dim(), cached.join(", "));
    }

    Ok(())
}
