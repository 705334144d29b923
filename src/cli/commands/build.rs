//! Build command - bring a target up to date

use crate::build::{Engine, StepEvent};
use crate::cli::args::BuildArgs;
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, BuildProgress, UiContext};
use std::path::Path;
use tracing::debug;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config, project: &Path) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let config = apply_overrides(config, &args);

    let engine = Engine::from_config(project, &config).await?;
    ui::intro(&ctx, &format!("kiln build {}", args.target));
    ui::key_value(&ctx, "runtime", engine.runtime_name());
    if !config.build.strict_staging {
        ui::step_warn(&ctx, "Strict staging off: missing dependency artifacts are skipped");
    }

    // Sizes the progress bar; other planning errors resurface from build()
    // so the failure policy still applies
    let steps = match engine.plan(&args.target).await {
        Ok(planned) => planned.plan.len(),
        Err(e @ KilnError::TargetNotFound(_)) => return Err(e),
        Err(e) => {
            debug!("Planning failed: {}", e);
            0
        }
    };

    let progress = BuildProgress::new(&ctx, &args.target, steps);
    let result = engine
        .build(&args.target, &|event: &StepEvent| progress.on_event(event))
        .await;
    progress.finish();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if let KilnError::BuildStepFailed { ref output, .. } = e {
                if !output.is_empty() {
                    eprintln!("{}", output);
                }
            }
            if let Some(step) = e.target() {
                ui::step_error_detail(&ctx, "Failed step", step);
            }
            ui::outro_error(&ctx, &format!("Build of {} failed", args.target));
            return Err(e);
        }
    };

    if outcome.up_to_date() {
        ui::step_info(&ctx, &format!("{} is up to date", outcome.target));
    } else {
        ui::step_ok_detail(
            &ctx,
            &format!("Built {} step(s)", outcome.built.len()),
            &outcome.order.join(" → "),
        );
    }
    ui::key_value(&ctx, "artifact", &outcome.artifact.display().to_string());
    ui::key_value(&ctx, "hash", &outcome.hash.to_hex());
    ui::outro_success(&ctx, &format!("{} ready", outcome.target));

    Ok(())
}

/// Command-line flags layered over the loaded configuration
fn apply_overrides(config: &Config, args: &BuildArgs) -> Config {
    let mut config = config.clone();
    if let Some(jobs) = args.jobs {
        config.build.jobs = jobs;
    }
    if let Some(policy) = args.on_failure {
        config.cache.on_failure = policy.into();
    }
    if let Some(ref dir) = args.output_dir {
        config.build.output_dir = Some(dir.clone());
    }
    config
}
