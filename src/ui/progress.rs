//! Build progress with CI fallback

use super::context::UiContext;
use crate::build::StepEvent;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress display for one build run
///
/// Shows an indicatif bar in interactive mode and one line per step
/// otherwise. Driven entirely by executor step events.
pub struct BuildProgress {
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    /// Start tracking a run of `steps` build steps for `target`
    pub fn new(ctx: &UiContext, target: &str, steps: usize) -> Self {
        let bar = if ctx.use_fancy_output() && steps > 0 {
            let bar = ProgressBar::new(steps as u64);
            if let Ok(bar_style) = ProgressStyle::default_bar().template(
                "  {spinner:.cyan} Building {prefix}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}",
            ) {
                bar.set_style(
                    bar_style
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .progress_chars("━╸─"),
                );
            }
            bar.set_prefix(target.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            if steps > 0 {
                println!("Building {} ({} steps)...", target, steps);
            }
            None
        };
        Self { bar }
    }

    /// Render one step event
    pub fn on_event(&self, event: &StepEvent) {
        match (&self.bar, event) {
            (Some(bar), StepEvent::Started { target }) => {
                bar.set_message(target.clone());
            }
            (Some(bar), StepEvent::Finished { target, .. }) => {
                bar.inc(1);
                bar.println(format!("  {} {}", style("✓").green(), target));
            }
            (Some(bar), StepEvent::Failed { target, .. }) => {
                bar.println(format!("  {} {}", style("✗").red(), target));
            }
            (None, StepEvent::Started { target }) => {
                println!("  {} {}", style("...").dim(), target);
            }
            (None, StepEvent::Finished { target, hash }) => {
                println!("  {} {} ({})", style("[OK]").green(), target, hash);
            }
            (None, StepEvent::Failed { target, reason }) => {
                println!("  {} {}: {}", style("[FAIL]").red(), target, reason);
            }
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
