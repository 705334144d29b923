//! Terminal output for the CLI
//!
//! Uses `cliclack` frames and an `indicatif` progress bar in a terminal,
//! and falls back to plain tagged lines in CI or when piped.
//!
//! ```rust,ignore
//! use kiln::ui::{self, BuildProgress, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "kiln build bin/app");
//!
//! let progress = BuildProgress::new(&ctx, "bin/app", plan.len());
//! let outcome = engine.build("bin/app", &|e| progress.on_event(e)).await?;
//! progress.finish();
//!
//! ui::outro_success(&ctx, "Build complete");
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_error, outro_success, remark, step_error_detail, step_info, step_ok,
    step_ok_detail, step_warn,
};
pub use progress::BuildProgress;
pub use prompts::confirm;
