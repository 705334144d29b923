//! Output functions for consistent CLI formatting

use super::context::UiContext;
use console::style;

/// Severity of a step line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Ok,
    Info,
    Warn,
    Fail,
}

impl Level {
    fn plain_tag(self) -> console::StyledObject<&'static str> {
        match self {
            Level::Ok => style("[OK]").green(),
            Level::Info => style("[INFO]").cyan(),
            Level::Warn => style("[WARN]").yellow(),
            Level::Fail => style("[FAIL]").red(),
        }
    }
}

fn step(ctx: &UiContext, level: Level, message: String) {
    if ctx.use_fancy_output() {
        let _ = match level {
            Level::Ok => cliclack::log::success(message),
            Level::Info => cliclack::log::info(message),
            Level::Warn => cliclack::log::warning(message),
            Level::Fail => cliclack::log::error(message),
        };
    } else {
        println!("  {} {}", level.plain_tag(), message);
    }
}

/// Display intro banner
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        cliclack::intro(style(title).cyan().bold()).ok();
    } else {
        println!("{}", style(title).cyan().bold());
    }
}

/// Display success outro
pub fn outro_success(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).green().bold()).ok();
    } else {
        println!("{} {}", style("[OK]").green(), message);
    }
}

/// Display error outro
pub fn outro_error(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).red().bold()).ok();
    } else {
        println!("{} {}", style("[ERROR]").red(), message);
    }
}

/// Display a success step
pub fn step_ok(ctx: &UiContext, message: &str) {
    step(ctx, Level::Ok, message.to_string());
}

/// Display a success step with detail
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    step(ctx, Level::Ok, format!("{} ({})", message, style(detail).dim()));
}

/// Display an info step
pub fn step_info(ctx: &UiContext, message: &str) {
    step(ctx, Level::Info, message.to_string());
}

/// Display a warning step
pub fn step_warn(ctx: &UiContext, message: &str) {
    step(ctx, Level::Warn, message.to_string());
}

/// Display an error step with detail
pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    step(ctx, Level::Fail, format!("{}: {}", message, style(detail).red()));
}

/// Display a dimmed remark
pub fn remark(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::remark(message).ok();
    } else {
        println!("  {}", style(message).dim());
    }
}

/// Print a styled key-value pair
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}
