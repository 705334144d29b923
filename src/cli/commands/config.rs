//! Config command - show configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::KilnResult;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> KilnResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        Some(ConfigAction::Path) => {
            println!("{}", manager.path().display());
        }
    }

    Ok(())
}
