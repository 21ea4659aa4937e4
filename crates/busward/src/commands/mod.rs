//! Command dispatch: bridges CLI args -> core calls -> output formatting.

pub mod config_cmd;
pub mod interfaces;
pub mod run;
pub mod scan;
pub mod state;

use busward_config::Config;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a command that needs a loaded configuration.
pub async fn dispatch(cmd: Command, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(args, config).await,
        Command::Scan => scan::handle(config, global).await,
        Command::State => state::handle(config, global),
        Command::Interfaces(cmd) => interfaces::handle(cmd, config, global),
        // Config is handled before the configuration is required
        Command::Config(_) => unreachable!(),
    }
}
