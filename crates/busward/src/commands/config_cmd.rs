//! Configuration file management.

use std::path::Path;

use busward_config::{Config, ConfigError};

use crate::cli::{ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

/// `init` and `path` work without a valid configuration; `show` needs one.
pub fn handle(
    cmd: ConfigCommand,
    path: &Path,
    loaded: Result<Config, ConfigError>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        ConfigCommand::Init { force } => {
            busward_config::init_config(path, force).map_err(|e| CliError::config(path, e))?;
            eprintln!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        ConfigCommand::Show => {
            let config = loaded.map_err(|e| CliError::config(path, e))?;
            let out = match global.output {
                OutputFormat::Json | OutputFormat::JsonCompact => {
                    output::render_single(global.output, &config, |_| String::new())?
                }
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&config)
                    .map_err(|e| CliError::config(path, e.into()))?,
            };
            output::print_output(out.trim_end())
        }
        ConfigCommand::Path => output::print_output(&path.display().to_string()),
    }
}
