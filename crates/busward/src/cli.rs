//! Clap derive definitions for the `busward` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "busward",
    version,
    about = "Keep a registry of bus devices in sync with the bus and poll them",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "BUSWARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also append logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl GlobalOpts {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(busward_config::config_path)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// One identifier per line
    Plain,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the controller; control messages on stdin, events on stdout
    Run(RunArgs),

    /// Probe the bus once and print the addresses that answer
    Scan,

    /// Show the persisted device registry
    State,

    /// Inspect driver modules
    #[command(subcommand)]
    Interfaces(InterfacesCommand),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Seconds between scans, overriding the config file (0 disables)
    #[arg(long, value_name = "SECS")]
    pub scan_interval: Option<f64>,
}

#[derive(Debug, Subcommand)]
pub enum InterfacesCommand {
    /// List built-in and definition modules
    List,
    /// Print the definition text of a module
    Show {
        /// Module name
        module: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the resolved configuration
    Show,
    /// Print the config file path
    Path,
}
