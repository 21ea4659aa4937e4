mod cli;
mod commands;
mod error;
mod output;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use busward_config::{Config, ConfigError, LoggingSection};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = cli.global.config_path();
    let loaded = busward_config::load_config_from(&config_path);
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();

    // Logs go to stderr; stdout carries command output and the event stream
    let guard = match init_tracing(&cli.global, &logging) {
        Ok(guard) => guard,
        Err(err) => exit_with(err, None),
    };

    if let Err(err) = run(cli, &config_path, loaded).await {
        exit_with(err, guard);
    }
}

fn exit_with(err: CliError, guard: Option<WorkerGuard>) -> ! {
    let code = err.exit_code();
    eprintln!("{:?}", miette::Report::new(err));
    // Flush the file writer before exit skips destructors
    drop(guard);
    std::process::exit(code);
}

fn init_tracing(
    global: &GlobalOpts,
    logging: &LoggingSection,
) -> Result<Option<WorkerGuard>, CliError> {
    let default_filter = match global.verbose {
        0 => logging.level.as_deref().unwrap_or("warn"),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let json = global.log_json || logging.json;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if json {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    let mut guard = None;
    if let Some(path) = global.log_file.as_ref().or(logging.file.as_ref()) {
        let (dir, file_name) = split_log_path(path)?;
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        guard = Some(worker);

        let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
        if json {
            layers.push(file_layer.json().boxed());
        } else {
            layers.push(file_layer.boxed());
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .init();
    Ok(guard)
}

fn split_log_path(path: &Path) -> Result<(PathBuf, &std::ffi::OsStr), CliError> {
    let file_name = path.file_name().ok_or_else(|| CliError::Validation {
        field: "--log-file".into(),
        reason: format!("{} does not name a file", path.display()),
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}

async fn run(
    cli: Cli,
    config_path: &Path,
    loaded: Result<Config, ConfigError>,
) -> Result<(), CliError> {
    match cli.command {
        // Config commands must work even when the file is missing or broken
        Command::Config(cmd) => commands::config_cmd::handle(cmd, config_path, loaded, &cli.global),

        cmd => {
            let config = loaded.map_err(|e| CliError::config(config_path, e))?;
            tracing::debug!(command = ?cmd, "dispatching command");
            commands::dispatch(cmd, &config, &cli.global).await
        }
    }
}
