//! Long-running controller.
//!
//! Control messages arrive on stdin as newline-delimited JSON
//! (`{"command": "write_device", "payload": {...}}`). Every event and
//! every command acknowledgement goes to stdout as one JSON line. EOF on
//! stdin or Ctrl-C shuts the controller down.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use busward_config::Config;
use busward_core::{Command, CommandAck, Controller};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::output::write_line;

pub async fn handle(args: RunArgs, config: &Config) -> Result<(), CliError> {
    let mut controller_config = config.controller_config().map_err(|e| CliError::Validation {
        field: "configuration".into(),
        reason: e.to_string(),
    })?;
    if let Some(secs) = args.scan_interval {
        controller_config.scan_interval =
            Duration::try_from_secs_f64(secs).map_err(|e| CliError::Validation {
                field: "--scan-interval".into(),
                reason: e.to_string(),
            })?;
    }

    let controller = Controller::new(controller_config, config.build_bus())?;
    controller.start().await?;
    info!(
        state = %controller.config().state_path.display(),
        scan_interval = ?controller.config().scan_interval,
        "controller running"
    );

    let result = serve(&controller).await;
    controller.shutdown().await;
    info!("controller stopped");
    result
}

async fn serve(controller: &Controller) -> Result<(), CliError> {
    let mut events = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                info!("interrupted");
                return Ok(());
            }

            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };
                write_line(&mut stdout, &*event).await?;
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("control input closed");
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                let ack = dispatch_line(controller, &line).await;
                write_line(&mut stdout, &ack).await?;
            }
        }
    }
}

async fn dispatch_line(controller: &Controller, line: &str) -> CommandAck {
    match serde_json::from_str::<Command>(line) {
        Ok(command) => {
            let name = command.name();
            let outcome = controller.execute(command).await;
            CommandAck::new(name, &outcome)
        }
        Err(e) => {
            warn!(error = %e, "unreadable control message");
            CommandAck {
                command: "unknown",
                ok: false,
                result: None,
                error: Some(format!("invalid control message: {e}")),
            }
        }
    }
}
