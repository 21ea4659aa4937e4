//! One-shot bus scan.

use serde::Serialize;
use tabled::Tabled;

use busward_config::Config;
use busward_core::{BusScanner, StateStore};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct ScanEntry {
    address: String,
    /// Registry bucket, if the device is already known.
    bucket: Option<String>,
    name: Option<String>,
}

#[derive(Tabled)]
struct ScanRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Registry")]
    bucket: String,
    #[tabled(rename = "Name")]
    name: String,
}

fn scan_row(entry: &ScanEntry) -> ScanRow {
    ScanRow {
        address: entry.address.clone(),
        bucket: entry.bucket.clone().unwrap_or_else(|| "new".into()),
        name: entry.name.clone().unwrap_or_default(),
    }
}

pub async fn handle(config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let controller_config = config
        .controller_config()
        .map_err(|e| CliError::config(&global.config_path(), e))?;
    let scanner = BusScanner::with_range(config.build_bus(), controller_config.scan_range)?;
    let present = scanner.scan_async().await?;
    tracing::debug!(count = present.len(), "scan complete");

    let known = StateStore::new(config.state_file()).load()?.unwrap_or_default();
    let entries: Vec<ScanEntry> = present
        .into_iter()
        .map(|address| {
            let found = known.find(address);
            ScanEntry {
                address: address.to_string(),
                bucket: found.map(|(bucket, _)| bucket.to_string()),
                name: found.map(|(_, record)| record.display_name.clone()),
            }
        })
        .collect();

    let out = output::render_list(global.output, &entries, scan_row, |e| e.address.clone())?;
    output::print_output(&out)
}
