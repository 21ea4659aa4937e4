//! Persisted registry inspection.

use serde::Serialize;
use tabled::Tabled;

use busward_config::Config;
use busward_core::{Bucket, DeviceRecord, StateStore};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Clone, Serialize, Tabled)]
struct StateRow {
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Driver")]
    driver: String,
    #[tabled(rename = "Poll")]
    poll: String,
    #[tabled(rename = "Active")]
    active: String,
}

impl StateRow {
    fn new(bucket: Bucket, record: &DeviceRecord) -> Self {
        let driver = if record.has_driver_module() {
            format!("{}.{}", record.driver_module, record.driver_class)
        } else {
            "-".into()
        };
        let poll = record
            .poll_period()
            .map_or_else(|| "-".into(), |period| format!("{}s", period.as_secs_f64()));

        Self {
            bucket: bucket.to_string(),
            address: record.address.to_string(),
            name: record.display_name.clone(),
            driver,
            poll,
            active: if record.active { "yes" } else { "no" }.into(),
        }
    }
}

/// Print the registry document. JSON output is the document itself.
pub fn handle(config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let store = StateStore::new(config.state_file());
    let snapshot = store.load()?.unwrap_or_default();

    let out = match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact => {
            output::render_single(global.output, &snapshot, |_| String::new())?
        }
        OutputFormat::Table | OutputFormat::Plain => {
            let rows: Vec<StateRow> = snapshot
                .iter()
                .map(|(bucket, record)| StateRow::new(bucket, record))
                .collect();
            output::render_list(global.output, &rows, StateRow::clone, |r| {
                r.address.clone()
            })?
        }
    };
    output::print_output(&out)
}
