// ── Runtime controller configuration ──
//
// Describes where state lives and how often the bus is scanned. The
// core never reads config files; the binary builds a `ControllerConfig`
// and hands it in.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::BusAddress;

/// Default period between bus scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for one controller instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Registry document.
    pub state_path: PathBuf,
    /// Directory of definition driver modules.
    pub definitions_dir: PathBuf,
    /// Time between scans. Zero disables the background scanner.
    pub scan_interval: Duration,
    /// Addresses probed by each scan.
    pub scan_range: RangeInclusive<u8>,
    pub event_channel_size: usize,
    pub command_channel_size: usize,
}

impl ControllerConfig {
    pub fn new(state_path: impl Into<PathBuf>, definitions_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            definitions_dir: definitions_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("devices.json"),
            definitions_dir: PathBuf::from("interfaces"),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            scan_range: BusAddress::SCAN_FIRST..=BusAddress::SCAN_LAST,
            event_channel_size: 256,
            command_channel_size: 64,
        }
    }
}
