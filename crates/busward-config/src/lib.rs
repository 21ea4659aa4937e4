//! Configuration for busward.
//!
//! A TOML file plus `BUSWARD_`-prefixed environment overrides, resolved
//! with figment and translated into `busward_core::ControllerConfig` and
//! a bus backend. The core never reads files; the binary goes through
//! this crate.
//!
//! ```toml
//! [controller]
//! scan_interval_secs = 5.0
//! state_file = "/var/lib/busward/devices.json"
//!
//! [[bus.devices]]
//! address = "0x20"
//! latch = 0xff
//!
//! [[bus.devices]]
//! address = "0x48"
//! registers = [[0x00, 0x19], [0x01, 0x60]]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use busward_core::{BusAddress, ControllerConfig, SharedBus, SimulatedBus};

/// Environment prefix; nested keys are separated by `__`, e.g.
/// `BUSWARD_CONTROLLER__SCAN_INTERVAL_SECS=2`.
pub const ENV_PREFIX: &str = "BUSWARD_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file {} already exists", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerSection,

    #[serde(default)]
    pub bus: BusSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ControllerSection {
    /// Registry document. Defaults to `devices.json` in the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Definition driver modules. Defaults to `interfaces/` in the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfaces_dir: Option<PathBuf>,

    /// Seconds between bus scans; 0 disables scanning.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: f64,

    #[serde(default = "default_scan_first")]
    pub scan_first: u8,

    #[serde(default = "default_scan_last")]
    pub scan_last: u8,

    /// Events buffered per subscriber before it starts lagging.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            state_file: None,
            interfaces_dir: None,
            scan_interval_secs: default_scan_interval(),
            scan_first: default_scan_first(),
            scan_last: default_scan_last(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_scan_interval() -> f64 {
    5.0
}
fn default_scan_first() -> u8 {
    BusAddress::SCAN_FIRST
}
fn default_scan_last() -> u8 {
    BusAddress::SCAN_LAST
}
fn default_event_buffer() -> usize {
    256
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BusSection {
    #[serde(default)]
    pub backend: BusBackend,

    /// Devices present on the simulated bus.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<SimDeviceSpec>,
}

/// Which transport backs the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusBackend {
    /// In-memory devices described under `[[bus.devices]]`.
    #[default]
    Simulated,
}

/// One simulated device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimDeviceSpec {
    pub address: BusAddress,

    /// Initial value of a plain byte read.
    #[serde(default)]
    pub latch: u8,

    /// Initial `[register, value]` pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registers: Vec<(u8, u8)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when neither `-v` nor `RUST_LOG` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    #[serde(default)]
    pub json: bool,

    /// Also append logs to this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// ── Config file path ────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "busward", "busward")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory holding the registry document and definition modules by default.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(dirs_fallback, |dirs| dirs.data_dir().to_path_buf())
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("busward");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load and validate config from `path` + environment. A missing file
/// yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the canonical path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Write the default config to `path` unless a file is already there.
pub fn init_config(path: &Path, force: bool) -> Result<Config, ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    let cfg = Config::default();
    save_config_to(&cfg, path)?;
    Ok(cfg)
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.controller;
        if !c.scan_interval_secs.is_finite() || c.scan_interval_secs < 0.0 {
            return Err(invalid(
                "controller.scan_interval_secs",
                format!("expected a non-negative number, got {}", c.scan_interval_secs),
            ));
        }
        if c.scan_first > c.scan_last || c.scan_last > BusAddress::MAX {
            return Err(invalid(
                "controller.scan_first/scan_last",
                format!(
                    "{:#04x}..={:#04x} is not a valid 7-bit range",
                    c.scan_first, c.scan_last
                ),
            ));
        }
        if c.event_buffer == 0 {
            return Err(invalid("controller.event_buffer", "must be at least 1"));
        }

        let mut seen = HashSet::new();
        for device in &self.bus.devices {
            if !seen.insert(device.address) {
                return Err(invalid(
                    "bus.devices",
                    format!("address {} is listed twice", device.address),
                ));
            }
        }
        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        self.controller
            .state_file
            .clone()
            .unwrap_or_else(|| data_dir().join("devices.json"))
    }

    pub fn interfaces_dir(&self) -> PathBuf {
        self.controller
            .interfaces_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("interfaces"))
    }

    /// Build the core's runtime configuration.
    pub fn controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        self.validate()?;
        let scan_interval = Duration::try_from_secs_f64(self.controller.scan_interval_secs)
            .map_err(|e| invalid("controller.scan_interval_secs", e.to_string()))?;

        Ok(ControllerConfig {
            state_path: self.state_file(),
            definitions_dir: self.interfaces_dir(),
            scan_interval,
            scan_range: self.controller.scan_first..=self.controller.scan_last,
            event_channel_size: self.controller.event_buffer,
            ..ControllerConfig::default()
        })
    }

    /// Simulated bus populated from `[[bus.devices]]`.
    pub fn simulated_bus(&self) -> SimulatedBus {
        let sim = SimulatedBus::new();
        for device in &self.bus.devices {
            sim.attach_with_registers(device.address, &device.registers);
            sim.set_latch(device.address, device.latch);
        }
        sim
    }

    /// Bus handle for the configured backend.
    pub fn build_bus(&self) -> SharedBus {
        match self.bus.backend {
            BusBackend::Simulated => SharedBus::new(self.simulated_bus()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    fn addr(raw: u8) -> BusAddress {
        BusAddress::new(raw).unwrap()
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let cfg = load_config_from(Path::new("absent.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg, Config::default());

            let controller = cfg.controller_config().map_err(|e| e.to_string())?;
            assert_eq!(controller.scan_interval, Duration::from_secs(5));
            assert_eq!(controller.scan_range, 0x03..=0x77);
            assert!(controller.state_path.ends_with("devices.json"));
            Ok(())
        });
    }

    #[test]
    fn file_values_and_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "busward.toml",
                r#"
                [controller]
                state_file = "state/devices.json"
                scan_interval_secs = 2.0

                [[bus.devices]]
                address = "0x20"
                latch = 255

                [[bus.devices]]
                address = 72
                registers = [[0, 25], [1, 96]]
                "#,
            )?;
            jail.set_env("BUSWARD_CONTROLLER__SCAN_INTERVAL_SECS", "0.5");
            jail.set_env("BUSWARD_LOGGING__JSON", "true");

            let cfg = load_config_from(Path::new("busward.toml")).map_err(|e| e.to_string())?;
            assert!((cfg.controller.scan_interval_secs - 0.5).abs() < f64::EPSILON);
            assert!(cfg.logging.json);
            assert_eq!(cfg.state_file(), PathBuf::from("state/devices.json"));
            assert_eq!(cfg.bus.devices.len(), 2);
            assert_eq!(cfg.bus.devices[1].address, addr(0x48));
            assert_eq!(cfg.bus.devices[1].registers, vec![(0, 25), (1, 96)]);

            let sim = cfg.simulated_bus();
            assert_eq!(sim.attached(), vec![addr(0x20), addr(0x48)]);
            assert_eq!(sim.latch(addr(0x20)), Some(0xff));
            assert_eq!(sim.register(addr(0x48), 1), Some(96));
            Ok(())
        });
    }

    #[test]
    fn zero_interval_disables_scanning() {
        let mut cfg = Config::default();
        cfg.controller.scan_interval_secs = 0.0;
        assert!(cfg.controller_config().unwrap().scan_interval.is_zero());
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.controller.scan_interval_secs = -1.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation { .. })));

        let mut cfg = Config::default();
        cfg.controller.scan_first = 0x50;
        cfg.controller.scan_last = 0x10;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.controller.scan_last = 0x80;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        let device = SimDeviceSpec {
            address: addr(0x10),
            latch: 0,
            registers: Vec::new(),
        };
        cfg.bus.devices = vec![device.clone(), device];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn init_writes_loadable_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        init_config(&path, false).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("scan_interval_secs"));

        let reloaded: Config = toml::from_str(&text).unwrap();
        assert_eq!(reloaded, Config::default());

        assert!(matches!(
            init_config(&path, false),
            Err(ConfigError::AlreadyExists { .. })
        ));
        assert!(init_config(&path, true).is_ok());
    }
}
