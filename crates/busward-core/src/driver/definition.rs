//! Declarative driver modules.
//!
//! A definition module is a TOML document describing one or more driver
//! classes as register transfers. Its text is the module's "interface
//! code": it can be listed, fetched, edited and saved through the control
//! channel, and saving hot-reloads the module.
//!
//! ```toml
//! description = "TMP102 temperature sensor"
//!
//! [classes.Tmp102.probe]
//! register = 0x01
//! expect = 0x60
//! mask = 0xe0
//!
//! [classes.Tmp102.read]
//! register = 0x00
//! length = 2
//! format = "i16_be"
//! scale = 0.00390625
//! field = "celsius"
//!
//! [classes.Tmp102.write]
//! channels = { config = 0x01, t_low = 0x02 }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{DeviceDriver, DriverContext, Reading, value_as_byte};
use crate::bus::SharedBus;
use crate::error::CoreError;
use crate::model::BusAddress;
use crate::persist::write_atomic;

const DEFINITION_EXTENSION: &str = "toml";

// ── Definition types ─────────────────────────────────────────────────

/// Parsed contents of one definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDefinition {
    #[serde(default)]
    pub description: Option<String>,
    pub classes: BTreeMap<String, ClassDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassDefinition {
    /// Identity check run when a driver instance is constructed.
    pub probe: Option<ProbeSpec>,
    pub read: Option<ReadSpec>,
    pub write: Option<WriteSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeSpec {
    pub register: u8,
    pub expect: u8,
    #[serde(default = "full_mask")]
    pub mask: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadSpec {
    /// Start register; a plain byte read when absent.
    pub register: Option<u8>,
    #[serde(default = "one")]
    pub length: usize,
    #[serde(default)]
    pub format: ValueFormat,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    /// Key the decoded value is published under (default `value`).
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteSpec {
    /// Register for writes without a channel; a plain byte write when absent.
    pub register: Option<u8>,
    /// Named channels mapped to registers.
    #[serde(default)]
    pub channels: BTreeMap<String, u8>,
}

/// How the raw bytes of a read are decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    /// Publish the raw bytes as an array.
    Bytes,
    #[default]
    U8,
    I8,
    U16Be,
    U16Le,
    I16Be,
    I16Le,
}

impl ValueFormat {
    fn min_len(self) -> usize {
        match self {
            Self::Bytes | Self::U8 | Self::I8 => 1,
            Self::U16Be | Self::U16Le | Self::I16Be | Self::I16Le => 2,
        }
    }

    fn decode(self, bytes: &[u8]) -> Option<i64> {
        let b0 = *bytes.first()?;
        let pair = || bytes.get(..2).map(|s| [s[0], s[1]]);
        Some(match self {
            Self::Bytes => return None,
            Self::U8 => i64::from(b0),
            Self::I8 => i64::from(i8::from_ne_bytes([b0])),
            Self::U16Be => i64::from(u16::from_be_bytes(pair()?)),
            Self::U16Le => i64::from(u16::from_le_bytes(pair()?)),
            Self::I16Be => i64::from(i16::from_be_bytes(pair()?)),
            Self::I16Le => i64::from(i16::from_le_bytes(pair()?)),
        })
    }
}

fn full_mask() -> u8 {
    0xff
}

fn one() -> usize {
    1
}

impl ModuleDefinition {
    /// Parse and validate definition text.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let def: Self = toml::from_str(text)
            .map_err(|e| CoreError::config(format!("invalid driver definition: {e}")))?;
        def.validate()?;
        Ok(def)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.classes.is_empty() {
            return Err(CoreError::config("driver definition declares no classes"));
        }
        for (class, spec) in &self.classes {
            if class.trim().is_empty() {
                return Err(CoreError::config("driver class names must not be blank"));
            }
            if let Some(read) = &spec.read {
                if read.length == 0 || read.length > 32 {
                    return Err(CoreError::config(format!(
                        "{class}: read length must be between 1 and 32"
                    )));
                }
                if read.length < read.format.min_len() {
                    return Err(CoreError::config(format!(
                        "{class}: format {:?} needs at least {} bytes",
                        read.format,
                        read.format.min_len()
                    )));
                }
                if read.register.is_none() && read.length > 1 {
                    return Err(CoreError::config(format!(
                        "{class}: multi-byte reads need a start register"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ── Definition-backed driver ─────────────────────────────────────────

/// Driver instance built from a [`ClassDefinition`].
pub struct DefinitionDriver {
    name: String,
    address: BusAddress,
    bus: SharedBus,
    spec: ClassDefinition,
}

impl DefinitionDriver {
    pub(crate) fn construct(ctx: &DriverContext, spec: ClassDefinition) -> Result<Self, CoreError> {
        if let Some(probe) = spec.probe {
            let found = ctx
                .bus
                .read_byte_data(ctx.address, probe.register)
                .map_err(|e| CoreError::Construction {
                    driver: ctx.qualified_name.clone(),
                    address: ctx.address,
                    message: format!("identity probe failed: {e}"),
                })?;
            if found & probe.mask != probe.expect & probe.mask {
                return Err(CoreError::Construction {
                    driver: ctx.qualified_name.clone(),
                    address: ctx.address,
                    message: format!(
                        "identity register {:#04x} reads {found:#04x}, expected {:#04x}",
                        probe.register, probe.expect
                    ),
                });
            }
        }

        Ok(Self {
            name: ctx.qualified_name.clone(),
            address: ctx.address,
            bus: ctx.bus.clone(),
            spec,
        })
    }
}

impl DeviceDriver for DefinitionDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> BusAddress {
        self.address
    }

    fn read(&self) -> Result<Reading, CoreError> {
        let Some(read) = &self.spec.read else {
            return Err(CoreError::unsupported("read", &self.name));
        };

        let bytes = match read.register {
            Some(register) => self
                .bus
                .read_block_data(self.address, register, read.length)?,
            None => vec![self.bus.read_byte(self.address)?],
        };

        let field = read.field.as_deref().unwrap_or("value");
        let value = match read.format.decode(&bytes) {
            None => json!(bytes),
            Some(raw) if read.scale.is_some() || read.offset.is_some() => {
                #[allow(clippy::cast_precision_loss)]
                let scaled = raw as f64 * read.scale.unwrap_or(1.0) + read.offset.unwrap_or(0.0);
                json!(scaled)
            }
            Some(raw) => json!(raw),
        };

        Ok(json!({ field: value, "raw": bytes }))
    }

    fn write(&self, value: &serde_json::Value, channel: Option<&str>) -> Result<(), CoreError> {
        let Some(write) = &self.spec.write else {
            return Err(CoreError::unsupported("write", &self.name));
        };
        let byte = value_as_byte(value)?;

        match channel {
            Some(channel) => {
                let register = write.channels.get(channel).copied().ok_or_else(|| {
                    CoreError::config(format!("{} has no channel '{channel}'", self.name))
                })?;
                self.bus.write_byte_data(self.address, register, byte)?;
            }
            None => match write.register {
                Some(register) => self.bus.write_byte_data(self.address, register, byte)?,
                None => self.bus.write_byte(self.address, byte)?,
            },
        }
        Ok(())
    }
}

// ── Definition files on disk ─────────────────────────────────────────

/// Directory of `<module>.toml` definition files.
#[derive(Debug, Clone)]
pub struct DefinitionStore {
    dir: PathBuf,
}

impl DefinitionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Module names with a definition file, sorted. A missing directory is empty.
    pub fn list(&self) -> Result<Vec<String>, CoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CoreError::Persistence {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == DEFINITION_EXTENSION))
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_owned))
            .filter(|name| validate_module_name(name).is_ok())
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn read(&self, module: &str) -> Result<String, CoreError> {
        let path = self.path_for(module)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::not_found(format!("driver module '{module}'")))
            }
            Err(source) => Err(CoreError::Persistence { path, source }),
        }
    }

    /// Validate and atomically write a module, returning the parsed definition.
    pub fn write(&self, module: &str, code: &str) -> Result<ModuleDefinition, CoreError> {
        let path = self.path_for(module)?;
        let definition = ModuleDefinition::parse(code)?;
        write_atomic(&path, code.as_bytes())
            .map_err(|source| CoreError::Persistence { path, source })?;
        Ok(definition)
    }

    /// Parse every definition file, reporting failures per module.
    pub fn load_all(&self) -> Result<Vec<(String, Result<ModuleDefinition, CoreError>)>, CoreError> {
        Ok(self
            .list()?
            .into_iter()
            .map(|name| {
                let parsed = self
                    .read(&name)
                    .and_then(|text| ModuleDefinition::parse(&text));
                (name, parsed)
            })
            .collect())
    }

    fn path_for(&self, module: &str) -> Result<PathBuf, CoreError> {
        validate_module_name(module)?;
        Ok(self.dir.join(format!("{module}.{DEFINITION_EXTENSION}")))
    }
}

/// Module names double as file stems: ASCII letters, digits, `_` and `-`.
pub fn validate_module_name(name: &str) -> Result<(), CoreError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CoreError::config(format!("invalid driver module name '{name}'")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bus::SimulatedBus;

    const TMP102: &str = r#"
description = "TMP102 temperature sensor"

[classes.Tmp102.probe]
register = 0x01
expect = 0x60
mask = 0xe0

[classes.Tmp102.read]
register = 0x00
length = 2
format = "i16_be"
scale = 0.0625
field = "celsius"

[classes.Tmp102.write]
channels = { config = 0x01 }
"#;

    fn addr(raw: u8) -> BusAddress {
        BusAddress::new(raw).unwrap()
    }

    fn ctx(sim: &SimulatedBus, raw: u8) -> DriverContext {
        DriverContext {
            address: addr(raw),
            bus: SharedBus::new(sim.clone()),
            qualified_name: "sensors.Tmp102".into(),
        }
    }

    fn tmp102_class() -> ClassDefinition {
        ModuleDefinition::parse(TMP102).unwrap().classes["Tmp102"].clone()
    }

    #[test]
    fn parses_example_definition() {
        let def = ModuleDefinition::parse(TMP102).unwrap();
        let class = &def.classes["Tmp102"];
        assert_eq!(class.read.as_ref().unwrap().format, ValueFormat::I16Be);
        assert_eq!(class.write.as_ref().unwrap().channels["config"], 0x01);
    }

    #[test]
    fn rejects_inconsistent_definitions() {
        assert!(ModuleDefinition::parse("classes = {}").is_err());
        assert!(ModuleDefinition::parse("not toml at all [").is_err());
        assert!(
            ModuleDefinition::parse(
                "[classes.X.read]\nregister = 0\nlength = 1\nformat = \"u16_le\""
            )
            .is_err()
        );
        assert!(ModuleDefinition::parse("[classes.X.read]\nlength = 4").is_err());
        assert!(ModuleDefinition::parse("[classes.X]\nbogus = 1").is_err());
    }

    #[test]
    fn decodes_scaled_signed_reading() {
        let sim = SimulatedBus::new();
        sim.attach_with_registers(addr(0x48), &[(0x00, 0x19), (0x01, 0x60)]);
        let driver = DefinitionDriver::construct(&ctx(&sim, 0x48), tmp102_class()).unwrap();

        let reading = driver.read().unwrap();
        // 0x1960 = 6496; 6496 * 0.0625 = 406.0
        assert_eq!(reading["celsius"], 406.0);
        assert_eq!(reading["raw"], json!([0x19, 0x60]));
    }

    #[test]
    fn probe_mismatch_is_construction_error() {
        let sim = SimulatedBus::new();
        sim.attach_with_registers(addr(0x48), &[(0x01, 0x00)]);
        let err = DefinitionDriver::construct(&ctx(&sim, 0x48), tmp102_class())
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::Construction { .. }));
    }

    #[test]
    fn channel_writes_target_mapped_register() {
        let sim = SimulatedBus::new();
        sim.attach_with_registers(addr(0x48), &[(0x01, 0x60)]);
        let driver = DefinitionDriver::construct(&ctx(&sim, 0x48), tmp102_class()).unwrap();

        driver.write(&json!(0x61), Some("config")).unwrap();
        assert_eq!(sim.register(addr(0x48), 0x01), Some(0x61));

        assert!(matches!(
            driver.write(&json!(1), Some("missing")),
            Err(CoreError::Config { .. })
        ));
        // No channel-less register configured: falls back to a plain byte write.
        driver.write(&json!(7), None).unwrap();
        assert_eq!(sim.latch(addr(0x48)), Some(7));
    }

    #[test]
    fn class_without_read_is_unsupported() {
        let sim = SimulatedBus::new();
        sim.attach(addr(0x50));
        let class = ModuleDefinition::parse("[classes.Sink.write]\nregister = 0x10")
            .unwrap()
            .classes["Sink"]
            .clone();
        let driver = DefinitionDriver::construct(&ctx(&sim, 0x50), class).unwrap();

        assert!(matches!(driver.read(), Err(CoreError::Unsupported { .. })));
    }

    #[test]
    fn store_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path().join("interfaces"));

        assert!(store.list().unwrap().is_empty());
        store.write("sensors", TMP102).unwrap();
        std::fs::write(dir.path().join("interfaces/notes.txt"), "ignored").unwrap();

        assert_eq!(store.list().unwrap(), vec!["sensors".to_string()]);
        assert_eq!(store.read("sensors").unwrap(), TMP102);
        assert!(matches!(store.read("absent"), Err(CoreError::NotFound { .. })));

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].1.is_ok());
    }

    #[test]
    fn store_refuses_invalid_text_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());

        assert!(store.write("../escape", TMP102).is_err());
        assert!(store.write("broken", "classes = 3").is_err());
        assert!(store.list().unwrap().is_empty());
    }
}
