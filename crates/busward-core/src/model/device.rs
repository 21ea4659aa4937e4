// ── Device record ──
//
// Field names follow the persisted document that the web front-end
// reads and writes, so renames here are wire changes.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumIter};

use super::address::BusAddress;

/// Display name given to devices nobody has labelled yet.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Lifecycle bucket a device record occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Bucket {
    /// Present on the bus with a live driver.
    Active,
    /// Present on the bus, no driver configured yet.
    Pending,
    /// Previously known, currently absent or deactivated.
    Archived,
}

/// One known device.
///
/// Older documents name the binding `library`/`class`; both spellings are
/// read, and only the `interface_*` names are written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DeviceRecordWire")]
pub struct DeviceRecord {
    pub address: BusAddress,

    /// Driver module name; empty when unbound.
    #[serde(rename = "interface_module")]
    pub driver_module: String,

    /// Driver class within the module; empty when unbound.
    #[serde(rename = "interface_class")]
    pub driver_class: String,

    #[serde(rename = "name")]
    pub display_name: String,

    pub active: bool,

    /// Seconds between polls. Absent, zero, or negative disables polling.
    #[serde(rename = "read_interval", skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<f64>,

    /// Fields written by front-ends that the core does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Inbound shape of a [`DeviceRecord`], holding both binding spellings.
#[derive(Deserialize)]
struct DeviceRecordWire {
    address: BusAddress,
    #[serde(default)]
    interface_module: Option<String>,
    #[serde(default)]
    library: Option<String>,
    #[serde(default)]
    interface_class: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default = "default_name")]
    name: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    active: bool,
    #[serde(default)]
    read_interval: Option<f64>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl From<DeviceRecordWire> for DeviceRecord {
    fn from(wire: DeviceRecordWire) -> Self {
        Self {
            address: wire.address,
            driver_module: first_non_blank(wire.interface_module, wire.library),
            driver_class: first_non_blank(wire.interface_class, wire.class),
            display_name: wire.name,
            active: wire.active,
            poll_interval_secs: wire.read_interval,
            extra: wire.extra,
        }
    }
}

/// `current` unless it is missing or blank, then `legacy`.
fn first_non_blank(current: Option<String>, legacy: Option<String>) -> String {
    current
        .filter(|v| !v.trim().is_empty())
        .or(legacy)
        .unwrap_or_default()
}

impl DeviceRecord {
    /// A freshly discovered device with no driver binding.
    pub fn discovered(address: BusAddress) -> Self {
        Self {
            address,
            driver_module: String::new(),
            driver_class: String::new(),
            display_name: default_name(),
            active: false,
            poll_interval_secs: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Bind a driver, returning the updated record.
    pub fn with_driver(mut self, module: impl Into<String>, class: impl Into<String>) -> Self {
        self.driver_module = module.into();
        self.driver_class = class.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, secs: f64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    pub fn activated(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn has_driver_module(&self) -> bool {
        !self.driver_module.trim().is_empty()
    }

    pub fn has_custom_name(&self) -> bool {
        self.display_name != UNKNOWN_DEVICE_NAME
    }

    /// Poll period, or `None` when the record is not pollable.
    pub fn poll_period(&self) -> Option<Duration> {
        self.poll_interval_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Active and pollable.
    pub fn wants_polling(&self) -> bool {
        self.active && self.poll_period().is_some()
    }

    /// `(module, class)` pair identifying the driver this record binds to.
    pub fn binding(&self) -> (&str, &str) {
        (self.driver_module.trim(), self.driver_class.trim())
    }
}

fn default_name() -> String {
    UNKNOWN_DEVICE_NAME.into()
}

/// Accept `true`/`false` as well as the `0`/`1` integers older documents use.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Null(()),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i == 1,
        Flag::Null(()) => false,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addr(raw: u8) -> BusAddress {
        BusAddress::new(raw).unwrap()
    }

    #[test]
    fn reads_legacy_document_shape() {
        let record: DeviceRecord = serde_json::from_value(json!({
            "address": "0x48",
            "library": "",
            "class": "",
            "name": "Unknown Device",
            "active": 0
        }))
        .unwrap();

        assert_eq!(record.address, addr(0x48));
        assert!(!record.active);
        assert!(!record.has_driver_module());
        assert!(!record.has_custom_name());
        assert!(record.extra.is_empty());
    }

    #[test]
    fn reads_interface_fields_and_integer_active() {
        let record: DeviceRecord = serde_json::from_value(json!({
            "address": "0x20",
            "interface_module": "builtin",
            "interface_class": "Pcf8574",
            "name": "Relay board",
            "active": 1,
            "read_interval": 2
        }))
        .unwrap();

        assert!(record.active);
        assert_eq!(record.binding(), ("builtin", "Pcf8574"));
        assert_eq!(record.poll_period(), Some(Duration::from_secs(2)));
        assert!(record.wants_polling());
    }

    #[test]
    fn current_binding_names_win_over_legacy_ones() {
        let record: DeviceRecord = serde_json::from_value(json!({
            "address": "0x10",
            "library": "old_lib",
            "class": "OldClass",
            "interface_module": "builtin",
            "interface_class": "RawByte",
            "name": "Both",
            "active": true
        }))
        .unwrap();

        assert_eq!(record.binding(), ("builtin", "RawByte"));
        assert!(record.extra.is_empty());

        let back = serde_json::to_value(&record).unwrap();
        assert!(back.get("library").is_none());
        assert!(back.get("class").is_none());
        assert_eq!(back["interface_class"], "RawByte");
    }

    #[test]
    fn blank_current_binding_falls_back_to_legacy() {
        let record: DeviceRecord = serde_json::from_value(json!({
            "address": "0x10",
            "library": "builtin",
            "class": "Pcf8574",
            "interface_module": "",
            "interface_class": "  "
        }))
        .unwrap();

        assert_eq!(record.binding(), ("builtin", "Pcf8574"));
        assert_eq!(record.display_name, UNKNOWN_DEVICE_NAME);
    }

    #[test]
    fn preserves_unknown_fields() {
        let record: DeviceRecord = serde_json::from_value(json!({
            "address": "0x21",
            "name": "Fan",
            "active": false,
            "location": "rack 3"
        }))
        .unwrap();

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["location"], "rack 3");
        assert_eq!(back["interface_module"], "");
    }

    #[test]
    fn non_positive_interval_is_not_pollable() {
        let base = DeviceRecord::discovered(addr(0x10)).activated();
        assert!(!base.clone().with_poll_interval(0.0).wants_polling());
        assert!(!base.clone().with_poll_interval(-3.0).wants_polling());
        assert!(!base.clone().with_poll_interval(f64::NAN).wants_polling());
        assert!(!base.wants_polling());
    }

    #[test]
    fn inactive_record_does_not_want_polling() {
        let record = DeviceRecord::discovered(addr(0x10)).with_poll_interval(1.0);
        assert!(!record.wants_polling());
    }

    #[test]
    fn bucket_names_are_snake_case() {
        assert_eq!(Bucket::Active.to_string(), "active");
        assert_eq!(Bucket::Archived.as_ref(), "archived");
    }
}
