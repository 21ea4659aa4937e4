//! Pluggable device drivers.
//!
//! A driver turns raw bus transfers into structured readings and accepts
//! writes. Drivers are looked up by `(module, class)` in a
//! [`DriverRegistry`], which holds two kinds of modules:
//!
//! - **built-in** modules compiled into the crate ([`builtin`]), and
//! - **definition** modules parsed from TOML files ([`definition`]) that
//!   can be edited and hot-reloaded at runtime.

pub mod builtin;
pub mod definition;
mod registry;

use std::sync::Arc;

use crate::bus::SharedBus;
use crate::error::CoreError;
use crate::model::BusAddress;

pub use definition::{DefinitionStore, ModuleDefinition};
pub use registry::{DriverFactory, DriverRegistry, ModuleOrigin, PendingDriver};

/// Structured reading produced by [`DeviceDriver::read`].
pub type Reading = serde_json::Value;

/// Shared, thread-safe driver instance.
pub type DriverHandle = Arc<dyn DeviceDriver>;

/// What a factory gets to build a driver for one device.
#[derive(Debug, Clone)]
pub struct DriverContext {
    pub address: BusAddress,
    pub bus: SharedBus,
    /// `module.Class`, for error messages.
    pub qualified_name: String,
}

/// Interface every device driver implements.
///
/// Both operations block on bus I/O; the controller calls them from
/// blocking threads. Drivers that cannot read or write keep the default
/// implementations, which report [`CoreError::Unsupported`].
pub trait DeviceDriver: Send + Sync {
    /// Qualified `module.Class` name.
    fn name(&self) -> &str;

    fn address(&self) -> BusAddress;

    fn read(&self) -> Result<Reading, CoreError> {
        Err(CoreError::unsupported("read", self.name()))
    }

    /// Write `value`, optionally to a named channel.
    fn write(&self, value: &serde_json::Value, channel: Option<&str>) -> Result<(), CoreError> {
        let _ = (value, channel);
        Err(CoreError::unsupported("write", self.name()))
    }
}

/// Interpret a control-channel value as one byte.
///
/// Accepts integers 0-255, booleans, and decimal or `0x` hex strings.
pub(crate) fn value_as_byte(value: &serde_json::Value) -> Result<u8, CoreError> {
    let parsed = match value {
        serde_json::Value::Bool(b) => Some(u8::from(*b)),
        serde_json::Value::Number(n) => n.as_u64().and_then(|v| u8::try_from(v).ok()),
        serde_json::Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x") {
                Some(hex) => u8::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    };
    parsed.ok_or_else(|| CoreError::config(format!("cannot write {value} as a single byte")))
}

/// Interpret a control-channel value as on/off.
pub(crate) fn value_as_flag(value: &serde_json::Value) -> Result<bool, CoreError> {
    match value {
        serde_json::Value::Bool(b) => Ok(*b),
        serde_json::Value::String(s) if s.eq_ignore_ascii_case("on") => Ok(true),
        serde_json::Value::String(s) if s.eq_ignore_ascii_case("off") => Ok(false),
        other => value_as_byte(other).map(|b| b != 0),
    }
}
