// ── Built-in drivers ──
//
// Compiled drivers registered under the `builtin` module.

use std::sync::Mutex;

use serde_json::json;

use super::{DeviceDriver, DriverContext, DriverRegistry, Reading, value_as_byte, value_as_flag};
use crate::bus::SharedBus;
use crate::error::CoreError;
use crate::model::BusAddress;

/// Module name the built-in drivers live under.
pub const MODULE: &str = "builtin";

pub(crate) fn register_all(registry: &mut DriverRegistry) -> Result<(), CoreError> {
    registry.register(MODULE, "RawByte", |ctx| Ok(Box::new(RawByte::new(ctx))))?;
    registry.register(MODULE, "Pcf8574", |ctx| {
        Pcf8574::probe(ctx).map(|d| Box::new(d) as Box<dyn DeviceDriver>)
    })
}

// ── RawByte ──────────────────────────────────────────────────────────

/// Reads and writes a single byte with no register pointer.
pub struct RawByte {
    name: String,
    address: BusAddress,
    bus: SharedBus,
}

impl RawByte {
    fn new(ctx: &DriverContext) -> Self {
        Self {
            name: ctx.qualified_name.clone(),
            address: ctx.address,
            bus: ctx.bus.clone(),
        }
    }
}

impl DeviceDriver for RawByte {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> BusAddress {
        self.address
    }

    fn read(&self) -> Result<Reading, CoreError> {
        let value = self.bus.read_byte(self.address)?;
        Ok(json!({ "value": value }))
    }

    fn write(&self, value: &serde_json::Value, _channel: Option<&str>) -> Result<(), CoreError> {
        let byte = value_as_byte(value)?;
        self.bus.write_byte(self.address, byte)?;
        Ok(())
    }
}

// ── PCF8574 ──────────────────────────────────────────────────────────

/// 8-bit quasi-bidirectional I/O expander.
///
/// Pins written high float and can be read as inputs, so the output
/// latch starts at `0xff`. Channels `"0"`-`"7"` address single pins;
/// a write without a channel replaces the whole port.
pub struct Pcf8574 {
    name: String,
    address: BusAddress,
    bus: SharedBus,
    outputs: Mutex<u8>,
}

impl Pcf8574 {
    const PINS: u8 = 8;

    fn probe(ctx: &DriverContext) -> Result<Self, CoreError> {
        ctx.bus
            .read_byte(ctx.address)
            .map_err(|e| CoreError::Construction {
                driver: ctx.qualified_name.clone(),
                address: ctx.address,
                message: format!("expander did not answer identity probe: {e}"),
            })?;
        Ok(Self {
            name: ctx.qualified_name.clone(),
            address: ctx.address,
            bus: ctx.bus.clone(),
            outputs: Mutex::new(0xff),
        })
    }

    fn pin(channel: &str) -> Result<u8, CoreError> {
        channel
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|pin| *pin < Self::PINS)
            .ok_or_else(|| CoreError::config(format!("PCF8574 has no channel '{channel}'")))
    }
}

impl DeviceDriver for Pcf8574 {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> BusAddress {
        self.address
    }

    fn read(&self) -> Result<Reading, CoreError> {
        let raw = self.bus.read_byte(self.address)?;
        let pins: Vec<bool> = (0..Self::PINS).map(|pin| raw & (1 << pin) != 0).collect();
        Ok(json!({ "raw": raw, "pins": pins }))
    }

    fn write(&self, value: &serde_json::Value, channel: Option<&str>) -> Result<(), CoreError> {
        let mut outputs = self
            .outputs
            .lock()
            .map_err(|_| CoreError::Internal("PCF8574 latch lock poisoned".into()))?;

        let next = match channel {
            None => value_as_byte(value)?,
            Some(channel) => {
                let mask = 1u8 << Self::pin(channel)?;
                if value_as_flag(value)? {
                    *outputs | mask
                } else {
                    *outputs & !mask
                }
            }
        };

        self.bus.write_byte(self.address, next)?;
        *outputs = next;
        Ok(())
    }
}
