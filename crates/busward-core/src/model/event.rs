// ── Broadcast events ──

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::address::BusAddress;
use super::snapshot::RegistrySnapshot;

/// A successful poll result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceReading {
    pub address: BusAddress,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Event pushed to every subscriber.
///
/// Serializes as `{"event": "config_update", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BusEvent {
    /// Full registry after a mutation, or on subscribe.
    ConfigUpdate(Arc<RegistrySnapshot>),
    DeviceData(DeviceReading),
}

impl BusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConfigUpdate(_) => "config_update",
            Self::DeviceData(_) => "device_data",
        }
    }
}
