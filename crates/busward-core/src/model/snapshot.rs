// ── Registry snapshot ──
//
// The three lifecycle buckets as one document. This is both the
// persisted shape and the `config_update` payload.

use serde::{Deserialize, Serialize};

use super::address::BusAddress;
use super::device::{Bucket, DeviceRecord};

/// Whole-registry document: active, pending and archived records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub connections: Vec<DeviceRecord>,
    #[serde(default)]
    pub new_connections: Vec<DeviceRecord>,
    #[serde(default)]
    pub archived_connections: Vec<DeviceRecord>,
}

impl RegistrySnapshot {
    pub fn bucket(&self, bucket: Bucket) -> &[DeviceRecord] {
        match bucket {
            Bucket::Active => &self.connections,
            Bucket::Pending => &self.new_connections,
            Bucket::Archived => &self.archived_connections,
        }
    }

    /// Every record tagged with its bucket, active first.
    pub fn iter(&self) -> impl Iterator<Item = (Bucket, &DeviceRecord)> {
        self.connections
            .iter()
            .map(|r| (Bucket::Active, r))
            .chain(self.new_connections.iter().map(|r| (Bucket::Pending, r)))
            .chain(
                self.archived_connections
                    .iter()
                    .map(|r| (Bucket::Archived, r)),
            )
    }

    pub fn find(&self, address: BusAddress) -> Option<(Bucket, &DeviceRecord)> {
        self.iter().find(|(_, r)| r.address == address)
    }

    pub fn len(&self) -> usize {
        self.connections.len() + self.new_connections.len() + self.archived_connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
