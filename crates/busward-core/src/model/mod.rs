// ── Domain model ──
//
// Addresses, device records, the three-bucket snapshot, and the events
// broadcast to subscribers.

mod address;
mod device;
mod event;
mod snapshot;

pub use address::BusAddress;
pub use device::{Bucket, DeviceRecord, UNKNOWN_DEVICE_NAME};
pub use event::{BusEvent, DeviceReading};
pub use snapshot::RegistrySnapshot;
