// ── Device registry ──
//
// In-memory model of every known device. Records are keyed by address,
// so an address can only ever occupy one bucket. The controller owns
// the registry behind its state lock; persistence and broadcast happen
// there, not here.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use indexmap::IndexMap;
use indexmap::map::Entry;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{Bucket, BusAddress, DeviceRecord, RegistrySnapshot};

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    bucket: Bucket,
    record: DeviceRecord,
}

/// What a [`DeviceRegistry::merge`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Active devices that vanished from the bus.
    pub archived: Vec<BusAddress>,
    /// Archived devices that reappeared.
    pub restored: Vec<BusAddress>,
    /// Addresses seen for the first time.
    pub discovered: Vec<BusAddress>,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.archived.is_empty() && self.restored.is_empty() && self.discovered.is_empty()
    }
}

/// Every known device, in exactly one lifecycle bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRegistry {
    slots: IndexMap<BusAddress, Slot>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a document, normalizing it like [`replace`](Self::replace).
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let mut registry = Self::new();
        registry.replace(snapshot);
        registry
    }

    /// Fold one scan result into the registry.
    ///
    /// Active devices missing from `present` are archived. Archived
    /// devices found in `present` are restored to Active, and unknown
    /// addresses become Pending. Pending devices are left alone either
    /// way. Applying the same scan twice changes nothing the second time.
    pub fn merge(&mut self, present: &BTreeSet<BusAddress>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for (address, slot) in &mut self.slots {
            if slot.bucket == Bucket::Active && !present.contains(address) {
                slot.bucket = Bucket::Archived;
                slot.record.active = false;
                outcome.archived.push(*address);
            }
        }

        for &address in present {
            match self.slots.entry(address) {
                Entry::Occupied(mut entry) => {
                    let slot = entry.get_mut();
                    if slot.bucket == Bucket::Archived {
                        slot.bucket = Bucket::Active;
                        slot.record.active = true;
                        outcome.restored.push(address);
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(Slot {
                        bucket: Bucket::Pending,
                        record: DeviceRecord::discovered(address),
                    });
                    outcome.discovered.push(address);
                }
            }
        }

        if !outcome.is_empty() {
            info!(
                archived = outcome.archived.len(),
                restored = outcome.restored.len(),
                discovered = outcome.discovered.len(),
                "registry merged scan result"
            );
        }
        outcome
    }

    /// Replace the whole registry with `incoming`.
    ///
    /// Records are deduplicated by address across all three incoming
    /// buckets, then every survivor's bucket is recomputed from its
    /// `active` flag and whether the caller listed it as new.
    pub fn replace(&mut self, incoming: RegistrySnapshot) -> RegistrySnapshot {
        let pending: HashSet<BusAddress> =
            incoming.new_connections.iter().map(|r| r.address).collect();

        let RegistrySnapshot {
            connections,
            new_connections,
            archived_connections,
        } = incoming;

        let mut merged: IndexMap<BusAddress, DeviceRecord> = IndexMap::new();
        let mut duplicates = 0usize;
        for record in connections
            .into_iter()
            .chain(new_connections)
            .chain(archived_connections)
        {
            match merged.entry(record.address) {
                Entry::Vacant(entry) => {
                    entry.insert(record);
                }
                Entry::Occupied(mut entry) => {
                    duplicates += 1;
                    if supersedes(&record, entry.get()) {
                        entry.insert(record);
                    }
                }
            }
        }
        if duplicates > 0 {
            debug!(duplicates, "dropped duplicate device records");
        }

        self.slots = merged
            .into_iter()
            .map(|(address, record)| {
                let bucket = if record.active {
                    Bucket::Active
                } else if pending.contains(&address) {
                    Bucket::Pending
                } else {
                    Bucket::Archived
                };
                (address, Slot { bucket, record })
            })
            .collect();

        self.snapshot()
    }

    pub fn get(&self, address: BusAddress) -> Result<&DeviceRecord, CoreError> {
        self.slots
            .get(&address)
            .map(|slot| &slot.record)
            .ok_or_else(|| CoreError::not_found(format!("device {address}")))
    }

    pub fn bucket_of(&self, address: BusAddress) -> Option<Bucket> {
        self.slots.get(&address).map(|slot| slot.bucket)
    }

    /// Records currently in the Active bucket.
    pub fn active(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.slots
            .values()
            .filter(|slot| slot.bucket == Bucket::Active)
            .map(|slot| &slot.record)
    }

    /// Addresses that should have a polling task, with their periods.
    pub fn desired_pollers(&self) -> BTreeMap<BusAddress, Duration> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.bucket == Bucket::Active && slot.record.active)
            .filter_map(|(address, slot)| Some((*address, slot.record.poll_period()?)))
            .collect()
    }

    /// The three buckets as a document, in registry order.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot::default();
        for slot in self.slots.values() {
            let bucket = match slot.bucket {
                Bucket::Active => &mut snapshot.connections,
                Bucket::Pending => &mut snapshot.new_connections,
                Bucket::Archived => &mut snapshot.archived_connections,
            };
            bucket.push(slot.record.clone());
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Dedup priority: a driver binding beats none, then a user-given name
/// beats the placeholder, otherwise the first record seen stays.
fn supersedes(candidate: &DeviceRecord, kept: &DeviceRecord) -> bool {
    if candidate.has_driver_module() != kept.has_driver_module() {
        return candidate.has_driver_module();
    }
    if candidate.has_custom_name() != kept.has_custom_name() {
        return candidate.has_custom_name();
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr(raw: u8) -> BusAddress {
        BusAddress::new(raw).unwrap()
    }

    fn scan(raw: &[u8]) -> BTreeSet<BusAddress> {
        raw.iter().map(|r| addr(*r)).collect()
    }

    fn assert_one_bucket_each(snapshot: &RegistrySnapshot) {
        let mut seen = HashSet::new();
        for (_, record) in snapshot.iter() {
            assert!(seen.insert(record.address), "{} appears twice", record.address);
        }
    }

    fn relay_board() -> DeviceRecord {
        DeviceRecord::discovered(addr(0x10))
            .with_driver("builtin", "Pcf8574")
            .with_name("Relays")
            .with_poll_interval(2.0)
            .activated()
    }

    #[test]
    fn scan_on_empty_registry_creates_pending_record() {
        let mut registry = DeviceRegistry::new();
        let outcome = registry.merge(&scan(&[0x10]));

        assert_eq!(outcome.discovered, vec![addr(0x10)]);
        assert_eq!(registry.bucket_of(addr(0x10)), Some(Bucket::Pending));
        let record = registry.get(addr(0x10)).unwrap();
        assert_eq!(record.display_name, "Unknown Device");
        assert!(!record.active);
        assert!(record.driver_module.is_empty());
    }

    #[test]
    fn vanished_active_device_is_archived() {
        let mut registry = DeviceRegistry::from_snapshot(RegistrySnapshot {
            connections: vec![relay_board()],
            ..RegistrySnapshot::default()
        });
        assert_eq!(registry.desired_pollers().len(), 1);

        let outcome = registry.merge(&BTreeSet::new());

        assert_eq!(outcome.archived, vec![addr(0x10)]);
        assert_eq!(registry.bucket_of(addr(0x10)), Some(Bucket::Archived));
        assert!(!registry.get(addr(0x10)).unwrap().active);
        assert!(registry.desired_pollers().is_empty());
    }

    #[test]
    fn reappearing_archived_device_is_restored() {
        let mut registry = DeviceRegistry::from_snapshot(RegistrySnapshot {
            connections: vec![relay_board()],
            ..RegistrySnapshot::default()
        });
        registry.merge(&BTreeSet::new());

        let outcome = registry.merge(&scan(&[0x10]));

        assert_eq!(outcome.restored, vec![addr(0x10)]);
        assert_eq!(registry.bucket_of(addr(0x10)), Some(Bucket::Active));
        assert!(registry.get(addr(0x10)).unwrap().active);
        assert_eq!(
            registry.desired_pollers().get(&addr(0x10)),
            Some(&Duration::from_secs(2))
        );
    }

    #[test]
    fn absent_pending_device_stays_pending() {
        let mut registry = DeviceRegistry::new();
        registry.merge(&scan(&[0x30]));
        let outcome = registry.merge(&BTreeSet::new());

        assert!(outcome.is_empty());
        assert_eq!(registry.bucket_of(addr(0x30)), Some(Bucket::Pending));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut registry = DeviceRegistry::from_snapshot(RegistrySnapshot {
            connections: vec![relay_board()],
            archived_connections: vec![DeviceRecord::discovered(addr(0x22)).with_name("Old")],
            new_connections: vec![DeviceRecord::discovered(addr(0x30))],
        });

        let present = scan(&[0x22, 0x30, 0x41]);
        let first = registry.merge(&present);
        let after_first = registry.snapshot();
        let second = registry.merge(&present);

        assert!(!first.is_empty());
        assert!(second.is_empty());
        assert_eq!(registry.snapshot(), after_first);
        assert_one_bucket_each(&after_first);
    }

    #[test]
    fn duplicate_in_active_and_new_lands_in_active_only() {
        let mut registry = DeviceRegistry::new();
        let snapshot = registry.replace(RegistrySnapshot {
            connections: vec![
                DeviceRecord::discovered(addr(0x20))
                    .with_driver("builtin", "RawByte")
                    .activated(),
            ],
            new_connections: vec![DeviceRecord::discovered(addr(0x20))],
            archived_connections: vec![],
        });

        assert_eq!(snapshot.connections.len(), 1);
        assert!(snapshot.new_connections.is_empty());
        assert!(snapshot.archived_connections.is_empty());
        assert_eq!(registry.bucket_of(addr(0x20)), Some(Bucket::Active));
    }

    #[test]
    fn dedup_prefers_driver_module_regardless_of_order() {
        let bound = DeviceRecord::discovered(addr(0x40)).with_driver("builtin", "RawByte");
        let named = DeviceRecord::discovered(addr(0x40)).with_name("Labelled");
        let blank = DeviceRecord::discovered(addr(0x40));

        let orders = [
            [bound.clone(), named.clone(), blank.clone()],
            [named.clone(), bound.clone(), blank.clone()],
            [blank.clone(), named.clone(), bound.clone()],
        ];
        for order in orders {
            let [a, b, c] = order;
            let snapshot = DeviceRegistry::new().replace(RegistrySnapshot {
                connections: vec![a],
                new_connections: vec![b],
                archived_connections: vec![c],
            });
            assert_eq!(snapshot.len(), 1);
            let (_, kept) = snapshot.find(addr(0x40)).unwrap();
            assert_eq!(kept.driver_module, "builtin");
        }
    }

    #[test]
    fn dedup_prefers_custom_name_then_first_seen() {
        let first = DeviceRecord::discovered(addr(0x41)).with_name("First");
        let second = DeviceRecord::discovered(addr(0x41)).with_name("Second");
        let blank = DeviceRecord::discovered(addr(0x41));

        let snapshot = DeviceRegistry::new().replace(RegistrySnapshot {
            connections: vec![blank],
            new_connections: vec![first, second],
            archived_connections: vec![],
        });
        let (bucket, kept) = snapshot.find(addr(0x41)).unwrap();
        assert_eq!(kept.display_name, "First");
        assert_eq!(bucket, Bucket::Pending);
    }

    #[test]
    fn replace_buckets_depend_only_on_active_and_new_membership() {
        // Incoming bucket placement is ignored; only `active` and
        // membership in new_connections decide.
        let snapshot = DeviceRegistry::new().replace(RegistrySnapshot {
            connections: vec![DeviceRecord::discovered(addr(0x50))],
            new_connections: vec![DeviceRecord::discovered(addr(0x51)).activated()],
            archived_connections: vec![
                DeviceRecord::discovered(addr(0x52)).activated(),
                DeviceRecord::discovered(addr(0x53)),
            ],
        });

        let bucket = |raw| snapshot.find(addr(raw)).map(|(b, _)| b);
        assert_eq!(bucket(0x50), Some(Bucket::Archived));
        assert_eq!(bucket(0x51), Some(Bucket::Active));
        assert_eq!(bucket(0x52), Some(Bucket::Active));
        assert_eq!(bucket(0x53), Some(Bucket::Archived));
        assert_one_bucket_each(&snapshot);
    }

    #[test]
    fn replace_keeps_unknown_fields_and_order() {
        let mut tagged = DeviceRecord::discovered(addr(0x60)).activated();
        tagged
            .extra
            .insert("room".into(), serde_json::json!("garage"));
        let snapshot = DeviceRegistry::new().replace(RegistrySnapshot {
            connections: vec![tagged, DeviceRecord::discovered(addr(0x12)).activated()],
            ..RegistrySnapshot::default()
        });

        let order: Vec<_> = snapshot.connections.iter().map(|r| r.address).collect();
        assert_eq!(order, vec![addr(0x60), addr(0x12)]);
        assert_eq!(snapshot.connections[0].extra["room"], "garage");
    }

    #[test]
    fn pollers_require_positive_interval() {
        let registry = DeviceRegistry::from_snapshot(RegistrySnapshot {
            connections: vec![
                DeviceRecord::discovered(addr(0x10)).activated(),
                DeviceRecord::discovered(addr(0x11))
                    .with_poll_interval(0.0)
                    .activated(),
                DeviceRecord::discovered(addr(0x12))
                    .with_poll_interval(-1.0)
                    .activated(),
                DeviceRecord::discovered(addr(0x13))
                    .with_poll_interval(0.5)
                    .activated(),
            ],
            ..RegistrySnapshot::default()
        });

        let pollers: Vec<_> = registry.desired_pollers().into_keys().collect();
        assert_eq!(pollers, vec![addr(0x13)]);
    }

    #[test]
    fn get_unknown_address_is_not_found() {
        let registry = DeviceRegistry::new();
        assert!(matches!(
            registry.get(addr(0x70)),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn every_scan_sequence_keeps_one_bucket_per_address() {
        let mut registry = DeviceRegistry::from_snapshot(RegistrySnapshot {
            connections: vec![relay_board()],
            ..RegistrySnapshot::default()
        });
        let scans: [&[u8]; 6] = [
            &[0x10, 0x20],
            &[0x20],
            &[],
            &[0x10, 0x20, 0x30],
            &[0x30],
            &[0x10],
        ];

        for raw in scans {
            registry.merge(&scan(raw));
            let snapshot = registry.snapshot();
            assert_one_bucket_each(&snapshot);
            assert_eq!(snapshot.len(), registry.len());
            for record in &snapshot.connections {
                assert!(record.active);
            }
            for record in snapshot
                .new_connections
                .iter()
                .chain(&snapshot.archived_connections)
            {
                assert!(!record.active);
            }
        }
    }
}
