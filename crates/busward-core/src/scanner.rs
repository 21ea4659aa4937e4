// ── Bus scanner ──
//
// Probes every address in the configured range with a one-byte read.
// A device is present iff the probe succeeds; probe errors are the
// absence signal and never surface as failures.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use tracing::{debug, trace};

use crate::bus::SharedBus;
use crate::error::CoreError;
use crate::model::BusAddress;

/// Periodic presence probe over a fixed address range.
#[derive(Debug, Clone)]
pub struct BusScanner {
    bus: SharedBus,
    range: RangeInclusive<u8>,
}

impl BusScanner {
    /// Scanner over the default range (0x03-0x77).
    pub fn new(bus: SharedBus) -> Self {
        Self {
            bus,
            range: BusAddress::SCAN_FIRST..=BusAddress::SCAN_LAST,
        }
    }

    /// Scanner over a custom range. The range must lie within 7-bit space.
    pub fn with_range(bus: SharedBus, range: RangeInclusive<u8>) -> Result<Self, CoreError> {
        if range.is_empty() || *range.end() > BusAddress::MAX {
            return Err(CoreError::config(format!(
                "scan range {:#04x}..={:#04x} is not a valid 7-bit range",
                range.start(),
                range.end()
            )));
        }
        Ok(Self { bus, range })
    }

    pub fn range(&self) -> &RangeInclusive<u8> {
        &self.range
    }

    /// Probe the range and return every responding address.
    ///
    /// Blocking: each probe takes the bus lock for one transfer, so driver
    /// traffic can interleave between probes.
    pub fn scan(&self) -> BTreeSet<BusAddress> {
        let mut present = BTreeSet::new();
        for raw in self.range.clone() {
            let Ok(address) = BusAddress::new(raw) else {
                continue;
            };
            match self.bus.read_byte(address) {
                Ok(_) => {
                    present.insert(address);
                }
                Err(e) => trace!(%address, error = %e, "probe miss"),
            }
        }
        debug!(found = present.len(), "bus scan complete");
        present
    }

    /// Run [`scan`](Self::scan) on the blocking pool.
    pub async fn scan_async(&self) -> Result<BTreeSet<BusAddress>, CoreError> {
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| CoreError::Internal(format!("bus scan task failed: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bus::SimulatedBus;

    fn addr(raw: u8) -> BusAddress {
        BusAddress::new(raw).unwrap()
    }

    #[test]
    fn finds_attached_devices_only() {
        let sim = SimulatedBus::new();
        sim.attach(addr(0x10));
        sim.attach(addr(0x48));
        let scanner = BusScanner::new(SharedBus::new(sim));

        let found: Vec<_> = scanner.scan().into_iter().collect();
        assert_eq!(found, vec![addr(0x10), addr(0x48)]);
    }

    #[test]
    fn reserved_addresses_are_skipped_by_default() {
        let sim = SimulatedBus::new();
        sim.attach(addr(0x01));
        sim.attach(addr(0x7a));
        let scanner = BusScanner::new(SharedBus::new(sim));

        assert!(scanner.scan().is_empty());
    }

    #[test]
    fn custom_range_is_validated() {
        let bus = SharedBus::new(SimulatedBus::new());
        assert!(BusScanner::with_range(bus.clone(), 0x08..=0x80).is_err());
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = 0x20..=0x10;
        assert!(BusScanner::with_range(bus.clone(), reversed).is_err());
        assert!(BusScanner::with_range(bus, 0x08..=0x0f).is_ok());
    }

    #[tokio::test]
    async fn async_scan_matches_blocking_scan() {
        let sim = SimulatedBus::new();
        sim.attach(addr(0x22));
        let scanner = BusScanner::new(SharedBus::new(sim));

        let found = scanner.scan_async().await.unwrap();
        assert!(found.contains(&addr(0x22)));
        assert_eq!(found.len(), 1);
    }
}
