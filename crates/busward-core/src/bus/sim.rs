// ── Simulated bus ──
//
// In-memory backend used by the binary when no hardware transport is
// configured, and by tests. Clones share the same device table, so a
// test can keep a handle and attach or detach devices while the
// controller owns the transport.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{BusError, BusTransport};
use crate::model::BusAddress;

#[derive(Debug, Clone)]
struct SimDevice {
    registers: [u8; 256],
    /// Value returned by a plain `read_byte` and set by `write_byte`.
    latch: u8,
    fail_transfers: bool,
}

impl SimDevice {
    fn new() -> Self {
        Self {
            registers: [0; 256],
            latch: 0,
            fail_transfers: false,
        }
    }
}

/// Shared in-memory device table implementing [`BusTransport`].
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    devices: Arc<Mutex<BTreeMap<BusAddress, SimDevice>>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<BusAddress, SimDevice>> {
        // Plain bytes; poisoning leaves nothing inconsistent.
        self.devices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make a device respond at `address`. Existing state is kept.
    pub fn attach(&self, address: BusAddress) {
        self.table().entry(address).or_insert_with(SimDevice::new);
    }

    /// Attach a device with initial register contents.
    pub fn attach_with_registers(&self, address: BusAddress, registers: &[(u8, u8)]) {
        let mut table = self.table();
        let device = table.entry(address).or_insert_with(SimDevice::new);
        for &(reg, value) in registers {
            device.registers[usize::from(reg)] = value;
        }
    }

    /// Remove a device; it stops acknowledging until re-attached.
    pub fn detach(&self, address: BusAddress) {
        self.table().remove(&address);
    }

    pub fn set_register(&self, address: BusAddress, register: u8, value: u8) {
        if let Some(device) = self.table().get_mut(&address) {
            device.registers[usize::from(register)] = value;
        }
    }

    pub fn register(&self, address: BusAddress, register: u8) -> Option<u8> {
        self.table()
            .get(&address)
            .map(|d| d.registers[usize::from(register)])
    }

    pub fn set_latch(&self, address: BusAddress, value: u8) {
        if let Some(device) = self.table().get_mut(&address) {
            device.latch = value;
        }
    }

    pub fn latch(&self, address: BusAddress) -> Option<u8> {
        self.table().get(&address).map(|d| d.latch)
    }

    /// Keep the device acknowledging its address but fail every data transfer.
    pub fn set_faulty(&self, address: BusAddress, faulty: bool) {
        if let Some(device) = self.table().get_mut(&address) {
            device.fail_transfers = faulty;
        }
    }

    pub fn attached(&self) -> Vec<BusAddress> {
        self.table().keys().copied().collect()
    }

    fn with_device<R>(
        &self,
        address: BusAddress,
        data_transfer: bool,
        f: impl FnOnce(&mut SimDevice) -> R,
    ) -> Result<R, BusError> {
        let mut table = self.table();
        let device = table.get_mut(&address).ok_or(BusError::Nack { address })?;
        if data_transfer && device.fail_transfers {
            return Err(BusError::Transfer {
                address,
                reason: "simulated transfer fault".into(),
            });
        }
        Ok(f(device))
    }
}

impl BusTransport for SimulatedBus {
    fn read_byte(&mut self, address: BusAddress) -> Result<u8, BusError> {
        self.with_device(address, false, |d| d.latch)
    }

    fn write_byte(&mut self, address: BusAddress, value: u8) -> Result<(), BusError> {
        self.with_device(address, true, |d| d.latch = value)
    }

    fn read_byte_data(&mut self, address: BusAddress, register: u8) -> Result<u8, BusError> {
        self.with_device(address, true, |d| d.registers[usize::from(register)])
    }

    fn write_byte_data(
        &mut self,
        address: BusAddress,
        register: u8,
        value: u8,
    ) -> Result<(), BusError> {
        self.with_device(address, true, |d| d.registers[usize::from(register)] = value)
    }
}
