// ── Bus transport ──
//
// The raw transport is an external collaborator: anything that can do
// SMBus-style byte transfers implements `BusTransport`. The core only
// ever touches it through `SharedBus`, which serializes every transfer
// behind one mutex so the scanner and all driver tasks never interleave
// on the wire.

mod sim;

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::model::BusAddress;

pub use sim::SimulatedBus;

/// Errors raised by a bus transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// No device acknowledged the address.
    #[error("no acknowledgement from {address}")]
    Nack { address: BusAddress },

    /// The transfer started but failed.
    #[error("transfer to {address} failed: {reason}")]
    Transfer { address: BusAddress, reason: String },

    /// Another thread panicked while holding the bus.
    #[error("bus lock poisoned")]
    Poisoned,
}

/// SMBus-style primitives a bus backend must provide.
///
/// Implementations are synchronous; callers run them on blocking threads.
pub trait BusTransport: Send {
    /// Receive one byte without a register pointer. Also used as the scan probe.
    fn read_byte(&mut self, address: BusAddress) -> Result<u8, BusError>;

    fn write_byte(&mut self, address: BusAddress, value: u8) -> Result<(), BusError>;

    fn read_byte_data(&mut self, address: BusAddress, register: u8) -> Result<u8, BusError>;

    fn write_byte_data(
        &mut self,
        address: BusAddress,
        register: u8,
        value: u8,
    ) -> Result<(), BusError>;

    /// Read `len` consecutive registers starting at `register`.
    fn read_block_data(
        &mut self,
        address: BusAddress,
        register: u8,
        len: usize,
    ) -> Result<Vec<u8>, BusError> {
        (0..len)
            .map(|offset| {
                let reg = register.wrapping_add(u8::try_from(offset).unwrap_or(u8::MAX));
                self.read_byte_data(address, reg)
            })
            .collect()
    }
}

/// Cloneable handle that serializes access to one transport.
#[derive(Clone)]
pub struct SharedBus {
    inner: Arc<Mutex<Box<dyn BusTransport>>>,
}

impl SharedBus {
    pub fn new(transport: impl BusTransport + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(transport))),
        }
    }

    /// Run `f` with exclusive access to the transport.
    ///
    /// Blocks the calling thread while another transfer is in flight.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut dyn BusTransport) -> Result<R, BusError>,
    ) -> Result<R, BusError> {
        let mut guard = self.inner.lock().map_err(|_| BusError::Poisoned)?;
        f(guard.as_mut())
    }

    pub fn read_byte(&self, address: BusAddress) -> Result<u8, BusError> {
        self.with(|bus| bus.read_byte(address))
    }

    pub fn write_byte(&self, address: BusAddress, value: u8) -> Result<(), BusError> {
        self.with(|bus| bus.write_byte(address, value))
    }

    pub fn read_byte_data(&self, address: BusAddress, register: u8) -> Result<u8, BusError> {
        self.with(|bus| bus.read_byte_data(address, register))
    }

    pub fn write_byte_data(
        &self,
        address: BusAddress,
        register: u8,
        value: u8,
    ) -> Result<(), BusError> {
        self.with(|bus| bus.write_byte_data(address, register, value))
    }

    pub fn read_block_data(
        &self,
        address: BusAddress,
        register: u8,
        len: usize,
    ) -> Result<Vec<u8>, BusError> {
        self.with(|bus| bus.read_block_data(address, register, len))
    }
}

impl std::fmt::Debug for SharedBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBus").finish_non_exhaustive()
    }
}
