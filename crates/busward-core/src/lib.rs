//! Device lifecycle and polling coordination for an addressable bus.
//!
//! This crate keeps a persisted registry of bus devices consistent with
//! live scans while supervising one polling task per active device:
//!
//! - **[`Controller`]**: central facade. [`start()`](Controller::start)
//!   binds drivers and spawns the periodic scanner and the command
//!   processor; [`execute()`](Controller::execute) routes a [`Command`];
//!   [`subscribe()`](Controller::subscribe) yields [`BusEvent`]s, starting
//!   with the current registry.
//!
//! - **[`DeviceRegistry`]**: the three lifecycle buckets (active, pending,
//!   archived) keyed by address, with scan merging and full replacement.
//!
//! - **[`DriverRegistry`]**: `(module, class)` → driver factory map,
//!   holding the compiled [`driver::builtin`] drivers and hot-reloadable
//!   TOML [`driver::definition`] modules.
//!
//! - **[`PollingSupervisor`]**: one cancellable task per polled address.
//!
//! - **[`SharedBus`]**: serialized access to a [`BusTransport`]; a
//!   [`SimulatedBus`] backend ships with the crate.

pub mod bus;
pub mod command;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod model;
pub mod persist;
pub mod registry;
pub mod scanner;
pub mod stream;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::{BusError, BusTransport, SharedBus, SimulatedBus};
pub use command::{Command, CommandAck, CommandResult};
pub use config::ControllerConfig;
pub use controller::Controller;
pub use driver::{DeviceDriver, DriverRegistry, ModuleDefinition};
pub use error::CoreError;
pub use model::{
    Bucket, BusAddress, BusEvent, DeviceReading, DeviceRecord, RegistrySnapshot,
    UNKNOWN_DEVICE_NAME,
};
pub use persist::StateStore;
pub use registry::{DeviceRegistry, MergeOutcome};
pub use scanner::BusScanner;
pub use stream::Subscription;
pub use supervisor::PollingSupervisor;
