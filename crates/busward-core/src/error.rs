// ── Core error types ──
//
// Every per-device failure the core can report. Drivers, the bus layer,
// and the persistence layer all funnel into `CoreError`; the controller
// catches these at the smallest scope (one poll, one write, one
// instantiation) and logs them with the device address attached.

use std::path::PathBuf;

use thiserror::Error;

use crate::bus::BusError;
use crate::model::BusAddress;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Driver binding ───────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Driver {driver} failed to initialize at {address}: {message}")]
    Construction {
        driver: String,
        address: BusAddress,
        message: String,
    },

    #[error("{operation} is not supported by driver {driver}")]
    Unsupported { operation: String, driver: String },

    // ── Bus I/O ──────────────────────────────────────────────────────
    #[error("Bus I/O failed: {0}")]
    Io(#[from] BusError),

    // ── Lookups ──────────────────────────────────────────────────────
    #[error("Not found: {identifier}")]
    NotFound { identifier: String },

    #[error("Invalid bus address '{input}'")]
    InvalidAddress { input: String },

    // ── Persistence ──────────────────────────────────────────────────
    #[error("Failed to persist registry to {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registry document {path} is malformed: {source}")]
    MalformedState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Controller is not running")]
    ControllerStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            identifier: identifier.into(),
        }
    }

    pub(crate) fn unsupported(operation: &str, driver: &str) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            driver: driver.into(),
        }
    }

    /// Whether the error came from the bus rather than from configuration.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
