//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use busward_config::ConfigError;
use busward_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const STATE: i32 = 6;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration at {path} is invalid")]
    #[diagnostic(
        code(busward::config),
        help(
            "Fix the file or the BUSWARD_* environment overrides.\n\
             Start over with: busward config init --force"
        )
    )]
    InvalidConfig {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Configuration file {path} already exists")]
    #[diagnostic(
        code(busward::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── Registry / drivers ───────────────────────────────────────────
    #[error("Device registry {path} cannot be used")]
    #[diagnostic(
        code(busward::state),
        help("Repair or remove the file; an absent registry is recreated empty.")
    )]
    State {
        path: String,
        #[source]
        source: CoreError,
    },

    #[error("{what} not found")]
    #[diagnostic(
        code(busward::not_found),
        help("Run: busward {list_command}")
    )]
    NotFound { what: String, list_command: String },

    #[error("'{operation}' is not supported by {driver}")]
    #[diagnostic(
        code(busward::unsupported),
        help("Built-in drivers are compiled in and have no definition text.")
    )]
    Unsupported { operation: String, driver: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(busward::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(busward::core))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig { .. } | Self::ConfigExists { .. } => exit_code::CONFIG,
            Self::State { .. } => exit_code::STATE,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Core(_) | Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }

    pub fn config(path: &std::path::Path, source: ConfigError) -> Self {
        match source {
            ConfigError::AlreadyExists { path } => Self::ConfigExists {
                path: path.display().to_string(),
            },
            source => Self::InvalidConfig {
                path: path.display().to_string(),
                source,
            },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        if let CoreError::Persistence { path, .. } | CoreError::MalformedState { path, .. } = &err
        {
            let path = path.display().to_string();
            return CliError::State { path, source: err };
        }

        match err {
            CoreError::NotFound { identifier } => CliError::NotFound {
                what: identifier,
                list_command: "interfaces list".into(),
            },

            CoreError::Unsupported { operation, driver } => {
                CliError::Unsupported { operation, driver }
            }

            CoreError::InvalidAddress { input } => CliError::Validation {
                field: "address".into(),
                reason: format!("'{input}' is not a 7-bit bus address"),
            },

            other => CliError::Core(other),
        }
    }
}
