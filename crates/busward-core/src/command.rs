// ── Command API ──
//
// Everything the control channel can ask of the controller. Commands
// travel through an mpsc channel to the command processor, which
// answers each one through a oneshot.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;
use crate::model::{BusAddress, RegistrySnapshot};

/// A command plus the channel its result goes back on.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// Control messages, as they appear on the wire:
/// `{"command": "write_device", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum Command {
    /// Replace the whole registry.
    UpdateConfig(RegistrySnapshot),

    WriteDevice {
        address: BusAddress,
        value: serde_json::Value,
        #[serde(
            default,
            deserialize_with = "lenient_channel",
            skip_serializing_if = "Option::is_none"
        )]
        channel: Option<String>,
    },

    ListInterfaces,

    GetInterfaceCode {
        module_name: String,
    },

    SaveInterfaceCode {
        module_name: String,
        code: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateConfig(_) => "update_config",
            Self::WriteDevice { .. } => "write_device",
            Self::ListInterfaces => "list_interfaces",
            Self::GetInterfaceCode { .. } => "get_interface_code",
            Self::SaveInterfaceCode { .. } => "save_interface_code",
        }
    }
}

/// Successful command outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CommandResult {
    Ok,
    /// Registry after an `update_config`.
    Snapshot(RegistrySnapshot),
    /// Driver module names.
    Interfaces(Vec<String>),
    /// Definition text of one module.
    InterfaceCode { module_name: String, code: String },
}

/// Acknowledgement sent back over the control channel for every command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandAck {
    pub command: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandAck {
    pub fn new(command: &'static str, outcome: &Result<CommandResult, CoreError>) -> Self {
        match outcome {
            Ok(result) => Self {
                command,
                ok: true,
                result: match result {
                    CommandResult::Ok => None,
                    other => Some(other.clone()),
                },
                error: None,
            },
            Err(e) => Self {
                command,
                ok: false,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Channels arrive as names or as bare pin numbers.
fn lenient_channel<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Channel {
        Name(String),
        Number(i64),
    }

    Ok(
        Option::<Channel>::deserialize(deserializer)?.map(|channel| match channel {
            Channel::Name(name) => name,
            Channel::Number(n) => n.to_string(),
        }),
    )
}
