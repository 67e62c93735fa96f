// Wire models for the enduser portal API.
//
// Shapes follow the portal JSON exactly (camelCase, `deviceURL` spelling);
// conversion into domain types happens in `domus-core`, never here.

use serde::{Deserialize, Serialize};

// ── Device listing ──────────────────────────────────────────────────

/// One raw device record from `GET setup/devices`.
///
/// The listing is ordered: sensor components are emitted adjacent to the
/// physical device that owns them, which the topology layer relies on.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDefinition {
    #[serde(rename = "deviceURL")]
    pub device_url: String,
    pub label: String,
    pub controllable_name: String,
    #[serde(default)]
    pub definition: DeviceClassDefinition,
    #[serde(default)]
    pub states: Vec<DeviceStateDefinition>,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Static classification block inside a device record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceClassDefinition {
    #[serde(default)]
    pub ui_class: String,
    #[serde(default)]
    pub widget_name: Option<String>,
    #[serde(default)]
    pub commands: Vec<CommandDefinition>,
}

/// One supported command inside a device definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDefinition {
    pub command_name: String,
    #[serde(default)]
    pub nparams: u32,
}

/// One `(name, type, value)` state triple, as listed under a device or
/// carried by a `DeviceStateChangedEvent`.
///
/// `state_type` is the portal's value-type tag: 1 integer, 2 float,
/// 3 string, 6 boolean, 10 JSON array, 11 JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub state_type: u8,
    #[serde(default)]
    pub value: serde_json::Value,
}

pub const STATE_TYPE_INT: u8 = 1;
pub const STATE_TYPE_FLOAT: u8 = 2;
pub const STATE_TYPE_STRING: u8 = 3;
pub const STATE_TYPE_BOOLEAN: u8 = 6;
pub const STATE_TYPE_JSON_ARRAY: u8 = 10;
pub const STATE_TYPE_JSON_OBJECT: u8 = 11;

fn default_true() -> bool {
    true
}

// ── Command execution ───────────────────────────────────────────────

/// Body of `POST exec/apply`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyRequest {
    pub label: String,
    pub actions: Vec<ActionDefinition>,
}

/// Commands addressed to a single device within an apply request.
#[derive(Debug, Clone, Serialize)]
pub struct ActionDefinition {
    #[serde(rename = "deviceURL")]
    pub device_url: String,
    pub commands: Vec<CommandRequest>,
}

/// One command invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<serde_json::Value>,
}

/// Response of `POST exec/apply`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyResponse {
    #[serde(rename = "execId")]
    pub exec_id: String,
}

/// One entry of `GET exec/current`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentExecution {
    pub id: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub state: Option<ExecutionState>,
}

/// Execution lifecycle state as reported by the portal.
///
/// `NOT_TRANSMITTED`, `TRANSMITTED` and `QUEUED_GATEWAY_SIDE` are
/// intermediate gateway-side stages; only `COMPLETED` and `FAILED` are
/// terminal on the wire. States this client does not know fold into
/// `Unknown` instead of failing the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Initialized,
    NotTransmitted,
    Transmitted,
    QueuedGatewaySide,
    InProgress,
    Completed,
    Failed,
    Unknown,
}

impl<'de> Deserialize<'de> for ExecutionState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "INITIALIZED" => Self::Initialized,
            "NOT_TRANSMITTED" => Self::NotTransmitted,
            "TRANSMITTED" => Self::Transmitted,
            "QUEUED_GATEWAY_SIDE" => Self::QueuedGatewaySide,
            "IN_PROGRESS" => Self::InProgress,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => Self::Unknown,
        })
    }
}

impl ExecutionState {
    /// Terminal states end the remote lifecycle of an execution.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ── Event feed ──────────────────────────────────────────────────────

/// Response of `POST events/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerRegistration {
    pub id: String,
}

/// One command that failed inside a partially failed execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedCommand {
    #[serde(rename = "deviceURL")]
    pub device_url: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub failure_type: Option<String>,
    #[serde(default)]
    pub rank: Option<u32>,
}

/// One queued event from `POST events/{listener}/fetch`.
///
/// Tagged by the portal's `name` field. Anything this client does not
/// route is folded into [`PortalEvent::Unknown`] rather than failing the
/// batch; truly malformed elements are skipped at the decoding layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name")]
pub enum PortalEvent {
    #[serde(rename = "DeviceStateChangedEvent", rename_all = "camelCase")]
    DeviceStateChanged {
        #[serde(rename = "deviceURL")]
        device_url: String,
        #[serde(default)]
        device_states: Vec<DeviceStateDefinition>,
    },

    #[serde(rename = "ExecutionStateChangedEvent", rename_all = "camelCase")]
    ExecutionStateChanged {
        exec_id: String,
        new_state: ExecutionState,
        /// `-1` is the portal's authoritative "no further state will be
        /// reported" marker, regardless of `new_state`.
        #[serde(default)]
        time_to_next_state: i64,
        #[serde(default)]
        failure_type: Option<String>,
        #[serde(default)]
        failed_commands: Vec<FailedCommand>,
    },

    #[serde(rename = "ExecutionRegisteredEvent", rename_all = "camelCase")]
    ExecutionRegistered {
        exec_id: String,
    },

    #[serde(rename = "RefreshAllDevicesStatesCompletedEvent", rename_all = "camelCase")]
    RefreshAllDevicesStatesCompleted {
        #[serde(default)]
        gateway_id: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

// ── Error envelope ──────────────────────────────────────────────────

/// The portal's error body: `{"errorCode": "...", "error": "..."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
    #[serde(rename = "error")]
    pub error: Option<String>,
}
