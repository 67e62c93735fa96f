// ── Device domain types ──
//
// `DeviceUrl` and `StateValue` form the foundation of every domain type.
// Devices relate to their sensors through URL keys, never through owning
// references, so the parent/sensor cycle stays a lookup relation.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use domus_api::models::{
    DeviceDefinition, DeviceStateDefinition, STATE_TYPE_BOOLEAN, STATE_TYPE_FLOAT, STATE_TYPE_INT,
    STATE_TYPE_JSON_ARRAY, STATE_TYPE_JSON_OBJECT, STATE_TYPE_STRING,
};

// ── DeviceUrl ───────────────────────────────────────────────────────

/// Stable identifier of a device:
/// `proto://gateway-id/device-address[#component]`.
///
/// The component suffix distinguishes sub-units of one physical device;
/// component `1` (or no suffix) is the physical device itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceUrl(String);

impl DeviceUrl {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The component index after `#`. Defaults to 1 when the suffix is
    /// missing or unparseable.
    pub fn component_index(&self) -> u32 {
        self.0
            .rsplit_once('#')
            .and_then(|(_, idx)| idx.parse().ok())
            .unwrap_or(1)
    }

    /// The URL without its component suffix; identifies the physical unit
    /// shared by all of its components.
    pub fn base(&self) -> &str {
        self.0.rsplit_once('#').map_or(self.0.as_str(), |(b, _)| b)
    }
}

impl fmt::Display for DeviceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceUrl {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for DeviceUrl {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceUrl {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── StateValue ──────────────────────────────────────────────────────

/// A typed device state value.
///
/// Only scalar portal states become `StateValue`s; array- and
/// object-typed states are opaque to this layer and are dropped at
/// conversion, so they never take part in change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl StateValue {
    /// Convert a wire state, honoring its type tag. Returns `None` for
    /// structured types and for values that cannot be coerced.
    pub(crate) fn from_wire(def: &DeviceStateDefinition) -> Option<Self> {
        let value = &def.value;
        match def.state_type {
            STATE_TYPE_INT | STATE_TYPE_FLOAT => value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .map(Self::Number),
            STATE_TYPE_STRING => value.as_str().map(|s| Self::Text(s.to_owned())),
            STATE_TYPE_BOOLEAN => value
                .as_bool()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .map(Self::Bool),
            STATE_TYPE_JSON_ARRAY | STATE_TYPE_JSON_OBJECT => None,
            // Untyped (events sometimes omit the tag): infer from the JSON shape.
            _ => match value {
                serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
                serde_json::Value::String(s) => Some(Self::Text(s.clone())),
                serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
                _ => None,
            },
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Convert a slice of wire states into applicable `(name, value)` deltas,
/// silently dropping structured values.
pub(crate) fn state_deltas(states: &[DeviceStateDefinition]) -> Vec<(String, StateValue)> {
    states
        .iter()
        .filter_map(|def| StateValue::from_wire(def).map(|v| (def.name.clone(), v)))
        .collect()
}

// ── Device ──────────────────────────────────────────────────────────

/// A controllable unit or attached sensor known to the hub.
///
/// Created once per topology fetch and reconciled in place afterwards;
/// a device is never destroyed during a session, so subscriptions taken
/// on it stay valid across re-fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_url: DeviceUrl,
    pub label: String,
    /// UI classification (e.g. `RollerShutter`, `HeatingSystem`).
    pub ui_class: String,
    /// Widget name, when the portal reports one.
    pub widget: Option<String>,
    /// Protocol-qualified type name (e.g. `io:RollerShutterGenericIOComponent`).
    pub controllable_name: String,
    /// Supported command names, in definition order.
    pub commands: Vec<String>,
    /// Current states, in listing order.
    pub states: IndexMap<String, StateValue>,
    /// Owning physical device, for sensors attached during topology
    /// assembly. `None` for physical devices.
    pub parent: Option<DeviceUrl>,
    /// Sensors owned by this device, in listing order.
    pub sensors: Vec<DeviceUrl>,
    pub available: bool,
    pub enabled: bool,
}

impl Device {
    /// Build a device from its wire definition. Scalar initial states are
    /// applied immediately; `parent` is the topology layer's decision.
    pub(crate) fn from_definition(def: &DeviceDefinition, parent: Option<DeviceUrl>) -> Self {
        let states = def
            .states
            .iter()
            .filter_map(|s| StateValue::from_wire(s).map(|v| (s.name.clone(), v)))
            .collect();
        Self {
            device_url: DeviceUrl::new(def.device_url.clone()),
            label: def.label.clone(),
            ui_class: def.definition.ui_class.clone(),
            widget: def.definition.widget_name.clone(),
            controllable_name: def.controllable_name.clone(),
            commands: def
                .definition
                .commands
                .iter()
                .map(|c| c.command_name.clone())
                .collect(),
            states,
            parent,
            sensors: Vec::new(),
            available: def.available,
            enabled: def.enabled,
        }
    }

    /// Whether this device declares the given command.
    pub fn supports_command(&self, name: &str) -> bool {
        self.commands.iter().any(|c| c == name)
    }

    /// Whether this device is a sensor attached to a physical device.
    pub fn is_sensor(&self) -> bool {
        self.parent.is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn component_index_defaults_to_one() {
        assert_eq!(DeviceUrl::new("io://1234/5678").component_index(), 1);
        assert_eq!(DeviceUrl::new("io://1234/5678#1").component_index(), 1);
        assert_eq!(DeviceUrl::new("io://1234/5678#3").component_index(), 3);
    }

    #[test]
    fn base_strips_component_suffix() {
        assert_eq!(DeviceUrl::new("io://1234/5678#2").base(), "io://1234/5678");
        assert_eq!(DeviceUrl::new("io://1234/5678").base(), "io://1234/5678");
    }

    #[test]
    fn scalar_wire_states_convert() {
        let int_state: DeviceStateDefinition =
            serde_json::from_value(json!({"name": "core:ClosureState", "type": 1, "value": 100}))
                .unwrap();
        assert_eq!(
            StateValue::from_wire(&int_state),
            Some(StateValue::Number(100.0))
        );

        let text_state: DeviceStateDefinition = serde_json::from_value(
            json!({"name": "core:OpenClosedState", "type": 3, "value": "closed"}),
        )
        .unwrap();
        assert_eq!(
            StateValue::from_wire(&text_state),
            Some(StateValue::Text("closed".into()))
        );

        let bool_state: DeviceStateDefinition = serde_json::from_value(
            json!({"name": "core:ContactState", "type": 6, "value": true}),
        )
        .unwrap();
        assert_eq!(
            StateValue::from_wire(&bool_state),
            Some(StateValue::Bool(true))
        );
    }

    #[test]
    fn structured_wire_states_are_dropped() {
        let array_state: DeviceStateDefinition = serde_json::from_value(
            json!({"name": "core:ChannelsState", "type": 10, "value": [1, 2]}),
        )
        .unwrap();
        assert_eq!(StateValue::from_wire(&array_state), None);

        let object_state: DeviceStateDefinition = serde_json::from_value(
            json!({"name": "core:ComplexState", "type": 11, "value": {"a": 1}}),
        )
        .unwrap();
        assert_eq!(StateValue::from_wire(&object_state), None);
    }

    #[test]
    fn stringified_numbers_coerce_for_numeric_tags() {
        let state: DeviceStateDefinition = serde_json::from_value(
            json!({"name": "core:TemperatureState", "type": 2, "value": "19.5"}),
        )
        .unwrap();
        assert_eq!(
            StateValue::from_wire(&state),
            Some(StateValue::Number(19.5))
        );
    }
}
