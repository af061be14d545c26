//! Loxone Miniserver WebSocket client
//!
//! Wire-level pieces (identifiers, frame codec, signer, transport) live in
//! submodules; this module holds the JSON documents exchanged over the text
//! channel and the registry built from the structure file.

pub mod auth;
pub mod command;
pub mod events;
pub mod frame;
pub mod identifier;
pub mod transport;
pub mod websocket_client;

pub use events::{event_channel, EventDispatcher, LoxoneEvent, OfflineReason, StateUpdate, StateValue};
pub use identifier::LoxoneUuid;
pub use transport::{Transport, WsFrame};
pub use websocket_client::{ConnectionState, LoxoneWebSocketClient};

#[cfg(feature = "websocket")]
pub use transport::TungsteniteTransport;

use crate::error::{LoxoneError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Response envelope `{"LL": {...}}` sent for every text command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoxoneResponse {
    /// Echo of the command path
    #[serde(default)]
    pub control: String,

    /// Command result
    #[serde(default)]
    pub value: serde_json::Value,

    /// Status code
    #[serde(rename = "Code", alias = "code", deserialize_with = "deserialize_code")]
    pub code: u16,
}

#[derive(Deserialize)]
struct LlEnvelope {
    #[serde(rename = "LL")]
    ll: LoxoneResponse,
}

fn deserialize_code<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(u16),
        Text(String),
    }

    match Code::deserialize(deserializer)? {
        Code::Number(code) => Ok(code),
        Code::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl LoxoneResponse {
    /// Parse a text frame carrying an `LL` envelope
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str::<LlEnvelope>(text)
            .map(|envelope| envelope.ll)
            .map_err(|e| LoxoneError::parsing_error(format!("Invalid LL response: {e}")))
    }

    /// The value as text; strings are returned without quotes
    pub fn value_str(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == command::STATUS_OK
    }
}

/// Miniserver identification from the structure file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiniserverInfo {
    #[serde(default)]
    pub ms_name: Option<String>,

    #[serde(default)]
    pub serial_nr: Option<String>,

    #[serde(default)]
    pub sw_version: Option<String>,

    /// Remaining fields, kept verbatim
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Loxone structure file data (`LoxAPP3.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoxoneStructure {
    #[serde(rename = "msInfo")]
    pub ms_info: MiniserverInfo,

    #[serde(rename = "lastModified", default)]
    pub last_modified: Option<String>,

    #[serde(default)]
    pub controls: HashMap<String, LoxoneControl>,

    #[serde(default)]
    pub rooms: HashMap<String, LoxoneRoom>,

    #[serde(default)]
    pub cats: HashMap<String, LoxoneCategory>,
}

impl LoxoneStructure {
    /// Parse the structure document
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| LoxoneError::parsing_error(format!("Invalid structure file: {e}")))
    }
}

/// Control entry of the structure file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoxoneControl {
    pub name: String,

    #[serde(rename = "type")]
    pub control_type: String,

    pub uuid_action: String,

    #[serde(default)]
    pub room: Option<String>,

    #[serde(default)]
    pub cat: Option<String>,

    /// State name to state identifier (a string, or an array for multi-value states)
    #[serde(default)]
    pub states: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub details: serde_json::Value,

    #[serde(default)]
    pub sub_controls: HashMap<String, LoxoneControl>,
}

impl LoxoneControl {
    /// State names with their parsed identifiers
    ///
    /// Entries that are not identifiers are skipped.
    pub fn state_uuids(&self) -> Vec<(String, LoxoneUuid)> {
        let mut result = Vec::new();
        for (name, value) in &self.states {
            match value {
                serde_json::Value::String(text) => {
                    if let Ok(uuid) = text.parse() {
                        result.push((name.clone(), uuid));
                    }
                }
                serde_json::Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if let Some(uuid) = item.as_str().and_then(|s| s.parse().ok()) {
                            result.push((format!("{name}[{i}]"), uuid));
                        }
                    }
                }
                other => trace!("state {} of {} is not an identifier: {}", name, self.name, other),
            }
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoxoneRoom {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoxoneCategory {
    pub uuid: String,
    pub name: String,

    #[serde(rename = "type", default)]
    pub category_type: Option<String>,
}

/// Control known to the registry
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEntry {
    /// Identifier; carries the "seen in the last refresh" flag
    pub uuid: LoxoneUuid,
    pub name: String,
    pub control_type: String,
    pub room: Option<String>,
    pub category: Option<String>,
    /// Parent control for sub-controls
    pub parent: Option<LoxoneUuid>,
    pub states: HashMap<String, LoxoneUuid>,
}

/// Binding of a state identifier to its control
#[derive(Debug, Clone, PartialEq)]
pub struct StateBinding {
    pub control: LoxoneUuid,
    pub name: String,
    pub value: Option<StateValue>,
}

/// Outcome of applying a structure file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub removed: usize,
    pub retained: usize,
}

/// Controls and state values of one Miniserver
#[derive(Debug, Default)]
pub struct ControlRegistry {
    controls: HashMap<LoxoneUuid, ControlEntry>,
    states: HashMap<LoxoneUuid, StateBinding>,
    rooms: HashMap<String, String>,
    categories: HashMap<String, String>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a (re)loaded structure file
    ///
    /// Controls absent from the new file are dropped; last known values of
    /// states that still exist are kept.
    pub fn apply_structure(&mut self, structure: &LoxoneStructure) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        for entry in self.controls.values_mut() {
            entry.uuid = entry.uuid.with_updated(false);
        }

        self.rooms = structure
            .rooms
            .values()
            .map(|room| (room.uuid.clone(), room.name.clone()))
            .collect();
        self.categories = structure
            .cats
            .values()
            .map(|cat| (cat.uuid.clone(), cat.name.clone()))
            .collect();

        for (key, control) in &structure.controls {
            self.add_control(key, control, None, &mut summary);
        }

        let before = self.controls.len();
        self.controls.retain(|_, entry| entry.uuid.is_updated());
        summary.removed = before - self.controls.len();

        let mut states = HashMap::new();
        for entry in self.controls.values() {
            for (name, state_uuid) in &entry.states {
                let value = self
                    .states
                    .get(state_uuid)
                    .and_then(|binding| binding.value.clone());
                states.insert(
                    *state_uuid,
                    StateBinding {
                        control: entry.uuid,
                        name: name.clone(),
                        value,
                    },
                );
            }
        }
        self.states = states;

        debug!(
            "Structure applied: {} added, {} removed, {} retained, {} states",
            summary.added,
            summary.removed,
            summary.retained,
            self.states.len()
        );
        summary
    }

    fn add_control(
        &mut self,
        key: &str,
        control: &LoxoneControl,
        parent: Option<LoxoneUuid>,
        summary: &mut RefreshSummary,
    ) {
        let uuid = match control.uuid_action.parse::<LoxoneUuid>().or_else(|_| key.parse()) {
            Ok(uuid) => uuid.with_updated(true),
            Err(e) => {
                debug!("Skipping control {} with bad identifier: {}", control.name, e);
                return;
            }
        };

        let entry = ControlEntry {
            uuid,
            name: control.name.clone(),
            control_type: control.control_type.clone(),
            room: control.room.clone(),
            category: control.cat.clone(),
            parent,
            states: control.state_uuids().into_iter().collect(),
        };
        if self.controls.insert(uuid, entry).is_some() {
            summary.retained += 1;
        } else {
            summary.added += 1;
        }

        for (sub_key, sub_control) in &control.sub_controls {
            self.add_control(sub_key, sub_control, Some(uuid), summary);
        }
    }

    /// Record a state update; returns the binding if the state is known
    pub fn apply_update(&mut self, update: &StateUpdate) -> Option<&StateBinding> {
        let binding = self.states.get_mut(&update.uuid)?;
        binding.value = Some(update.value.clone());
        Some(binding)
    }

    pub fn control(&self, uuid: &LoxoneUuid) -> Option<&ControlEntry> {
        self.controls.get(uuid)
    }

    /// Find a control by name, case-insensitive
    pub fn control_by_name(&self, name: &str) -> Option<&ControlEntry> {
        self.controls
            .values()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn state(&self, uuid: &LoxoneUuid) -> Option<&StateBinding> {
        self.states.get(uuid)
    }

    pub fn controls(&self) -> impl Iterator<Item = &ControlEntry> {
        self.controls.values()
    }

    /// Controls assigned to the room with the given name
    pub fn controls_in_room<'a>(&'a self, room_name: &'a str) -> impl Iterator<Item = &'a ControlEntry> {
        self.controls.values().filter(move |entry| {
            entry
                .room
                .as_ref()
                .and_then(|room| self.rooms.get(room))
                .is_some_and(|name| name == room_name)
        })
    }

    pub fn room_name(&self, entry: &ControlEntry) -> Option<&str> {
        entry.room.as_ref().and_then(|room| self.rooms.get(room)).map(String::as_str)
    }

    pub fn category_name(&self, entry: &ControlEntry) -> Option<&str> {
        entry
            .category
            .as_ref()
            .and_then(|cat| self.categories.get(cat))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const LIGHT: &str = "0b734138-037d-034e-ffff403fb0c34b9e";
    const LIGHT_ACTIVE: &str = "0b734138-037d-034e-ffff403fb0c34b01";
    const BLIND: &str = "1a2b3c4d-0001-0002-ffff403fb0c34b9e";
    const BLIND_POS: &str = "1a2b3c4d-0001-0002-ffff403fb0c34b02";

    fn structure(with_blind: bool) -> LoxoneStructure {
        let mut controls = json!({
            LIGHT: {
                "name": "Kitchen Light",
                "type": "Switch",
                "uuidAction": LIGHT,
                "room": "room-1",
                "cat": "cat-1",
                "states": { "active": LIGHT_ACTIVE }
            }
        });
        if with_blind {
            controls[BLIND] = json!({
                "name": "Blind",
                "type": "Jalousie",
                "uuidAction": BLIND,
                "states": { "position": BLIND_POS }
            });
        }
        serde_json::from_value(json!({
            "lastModified": "2024-01-01 10:00:00",
            "msInfo": { "msName": "Home", "serialNr": "504F94000000", "swVersion": "14.5" },
            "controls": controls,
            "rooms": { "room-1": { "uuid": "room-1", "name": "Kitchen" } },
            "cats": { "cat-1": { "uuid": "cat-1", "name": "Lighting", "type": "lights" } }
        }))
        .unwrap()
    }

    #[test]
    fn test_response_code_number_or_string() {
        let resp = LoxoneResponse::parse(
            r#"{"LL": {"control": "jdev/sys/getkey", "value": "abcd1234", "Code": "200"}}"#,
        )
        .unwrap();
        assert_eq!(resp.code, 200);
        assert_eq!(resp.value_str(), "abcd1234");
        assert!(resp.is_ok());

        let resp = LoxoneResponse::parse(r#"{"LL": {"control": "authenticate/x", "value": "", "code": 401}}"#)
            .unwrap();
        assert_eq!(resp.code, 401);
        assert!(!resp.is_ok());
    }

    #[test]
    fn test_response_rejects_garbage() {
        assert!(LoxoneResponse::parse("not json").is_err());
        assert!(LoxoneResponse::parse(r#"{"control": "x", "Code": 200}"#).is_err());
        assert!(LoxoneResponse::parse(r#"{"LL": {"control": "x", "Code": "OK"}}"#).is_err());
    }

    #[test]
    fn test_structure_requires_ms_info() {
        assert!(LoxoneStructure::parse(r#"{"controls": {}}"#).is_err());
        let structure = LoxoneStructure::parse(r#"{"msInfo": {"msName": "Home"}}"#).unwrap();
        assert_eq!(structure.ms_info.ms_name.as_deref(), Some("Home"));
        assert!(structure.controls.is_empty());
        assert!(structure.last_modified.is_none());
    }

    #[test]
    fn test_state_uuids_accepts_arrays() {
        let control: LoxoneControl = serde_json::from_value(json!({
            "name": "Meter",
            "type": "Meter",
            "uuidAction": LIGHT,
            "states": {
                "actual": LIGHT_ACTIVE,
                "values": [BLIND, BLIND_POS],
                "flag": 3
            }
        }))
        .unwrap();
        let mut states = control.state_uuids();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        let names: Vec<_> = states.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["actual", "values[0]", "values[1]"]);
    }

    #[test]
    fn test_registry_refresh() {
        let mut registry = ControlRegistry::new();
        let summary = registry.apply_structure(&structure(true));
        assert_eq!(
            summary,
            RefreshSummary {
                added: 2,
                removed: 0,
                retained: 0
            }
        );

        let light: LoxoneUuid = LIGHT.parse().unwrap();
        let entry = registry.control(&light).unwrap();
        assert_eq!(entry.name, "Kitchen Light");
        assert_eq!(registry.room_name(entry), Some("Kitchen"));
        assert_eq!(registry.category_name(entry), Some("Lighting"));
        assert_eq!(registry.controls_in_room("Kitchen").count(), 1);

        let summary = registry.apply_structure(&structure(false));
        assert_eq!(
            summary,
            RefreshSummary {
                added: 0,
                removed: 1,
                retained: 1
            }
        );
        assert!(registry.control_by_name("blind").is_none());
        assert!(registry.state(&BLIND_POS.parse().unwrap()).is_none());
    }

    #[test]
    fn test_registry_tracks_values_across_refresh() {
        let mut registry = ControlRegistry::new();
        registry.apply_structure(&structure(false));

        let active: LoxoneUuid = LIGHT_ACTIVE.parse().unwrap();
        let binding = registry
            .apply_update(&StateUpdate::new(active, StateValue::Number(1.0)))
            .unwrap();
        assert_eq!(binding.name, "active");
        assert_eq!(binding.control, LIGHT.parse::<LoxoneUuid>().unwrap());

        let unknown: LoxoneUuid = BLIND_POS.parse().unwrap();
        assert!(registry
            .apply_update(&StateUpdate::new(unknown, StateValue::Number(0.5)))
            .is_none());

        registry.apply_structure(&structure(true));
        assert_eq!(
            registry.state(&active).unwrap().value,
            Some(StateValue::Number(1.0))
        );
        assert_eq!(registry.len(), 2);
    }
}
