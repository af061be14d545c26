//! Common test utilities

#![allow(dead_code)]

use loxone_ws_client::LoxoneConfig;

pub const LIGHT: &str = "0b734138-037d-034e-ffff403fb0c34b9e";
pub const LIGHT_ACTIVE: &str = "0b734138-037d-034e-ffff403fb0c34b01";
pub const TEMPERATURE: &str = "0f1e2d3c-0102-0304-ffff403fb0c34b9e";
pub const TEMPERATURE_VALUE: &str = "0f1e2d3c-0102-0304-ffff403fb0c34b03";

/// Signature of user `u`, password `p` for nonce `abcd1234`
pub const AUTH_HASH: &str = "e194779ba58970aefb4a9b987218d6585be3fd78";

/// Trimmed `LoxAPP3.json` as sent by a Miniserver
pub fn structure_json() -> String {
    serde_json::json!({
        "lastModified": "2024-03-01 12:00:00",
        "msInfo": {
            "serialNr": "504F94000000",
            "msName": "Test House",
            "projectName": "Test",
            "swVersion": "14.5.12.7",
            "languageCode": "DEU"
        },
        "controls": {
            LIGHT: {
                "name": "Kitchen Light",
                "type": "Switch",
                "uuidAction": LIGHT,
                "room": "room-kitchen",
                "cat": "cat-lights",
                "defaultRating": 0,
                "states": { "active": LIGHT_ACTIVE }
            },
            TEMPERATURE: {
                "name": "Kitchen Temperature",
                "type": "InfoOnlyAnalog",
                "uuidAction": TEMPERATURE,
                "room": "room-kitchen",
                "cat": "cat-climate",
                "details": { "format": "%.1f°" },
                "states": { "value": TEMPERATURE_VALUE }
            }
        },
        "rooms": {
            "room-kitchen": { "uuid": "room-kitchen", "name": "Kitchen", "image": "kitchen.svg" }
        },
        "cats": {
            "cat-lights": { "uuid": "cat-lights", "name": "Lights", "type": "lights" },
            "cat-climate": { "uuid": "cat-climate", "name": "Climate", "type": "indoortemperature" }
        }
    })
    .to_string()
}

/// Configuration pointing at a local test server
pub fn local_config(port: u16) -> LoxoneConfig {
    LoxoneConfig {
        host: "127.0.0.1".to_string(),
        port,
        username: "u".to_string(),
        ..Default::default()
    }
}
