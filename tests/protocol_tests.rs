//! Protocol-level tests against the public API: frame codec, identifiers,
//! credential signing, structure parsing and the control registry.

use loxone_ws_client::client::frame::{
    decode_text_states, encode_text_states, encode_value_states, DecodedFrame, FrameDecoder,
    FrameHeader, MessageType, TextState, ValueState,
};
use loxone_ws_client::client::{LoxoneResponse, StateUpdate, StateValue};
use loxone_ws_client::{ControlRegistry, LoxoneStructure, LoxoneUuid};
use pretty_assertions::assert_eq;
use rstest::*;

mod common;
use common::*;

#[fixture]
fn structure() -> LoxoneStructure {
    LoxoneStructure::parse(&structure_json()).unwrap()
}

fn uuid(text: &str) -> LoxoneUuid {
    text.parse().unwrap()
}

#[test]
fn test_documented_value_header() {
    // Worked example from Loxone's "Communicating with the Miniserver" document
    let header = FrameHeader::decode(&[0x03, 0x02, 0x00, 0x00, 0x30, 0x00, 0x00, 0x00]).unwrap();
    assert_eq!(header.msg_type, MessageType::ValueStates);
    assert!(!header.length_estimated);
    assert_eq!(header.payload_len, 48);
}

#[test]
fn test_short_header_rejected() {
    let mut decoder = FrameDecoder::new();
    assert!(decoder.on_binary(&[0x03, 0x02, 0x00]).is_err());
    assert!(decoder.expects_header());
}

#[test]
fn test_status_stream_sequence() {
    let mut decoder = FrameDecoder::new();
    let states = [
        ValueState {
            uuid: uuid(LIGHT_ACTIVE),
            value: 1.0,
        },
        ValueState {
            uuid: uuid(TEMPERATURE_VALUE),
            value: 21.5,
        },
    ];
    let payload = encode_value_states(&states);

    // keep-alive answer, then an estimated header, then the exact one
    let keepalive = FrameHeader::new(MessageType::KeepAlive, 0).encode();
    assert_eq!(decoder.on_binary(&keepalive).unwrap(), DecodedFrame::KeepAlive);

    let mut estimated = FrameHeader::new(MessageType::ValueStates, 0);
    estimated.length_estimated = true;
    assert_eq!(
        decoder.on_binary(&estimated.encode()).unwrap(),
        DecodedFrame::Estimated(MessageType::ValueStates)
    );
    assert!(decoder.expects_header());

    let header = FrameHeader::new(MessageType::ValueStates, payload.len() as u32).encode();
    assert_eq!(
        decoder.on_binary(&header).unwrap(),
        DecodedFrame::AwaitingPayload(MessageType::ValueStates)
    );
    assert_eq!(
        decoder.on_binary(&payload).unwrap(),
        DecodedFrame::ValueStates(states.to_vec())
    );
    assert!(decoder.expects_header());
}

#[test]
fn test_text_states() {
    let states = vec![
        TextState {
            uuid: uuid(LIGHT_ACTIVE),
            icon: uuid("00000000-0000-0000-0000000000000000"),
            text: "Küche".to_string(),
        },
        TextState {
            uuid: uuid(TEMPERATURE_VALUE),
            icon: uuid("00000000-0000-0000-0000000000000000"),
            text: "warm".to_string(),
        },
    ];
    let payload = encode_text_states(&states);
    assert_eq!(payload.len() % 4, 0);
    assert_eq!(decode_text_states(&payload).unwrap(), states);
}

#[test]
fn test_identifier_wire_layout() {
    let id = uuid(LIGHT);
    assert_eq!(
        id.to_wire(),
        [
            0x38, 0x41, 0x73, 0x0b, 0x7d, 0x03, 0x4e, 0x03, 0xff, 0xff, 0x40, 0x3f, 0xb0, 0xc3,
            0x4b, 0x9e
        ]
    );
    assert_eq!(LoxoneUuid::from_wire(id.to_wire()), id);
    assert_eq!(id.to_string(), LIGHT);

    let standard: LoxoneUuid = "0b734138-037d-034e-ffff-403fb0c34b9e".parse().unwrap();
    assert_eq!(standard, id);
}

#[cfg(feature = "crypto-openssl")]
#[test]
fn test_signing_is_deterministic() {
    use loxone_ws_client::client::auth::sign_credentials;

    assert_eq!(sign_credentials("abcd1234", "u", "p").unwrap(), AUTH_HASH);
    assert_eq!(sign_credentials("ABCD1234", "u", "p").unwrap(), AUTH_HASH);
    assert_ne!(sign_credentials("abcd1234", "u", "q").unwrap(), AUTH_HASH);
    assert!(sign_credentials("", "u", "p").is_err());
}

#[test]
fn test_key_response() {
    let response = LoxoneResponse::parse(
        r#"{"LL": { "control": "jdev/sys/getkey", "value": "41434633", "Code": "200"}}"#,
    )
    .unwrap();
    assert!(response.is_ok());
    assert_eq!(response.value_str(), "41434633");
}

#[rstest]
fn test_structure_fixture(structure: LoxoneStructure) {
    assert_eq!(structure.ms_info.ms_name.as_deref(), Some("Test House"));
    assert_eq!(structure.ms_info.serial_nr.as_deref(), Some("504F94000000"));
    assert!(structure.ms_info.extra.contains_key("projectName"));
    assert_eq!(structure.controls.len(), 2);
    assert_eq!(structure.rooms["room-kitchen"].name, "Kitchen");
    assert_eq!(
        structure.cats["cat-climate"].category_type.as_deref(),
        Some("indoortemperature")
    );
}

#[rstest]
fn test_registry_from_structure(structure: LoxoneStructure) {
    let mut registry = ControlRegistry::new();
    let summary = registry.apply_structure(&structure);
    assert_eq!(summary.added, 2);

    let update = StateUpdate::new(uuid(TEMPERATURE_VALUE), StateValue::Number(21.5));
    let binding = registry.apply_update(&update).unwrap();
    assert_eq!(binding.name, "value");
    let control = binding.control;

    let entry = registry.control(&control).unwrap();
    assert_eq!(entry.name, "Kitchen Temperature");
    assert_eq!(registry.room_name(entry), Some("Kitchen"));
    assert_eq!(registry.category_name(entry), Some("Climate"));
    assert_eq!(registry.controls_in_room("Kitchen").count(), 2);

    let summary = registry.apply_structure(&structure);
    assert_eq!(summary.retained, 2);
    assert_eq!(
        registry.state(&uuid(TEMPERATURE_VALUE)).unwrap().value,
        Some(StateValue::Number(21.5))
    );
}
