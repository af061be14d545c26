//! Miniserver binary sub-protocol
//!
//! Every binary payload from the Miniserver is announced by an 8-byte header
//! sent as its own WebSocket message:
//!
//! ```text
//! +--------+--------+--------+----------+---------------------------+
//! | 0x03   | type   | flags  | reserved | payload length (u32 LE)   |
//! +--------+--------+--------+----------+---------------------------+
//! ```
//!
//! Headers and payloads alternate. [`FrameDecoder`] tracks which one is due
//! next and turns payloads of the value and text tables into state records.

use crate::client::identifier::{LoxoneUuid, UUID_WIRE_LEN};
use crate::error::{LoxoneError, Result};
use tracing::{debug, trace, warn};

/// Size of a binary header
pub const HEADER_LEN: usize = 8;

/// First byte of every valid header
pub const HEADER_MARKER: u8 = 0x03;

/// Flag bit: the announced length is only an estimate
pub const FLAG_LENGTH_ESTIMATED: u8 = 0x01;

/// Size of one record in a value-update table
pub const VALUE_STATE_LEN: usize = UUID_WIRE_LEN + 8;

/// Message type announced by a header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A text message follows as a WebSocket text frame
    Text,
    /// A file follows
    BinaryFile,
    /// Table of numeric state updates
    ValueStates,
    /// Table of text state updates
    TextStates,
    /// Table of day-timer updates
    DaytimerStates,
    /// The Miniserver is going out of service
    OutOfService,
    /// Answer to a `keepalive` command
    KeepAlive,
    /// Table of weather updates
    WeatherStates,
    /// Unrecognised type byte or header marker
    Unknown,
}

impl MessageType {
    /// Classify the type byte of a header
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0 => Self::Text,
            1 => Self::BinaryFile,
            2 => Self::ValueStates,
            3 => Self::TextStates,
            4 => Self::DaytimerStates,
            5 => Self::OutOfService,
            6 => Self::KeepAlive,
            7 => Self::WeatherStates,
            _ => Self::Unknown,
        }
    }

    /// Type byte written for this message type
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Text => 0,
            Self::BinaryFile => 1,
            Self::ValueStates => 2,
            Self::TextStates => 3,
            Self::DaytimerStates => 4,
            Self::OutOfService => 5,
            Self::KeepAlive => 6,
            Self::WeatherStates => 7,
            Self::Unknown => 0xff,
        }
    }

    /// Whether a payload frame follows a header of this type
    pub fn has_payload(self) -> bool {
        matches!(
            self,
            Self::BinaryFile
                | Self::ValueStates
                | Self::TextStates
                | Self::DaytimerStates
                | Self::WeatherStates
        )
    }
}

/// Decoded 8-byte header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: MessageType,
    pub length_estimated: bool,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn new(msg_type: MessageType, payload_len: u32) -> Self {
        Self {
            msg_type,
            length_estimated: false,
            payload_len,
        }
    }

    /// Decode a header from exactly [`HEADER_LEN`] bytes
    ///
    /// A wrong marker byte is not an error: the header decodes as
    /// [`MessageType::Unknown`] and no payload is expected after it.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; HEADER_LEN] = bytes.try_into().map_err(|_| {
            LoxoneError::parsing_error(format!(
                "binary header must be {} bytes, got {}",
                HEADER_LEN,
                bytes.len()
            ))
        })?;

        let msg_type = if bytes[0] == HEADER_MARKER {
            MessageType::from_u8(bytes[1])
        } else {
            MessageType::Unknown
        };

        Ok(Self {
            msg_type,
            length_estimated: bytes[2] & FLAG_LENGTH_ESTIMATED != 0,
            payload_len: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    /// Encode this header
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let len = self.payload_len.to_le_bytes();
        let flags = if self.length_estimated {
            FLAG_LENGTH_ESTIMATED
        } else {
            0
        };
        [
            HEADER_MARKER,
            self.msg_type.as_u8(),
            flags,
            0,
            len[0],
            len[1],
            len[2],
            len[3],
        ]
    }
}

/// Numeric state record from a value-update table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueState {
    pub uuid: LoxoneUuid,
    pub value: f64,
}

/// Text state record from a text-update table
#[derive(Debug, Clone, PartialEq)]
pub struct TextState {
    pub uuid: LoxoneUuid,
    pub icon: LoxoneUuid,
    pub text: String,
}

/// Decode a value-update table
///
/// Fails as a whole if the payload is not a whole number of records.
pub fn decode_value_states(payload: &[u8]) -> Result<Vec<ValueState>> {
    if payload.len() % VALUE_STATE_LEN != 0 {
        return Err(LoxoneError::parsing_error(format!(
            "value table of {} bytes is not a multiple of {}",
            payload.len(),
            VALUE_STATE_LEN
        )));
    }

    let mut states = Vec::with_capacity(payload.len() / VALUE_STATE_LEN);
    let mut remaining = payload;
    while !remaining.is_empty() {
        let (record, rest) = remaining.split_at(VALUE_STATE_LEN);
        let uuid = LoxoneUuid::from_wire_slice(record)?;
        let mut value = [0u8; 8];
        value.copy_from_slice(&record[UUID_WIRE_LEN..]);
        states.push(ValueState {
            uuid,
            value: f64::from_le_bytes(value),
        });
        remaining = rest;
    }
    Ok(states)
}

/// Encode a value-update table
pub fn encode_value_states(states: &[ValueState]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(states.len() * VALUE_STATE_LEN);
    for state in states {
        payload.extend_from_slice(&state.uuid.to_wire());
        payload.extend_from_slice(&state.value.to_le_bytes());
    }
    payload
}

/// Decode a text-update table
///
/// Each record is identifier, icon identifier, a `u32` text length, the
/// UTF-8 text and zero padding up to the next 4-byte boundary.
pub fn decode_text_states(payload: &[u8]) -> Result<Vec<TextState>> {
    const FIXED: usize = UUID_WIRE_LEN * 2 + 4;

    let mut states = Vec::new();
    let mut remaining = payload;
    while !remaining.is_empty() {
        if remaining.len() < FIXED {
            return Err(LoxoneError::parsing_error(format!(
                "truncated text state record: {} bytes left",
                remaining.len()
            )));
        }

        let uuid = LoxoneUuid::from_wire_slice(remaining)?;
        let icon = LoxoneUuid::from_wire_slice(&remaining[UUID_WIRE_LEN..])?;
        let len_bytes = &remaining[UUID_WIRE_LEN * 2..FIXED];
        let text_len =
            u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;

        let padded = text_len.div_ceil(4) * 4;
        let body = remaining.get(FIXED..FIXED + text_len).ok_or_else(|| {
            LoxoneError::parsing_error(format!(
                "text state {uuid} announces {text_len} bytes, only {} left",
                remaining.len() - FIXED
            ))
        })?;
        let text = std::str::from_utf8(body)
            .map_err(|e| LoxoneError::parsing_error(format!("text state {uuid}: {e}")))?
            .to_string();

        states.push(TextState { uuid, icon, text });
        remaining = remaining.get(FIXED + padded..).unwrap_or(&[]);
    }
    Ok(states)
}

/// Encode a text-update table
pub fn encode_text_states(states: &[TextState]) -> Vec<u8> {
    let mut payload = Vec::new();
    for state in states {
        payload.extend_from_slice(&state.uuid.to_wire());
        payload.extend_from_slice(&state.icon.to_wire());
        payload.extend_from_slice(&(state.text.len() as u32).to_le_bytes());
        payload.extend_from_slice(state.text.as_bytes());
        let padding = state.text.len().div_ceil(4) * 4 - state.text.len();
        payload.extend(std::iter::repeat(0u8).take(padding));
    }
    payload
}

/// Result of feeding one binary message to the decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// Header consumed, its payload is expected next
    AwaitingPayload(MessageType),
    /// Header announcing the next text frame
    TextFollows,
    /// Keep-alive answer
    KeepAlive,
    /// The Miniserver announced it is going out of service
    OutOfService,
    /// Header with unknown type or marker, nothing follows
    Unknown,
    /// Estimated-length header, the exact header follows
    Estimated(MessageType),
    /// Numeric state updates
    ValueStates(Vec<ValueState>),
    /// Text state updates
    TextStates(Vec<TextState>),
    /// Payload that is consumed but not interpreted
    Skipped { msg_type: MessageType, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Header,
    Payload(FrameHeader),
}

/// Tracks the header/payload alternation of binary messages
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    expected: Expect,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            expected: Expect::Header,
        }
    }

    /// Forget any pending payload and expect a header next
    pub fn reset(&mut self) {
        self.expected = Expect::Header;
    }

    /// Whether the next binary message is taken as a header
    pub fn expects_header(&self) -> bool {
        self.expected == Expect::Header
    }

    /// A text frame arrived; any announced payload was delivered as text
    pub fn on_text(&mut self) {
        if let Expect::Payload(header) = self.expected {
            trace!("payload for {:?} arrived as text frame", header.msg_type);
        }
        self.reset();
    }

    /// Feed one binary WebSocket message
    ///
    /// On error the message is discarded and the decoder expects a header.
    pub fn on_binary(&mut self, data: &[u8]) -> Result<DecodedFrame> {
        match self.expected {
            Expect::Header => self.on_header(data),
            Expect::Payload(header) => {
                self.reset();
                Self::on_payload(header, data)
            }
        }
    }

    fn on_header(&mut self, data: &[u8]) -> Result<DecodedFrame> {
        let header = FrameHeader::decode(data)?;
        trace!(?header, "binary header");

        if header.length_estimated {
            debug!(
                "estimated header for {:?}, waiting for exact header",
                header.msg_type
            );
            return Ok(DecodedFrame::Estimated(header.msg_type));
        }

        if header.msg_type.has_payload() {
            self.expected = Expect::Payload(header);
            return Ok(DecodedFrame::AwaitingPayload(header.msg_type));
        }

        Ok(match header.msg_type {
            MessageType::Text => DecodedFrame::TextFollows,
            MessageType::KeepAlive => DecodedFrame::KeepAlive,
            MessageType::OutOfService => DecodedFrame::OutOfService,
            _ => {
                debug!("header with unknown type or marker: {}", hex::encode(data));
                DecodedFrame::Unknown
            }
        })
    }

    fn on_payload(header: FrameHeader, data: &[u8]) -> Result<DecodedFrame> {
        if header.payload_len as usize != data.len() {
            warn!(
                "header announced {} payload bytes for {:?}, received {}",
                header.payload_len,
                header.msg_type,
                data.len()
            );
        }

        match header.msg_type {
            MessageType::ValueStates => decode_value_states(data).map(DecodedFrame::ValueStates),
            MessageType::TextStates => decode_text_states(data).map(DecodedFrame::TextStates),
            msg_type => Ok(DecodedFrame::Skipped {
                msg_type,
                len: data.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn uuid(text: &str) -> LoxoneUuid {
        text.parse().unwrap()
    }

    #[rstest]
    #[case(0, MessageType::Text)]
    #[case(1, MessageType::BinaryFile)]
    #[case(2, MessageType::ValueStates)]
    #[case(3, MessageType::TextStates)]
    #[case(4, MessageType::DaytimerStates)]
    #[case(5, MessageType::OutOfService)]
    #[case(6, MessageType::KeepAlive)]
    #[case(7, MessageType::WeatherStates)]
    #[case(8, MessageType::Unknown)]
    #[case(0x42, MessageType::Unknown)]
    #[case(0xff, MessageType::Unknown)]
    fn test_header_type_table(#[case] byte: u8, #[case] expected: MessageType) {
        let header = FrameHeader::decode(&[0x03, byte, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(header.msg_type, expected);
    }

    #[test]
    fn test_every_type_byte_with_valid_marker() {
        for byte in 0..=u8::MAX {
            let header = FrameHeader::decode(&[0x03, byte, 0, 0, 0, 0, 0, 0]).unwrap();
            if byte <= 7 {
                assert_ne!(header.msg_type, MessageType::Unknown, "type byte {byte}");
            } else {
                assert_eq!(header.msg_type, MessageType::Unknown, "type byte {byte}");
            }
        }
    }

    #[rstest]
    #[case(&[])]
    #[case(&[0x03, 2, 0, 0, 48, 0, 0])]
    #[case(&[0x03, 2, 0, 0, 48, 0, 0, 0, 0])]
    fn test_header_requires_eight_bytes(#[case] bytes: &[u8]) {
        assert!(matches!(
            FrameHeader::decode(bytes),
            Err(LoxoneError::Parsing(_))
        ));
    }

    #[test]
    fn test_wrong_marker_is_unknown() {
        let header = FrameHeader::decode(&[0x04, 2, 0, 0, 48, 0, 0, 0]).unwrap();
        assert_eq!(header.msg_type, MessageType::Unknown);
        assert!(!header.msg_type.has_payload());
    }

    #[test]
    fn test_documented_value_table_header() {
        // Value table header from the worked example in Loxone's "Communicating with
        // the Miniserver" document, not a device capture
        let header = FrameHeader::decode(&[0x03, 0x02, 0x00, 0x00, 0x30, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(header.msg_type, MessageType::ValueStates);
        assert!(!header.length_estimated);
        assert_eq!(header.payload_len, 48);
        assert_eq!(
            header.encode(),
            [0x03, 0x02, 0x00, 0x00, 0x30, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_estimated_flag() {
        let header = FrameHeader::decode(&[0x03, 1, 0x01, 0, 0, 4, 0, 0]).unwrap();
        assert!(header.length_estimated);
        assert_eq!(header.payload_len, 1024);
    }

    #[test]
    fn test_value_record_round_trip() {
        let original = ValueState {
            uuid: uuid("0b734138-037d-034e-ffff403fb0c34b9e"),
            value: -21.375,
        };
        let payload = encode_value_states(&[original]);
        assert_eq!(payload.len(), VALUE_STATE_LEN);

        let decoded = decode_value_states(&payload).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].uuid.to_string(), "0b734138-037d-034e-ffff403fb0c34b9e");
        assert_eq!(decoded[0].value, -21.375);
    }

    #[test]
    fn test_value_table_two_records_in_order() {
        let first = ValueState {
            uuid: uuid("10000000-0000-0000-0000000000000001"),
            value: 1.0,
        };
        let second = ValueState {
            uuid: uuid("20000000-0000-0000-0000000000000002"),
            value: 0.5,
        };
        let payload = encode_value_states(&[first, second]);
        assert_eq!(payload.len(), 48);
        assert_eq!(decode_value_states(&payload).unwrap(), vec![first, second]);
    }

    #[test]
    fn test_value_table_with_trailing_bytes_fails_whole() {
        let mut payload = encode_value_states(&[ValueState {
            uuid: uuid("10000000-0000-0000-0000000000000001"),
            value: 1.0,
        }]);
        payload.extend_from_slice(&[0u8; 5]);
        assert!(decode_value_states(&payload).is_err());
    }

    #[test]
    fn test_text_table() {
        let states = vec![
            TextState {
                uuid: uuid("10000000-0000-0000-0000000000000001"),
                icon: uuid("00000000-0000-0000-0000000000000000"),
                text: "Küche".to_string(),
            },
            TextState {
                uuid: uuid("20000000-0000-0000-0000000000000002"),
                icon: uuid("30000000-0000-0000-0000000000000003"),
                text: "open".to_string(),
            },
        ];
        let payload = encode_text_states(&states);
        // 36 + "Küche" (6 bytes padded to 8) + 36 + "open" (4)
        assert_eq!(payload.len(), 36 + 8 + 36 + 4);
        assert_eq!(decode_text_states(&payload).unwrap(), states);
    }

    #[test]
    fn test_truncated_text_table_fails() {
        let payload = encode_text_states(&[TextState {
            uuid: uuid("10000000-0000-0000-0000000000000001"),
            icon: uuid("00000000-0000-0000-0000000000000000"),
            text: "hello world".to_string(),
        }]);
        assert!(decode_text_states(&payload[..payload.len() - 8]).is_err());
        assert!(decode_text_states(&payload[..20]).is_err());
    }

    #[test]
    fn test_decoder_alternation() {
        let mut decoder = FrameDecoder::new();
        let state = ValueState {
            uuid: uuid("10000000-0000-0000-0000000000000001"),
            value: 3.0,
        };
        let payload = encode_value_states(&[state]);

        let header = FrameHeader::new(MessageType::ValueStates, payload.len() as u32);
        assert_eq!(
            decoder.on_binary(&header.encode()).unwrap(),
            DecodedFrame::AwaitingPayload(MessageType::ValueStates)
        );
        assert!(!decoder.expects_header());
        assert_eq!(
            decoder.on_binary(&payload).unwrap(),
            DecodedFrame::ValueStates(vec![state])
        );
        assert!(decoder.expects_header());

        let keepalive = FrameHeader::new(MessageType::KeepAlive, 0);
        assert_eq!(
            decoder.on_binary(&keepalive.encode()).unwrap(),
            DecodedFrame::KeepAlive
        );
        assert!(decoder.expects_header());
    }

    #[test]
    fn test_decoder_recovers_from_bad_payload() {
        let mut decoder = FrameDecoder::new();
        let header = FrameHeader::new(MessageType::ValueStates, 30);
        decoder.on_binary(&header.encode()).unwrap();
        assert!(decoder.on_binary(&[0u8; 30]).is_err());
        assert!(decoder.expects_header());

        // Non-header sized message while a header is due
        assert!(decoder.on_binary(&[0u8; 3]).is_err());
        assert!(decoder.expects_header());
    }

    #[test]
    fn test_decoder_text_frame_clears_pending_payload() {
        let mut decoder = FrameDecoder::new();
        decoder
            .on_binary(&FrameHeader::new(MessageType::BinaryFile, 10).encode())
            .unwrap();
        decoder.on_text();
        assert!(decoder.expects_header());
    }

    #[test]
    fn test_decoder_skips_uninterpreted_tables() {
        let mut decoder = FrameDecoder::new();
        decoder
            .on_binary(&FrameHeader::new(MessageType::WeatherStates, 4).encode())
            .unwrap();
        assert_eq!(
            decoder.on_binary(&[1, 2, 3, 4]).unwrap(),
            DecodedFrame::Skipped {
                msg_type: MessageType::WeatherStates,
                len: 4
            }
        );
    }

    #[test]
    fn test_decoder_estimated_header_keeps_expecting_header() {
        let mut decoder = FrameDecoder::new();
        let mut header = FrameHeader::new(MessageType::BinaryFile, 4096);
        header.length_estimated = true;
        assert_eq!(
            decoder.on_binary(&header.encode()).unwrap(),
            DecodedFrame::Estimated(MessageType::BinaryFile)
        );
        assert!(decoder.expects_header());
    }
}
