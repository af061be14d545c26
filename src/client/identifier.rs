//! Miniserver object identifiers
//!
//! Every control, state, room and category on the Miniserver is named by a
//! 128-bit identifier. On the wire the first three groups are little-endian;
//! the text form prints them in natural order followed by the remaining eight
//! bytes as one hex group, e.g. `0b734138-037d-034e-ffff403fb0c34b9e`.

use crate::error::{LoxoneError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

/// Length of an identifier on the wire
pub const UUID_WIRE_LEN: usize = 16;

/// Identifier of a Miniserver object
///
/// The `updated` flag is transient bookkeeping for configuration refreshes;
/// it never takes part in equality, ordering or hashing.
#[derive(Clone, Copy)]
pub struct LoxoneUuid {
    inner: Uuid,
    updated: bool,
}

impl LoxoneUuid {
    /// Build from the 16 wire bytes (first three groups little-endian)
    pub fn from_wire(bytes: [u8; UUID_WIRE_LEN]) -> Self {
        Self {
            inner: Uuid::from_bytes_le(bytes),
            updated: false,
        }
    }

    /// Build from the first 16 bytes of a wire slice
    pub fn from_wire_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; UUID_WIRE_LEN] = bytes
            .get(..UUID_WIRE_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                LoxoneError::parsing_error(format!(
                    "identifier needs {} bytes, got {}",
                    UUID_WIRE_LEN,
                    bytes.len()
                ))
            })?;
        Ok(Self::from_wire(raw))
    }

    /// Encode to the 16 wire bytes
    pub fn to_wire(&self) -> [u8; UUID_WIRE_LEN] {
        self.inner.to_bytes_le()
    }

    /// Whether this identifier was seen in the latest configuration refresh
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Copy of this identifier with the refresh flag set to `updated`
    pub fn with_updated(self, updated: bool) -> Self {
        Self { updated, ..self }
    }

    /// Underlying UUID value
    pub fn as_uuid(&self) -> &Uuid {
        &self.inner
    }
}

impl PartialEq for LoxoneUuid {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for LoxoneUuid {}

impl Hash for LoxoneUuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl PartialOrd for LoxoneUuid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LoxoneUuid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.inner.cmp(&other.inner)
    }
}

impl fmt::Display for LoxoneUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (d1, d2, d3, d4) = self.inner.as_fields();
        write!(f, "{:08x}-{:04x}-{:04x}-{}", d1, d2, d3, hex::encode(d4))
    }
}

impl fmt::Debug for LoxoneUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoxoneUuid({self})")
    }
}

impl FromStr for LoxoneUuid {
    type Err = LoxoneError;

    /// Parse the text form; any hyphenation of 32 hex digits is accepted
    fn from_str(s: &str) -> Result<Self> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        if digits.len() != UUID_WIRE_LEN * 2 {
            return Err(LoxoneError::parsing_error(format!(
                "invalid identifier '{s}': expected 32 hex digits"
            )));
        }

        let mut bytes = [0u8; UUID_WIRE_LEN];
        hex::decode_to_slice(&digits, &mut bytes)
            .map_err(|e| LoxoneError::parsing_error(format!("invalid identifier '{s}': {e}")))?;

        Ok(Self {
            inner: Uuid::from_bytes(bytes),
            updated: false,
        })
    }
}

impl From<Uuid> for LoxoneUuid {
    fn from(inner: Uuid) -> Self {
        Self {
            inner,
            updated: false,
        }
    }
}

impl Serialize for LoxoneUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LoxoneUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
