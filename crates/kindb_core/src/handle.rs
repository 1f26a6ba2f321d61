//! Object handles.

use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CborDecode, CborEncode, CodecError, CodecResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of a handle in bytes.
pub const HANDLE_LEN: usize = 16;

/// Opaque primary key of a primary object.
///
/// Handles are random 128-bit values, immutable for the object's lifetime
/// and never reused. The all-zero handle is reserved to mean "not yet
/// assigned"; [`crate::Database::add_object`] replaces it with a fresh one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Handle([u8; HANDLE_LEN]);

impl Handle {
    /// Creates a new random handle.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// The unassigned handle.
    #[must_use]
    pub const fn nil() -> Self {
        Self([0; HANDLE_LEN])
    }

    /// Returns true for the unassigned handle.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0 == [0; HANDLE_LEN]
    }

    /// Creates a handle from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; HANDLE_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates a handle from a slice, if it is exactly 16 bytes long.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; HANDLE_LEN]>::try_from(slice).ok().map(Self)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HANDLE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({self})")
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Error returned when parsing a handle from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid handle {input:?}: expected 32 hex digits")]
pub struct ParseHandleError {
    input: String,
}

impl FromStr for Handle {
    type Err = ParseHandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseHandleError {
            input: s.to_string(),
        };
        if s.len() != HANDLE_LEN * 2 || !s.is_ascii() {
            return Err(err());
        }
        let mut bytes = [0u8; HANDLE_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }
        Ok(Self(bytes))
    }
}

impl From<Uuid> for Handle {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.into_bytes())
    }
}

impl From<[u8; HANDLE_LEN]> for Handle {
    fn from(bytes: [u8; HANDLE_LEN]) -> Self {
        Self(bytes)
    }
}

impl CborEncode for Handle {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.bytes(&self.0);
    }
}

impl CborDecode for Handle {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        let bytes = dec.read_bytes()?;
        Handle::from_slice(bytes).ok_or_else(|| {
            CodecError::invalid_structure(format!("handle must be 16 bytes, found {}", bytes.len()))
        })
    }
}

impl Serialize for Handle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_unique_and_not_nil() {
        let h1 = Handle::new();
        let h2 = Handle::new();
        assert_ne!(h1, h2);
        assert!(!h1.is_nil());
        assert!(Handle::nil().is_nil());
        assert_eq!(Handle::default(), Handle::nil());
    }

    #[test]
    fn display_parse_roundtrip() {
        let handle = Handle::from_bytes([
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ]);
        let text = handle.to_string();
        assert_eq!(text, "00112233445566778899aabbccddeeff");
        assert_eq!(text.parse::<Handle>().unwrap(), handle);
        assert_eq!(
            "00112233445566778899AABBCCDDEEFF".parse::<Handle>().unwrap(),
            handle
        );
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("abc".parse::<Handle>().is_err());
        assert!("zz112233445566778899aabbccddeeff".parse::<Handle>().is_err());
        // 32 bytes, but not ASCII
        assert!("é112233445566778899aabbccddeeff".parse::<Handle>().is_err());
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(Handle::from_slice(&[0u8; 16]).is_some());
        assert!(Handle::from_slice(&[0u8; 15]).is_none());
        assert!(Handle::from_slice(&[0u8; 17]).is_none());
    }

    #[test]
    fn cbor_roundtrip_and_length_check() {
        let handle = Handle::new();
        let bytes = handle.to_cbor();
        assert_eq!(bytes.len(), 17);
        assert_eq!(Handle::from_cbor_bytes(&bytes).unwrap(), handle);
        assert!(Handle::from_cbor_bytes(&[0x43, 1, 2, 3]).is_err());
    }
}
