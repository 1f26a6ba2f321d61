//! Reference structs embedded in primary objects.

use crate::handle::Handle;
use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CborDecode, CborEncode, CodecError, CodecResult};
use serde::{Deserialize, Serialize};

/// A reference struct whose first stored element is the target handle.
pub trait RefEntry {
    /// Handle of the referenced object.
    fn target(&self) -> Handle;
}

fn expect_fields(dec: &mut CanonicalDecoder<'_>, what: &str, expected: usize) -> CodecResult<()> {
    let len = dec.read_array_len()?;
    if len == expected {
        Ok(())
    } else {
        Err(CodecError::invalid_structure(format!(
            "{what} must have {expected} fields, found {len}"
        )))
    }
}

/// A person's or family's link to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    /// The event.
    pub handle: Handle,
    /// Role played in the event, e.g. "Primary".
    pub role: String,
}

impl RefEntry for EventRef {
    fn target(&self) -> Handle {
        self.handle
    }
}

impl CborEncode for EventRef {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.array(2);
        self.handle.encode_cbor(enc);
        enc.text(&self.role);
    }
}

impl CborDecode for EventRef {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_fields(dec, "event reference", 2)?;
        Ok(Self {
            handle: Handle::decode_cbor(dec)?,
            role: String::decode_cbor(dec)?,
        })
    }
}

/// A family's link to a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    /// The child.
    pub handle: Handle,
    /// Relation to the father, e.g. "Birth" or "Adopted".
    pub father_rel: String,
    /// Relation to the mother.
    pub mother_rel: String,
}

impl RefEntry for ChildRef {
    fn target(&self) -> Handle {
        self.handle
    }
}

impl CborEncode for ChildRef {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.array(3);
        self.handle.encode_cbor(enc);
        enc.text(&self.father_rel).text(&self.mother_rel);
    }
}

impl CborDecode for ChildRef {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_fields(dec, "child reference", 3)?;
        Ok(Self {
            handle: Handle::decode_cbor(dec)?,
            father_rel: String::decode_cbor(dec)?,
            mother_rel: String::decode_cbor(dec)?,
        })
    }
}

/// A source's link to the repository holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    /// The repository.
    pub handle: Handle,
    /// Shelf mark inside the repository.
    pub call_number: String,
    /// Medium, e.g. "Book".
    pub media_type: String,
}

impl RefEntry for RepoRef {
    fn target(&self) -> Handle {
        self.handle
    }
}

impl CborEncode for RepoRef {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.array(3);
        self.handle.encode_cbor(enc);
        enc.text(&self.call_number).text(&self.media_type);
    }
}

impl CborDecode for RepoRef {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_fields(dec, "repository reference", 3)?;
        Ok(Self {
            handle: Handle::decode_cbor(dec)?,
            call_number: String::decode_cbor(dec)?,
            media_type: String::decode_cbor(dec)?,
        })
    }
}

/// An association between two people.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    /// The associated person.
    pub handle: Handle,
    /// Nature of the association, e.g. "Godfather".
    pub relation: String,
}

impl RefEntry for PersonRef {
    fn target(&self) -> Handle {
        self.handle
    }
}

impl CborEncode for PersonRef {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.array(2);
        self.handle.encode_cbor(enc);
        enc.text(&self.relation);
    }
}

impl CborDecode for PersonRef {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_fields(dec, "person reference", 2)?;
        Ok(Self {
            handle: Handle::decode_cbor(dec)?,
            relation: String::decode_cbor(dec)?,
        })
    }
}

/// A link to a media object, optionally restricted to a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// The media object.
    pub handle: Handle,
    /// Rectangle in percent of the image: left, top, right, bottom.
    pub region: Option<[u8; 4]>,
}

impl RefEntry for MediaRef {
    fn target(&self) -> Handle {
        self.handle
    }
}

impl CborEncode for MediaRef {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.array(2);
        self.handle.encode_cbor(enc);
        match &self.region {
            Some(region) => {
                enc.array(4);
                for corner in region {
                    enc.uint(u64::from(*corner));
                }
            }
            None => {
                enc.null();
            }
        }
    }
}

impl CborDecode for MediaRef {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_fields(dec, "media reference", 2)?;
        let handle = Handle::decode_cbor(dec)?;
        let region = if dec.peek_is_null() {
            dec.read_null()?;
            None
        } else {
            expect_fields(dec, "media region", 4)?;
            let mut region = [0u8; 4];
            for corner in &mut region {
                let offset = dec.position();
                *corner = u8::try_from(dec.read_uint()?)
                    .map_err(|_| CodecError::IntegerOverflow { offset })?;
            }
            Some(region)
        };
        Ok(Self { handle, region })
    }
}

/// A place's link to an enclosing place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceRef {
    /// The enclosing place.
    pub handle: Handle,
    /// Period during which the enclosure held.
    pub date: String,
}

impl RefEntry for PlaceRef {
    fn target(&self) -> Handle {
        self.handle
    }
}

impl CborEncode for PlaceRef {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.array(2);
        self.handle.encode_cbor(enc);
        enc.text(&self.date);
    }
}

impl CborDecode for PlaceRef {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_fields(dec, "place reference", 2)?;
        Ok(Self {
            handle: Handle::decode_cbor(dec)?,
            date: String::decode_cbor(dec)?,
        })
    }
}

/// A personal name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    /// Given names.
    pub given: String,
    /// Family name.
    pub surname: String,
}

impl CborEncode for Name {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.array(2).text(&self.given).text(&self.surname);
    }
}

impl CborDecode for Name {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_fields(dec, "name", 2)?;
        Ok(Self {
            given: String::decode_cbor(dec)?,
            surname: String::decode_cbor(dec)?,
        })
    }
}

/// Sex recorded for a person.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// Female.
    Female,
    /// Male.
    Male,
    /// Not known.
    #[default]
    Unknown,
}

impl CborEncode for Gender {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.uint(match self {
            Gender::Female => 0,
            Gender::Male => 1,
            Gender::Unknown => 2,
        });
    }
}

impl CborDecode for Gender {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        match dec.read_uint()? {
            0 => Ok(Gender::Female),
            1 => Ok(Gender::Male),
            2 => Ok(Gender::Unknown),
            other => Err(CodecError::invalid_structure(format!("unknown gender {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_ref_region_roundtrip() {
        for region in [None, Some([0, 10, 90, 100])] {
            let media = MediaRef {
                handle: Handle::new(),
                region,
            };
            assert_eq!(MediaRef::from_cbor_bytes(&media.to_cbor()).unwrap(), media);
        }
    }

    #[test]
    fn region_corner_over_255_is_rejected() {
        let mut enc = CanonicalEncoder::new();
        enc.array(2);
        Handle::new().encode_cbor(&mut enc);
        enc.array(4).uint(0).uint(0).uint(300).uint(0);
        assert!(MediaRef::from_cbor_bytes(&enc.into_bytes()).is_err());
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        let mut enc = CanonicalEncoder::new();
        enc.array(3);
        Handle::new().encode_cbor(&mut enc);
        enc.text("Primary").text("extra");
        let err = EventRef::from_cbor_bytes(&enc.into_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidStructure { .. }));
    }

    #[test]
    fn gender_codes_are_stable() {
        assert_eq!(Gender::Female.to_cbor(), vec![0x00]);
        assert_eq!(Gender::Unknown.to_cbor(), vec![0x02]);
        assert!(Gender::from_cbor_bytes(&[0x05]).is_err());
    }
}
