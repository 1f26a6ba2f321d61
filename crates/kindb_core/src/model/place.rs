//! Place records.

use super::codec::{decode_common, encode_common, expect_len, visit_entries, visit_handles};
use super::refs::{MediaRef, PlaceRef};
use super::{now_secs, PrimaryObject, Record};
use crate::handle::Handle;
use crate::types::ObjectClass;
use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CborDecode, CborEncode, CodecResult};
use serde::{Deserialize, Serialize};

/// A location, possibly enclosed by larger places.
///
/// Coordinates are kept as entered text; the payload format carries no
/// floating point values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    /// Storage key.
    pub handle: Handle,
    /// Human-readable ID, e.g. "P0001".
    pub id: String,
    /// Display title.
    pub title: String,
    /// Name of the place itself.
    pub name: String,
    /// Kind of place, e.g. "City" or "Parish".
    pub place_type: String,
    /// Latitude as entered.
    pub latitude: String,
    /// Longitude as entered.
    pub longitude: String,
    /// Places this one lies within.
    pub enclosed_by: Vec<PlaceRef>,
    /// Attached media.
    pub media_list: Vec<MediaRef>,
    /// Supporting citations.
    pub citation_list: Vec<Handle>,
    /// Attached notes.
    pub note_list: Vec<Handle>,
    /// Last change, seconds since the Unix epoch.
    pub change: i64,
    /// Hidden from public reports.
    pub private: bool,
}

impl Place {
    /// Creates a place with a fresh handle.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            handle: Handle::new(),
            title: name.clone(),
            name,
            change: now_secs(),
            ..Self::default()
        }
    }
}

impl PrimaryObject for Place {
    const CLASS: ObjectClass = ObjectClass::Place;

    fn handle(&self) -> Handle {
        self.handle
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn visit_references(&self, visit: &mut dyn FnMut(ObjectClass, Handle)) {
        visit_entries(&self.enclosed_by, ObjectClass::Place, visit);
        visit_entries(&self.media_list, ObjectClass::Media, visit);
        visit_handles(&self.citation_list, ObjectClass::Citation, visit);
        visit_handles(&self.note_list, ObjectClass::Note, visit);
    }

    fn encode_references(&self, enc: &mut CanonicalEncoder) {
        enc.array(4);
        self.enclosed_by.encode_cbor(enc);
        self.media_list.encode_cbor(enc);
        self.citation_list.encode_cbor(enc);
        self.note_list.encode_cbor(enc);
    }

    fn encode_scalars(&self, enc: &mut CanonicalEncoder) {
        enc.array(7)
            .text(&self.title)
            .text(&self.name)
            .text(&self.place_type)
            .text(&self.latitude)
            .text(&self.longitude);
        encode_common(enc, self.change, self.private);
    }

    fn decode_body(handle: Handle, id: String, dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_len(dec, "place references", 4)?;
        let enclosed_by = Vec::decode_cbor(dec)?;
        let media_list = Vec::decode_cbor(dec)?;
        let citation_list = Vec::decode_cbor(dec)?;
        let note_list = Vec::decode_cbor(dec)?;

        expect_len(dec, "place scalars", 7)?;
        let title = String::decode_cbor(dec)?;
        let name = String::decode_cbor(dec)?;
        let place_type = String::decode_cbor(dec)?;
        let latitude = String::decode_cbor(dec)?;
        let longitude = String::decode_cbor(dec)?;
        let (change, private) = decode_common(dec)?;

        Ok(Self {
            handle,
            id,
            title,
            name,
            place_type,
            latitude,
            longitude,
            enclosed_by,
            media_list,
            citation_list,
            note_list,
            change,
            private,
        })
    }

    fn into_record(self) -> Record {
        Record::Place(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Place(place) => Some(place),
            _ => None,
        }
    }
}
