//! Event records.

use super::codec::{decode_common, encode_common, expect_len, visit_entries, visit_handles};
use super::refs::MediaRef;
use super::{now_secs, PrimaryObject, Record};
use crate::handle::Handle;
use crate::types::ObjectClass;
use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CborDecode, CborEncode, CodecResult};
use serde::{Deserialize, Serialize};

/// Something that happened at a time and place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Storage key.
    pub handle: Handle,
    /// Human-readable ID, e.g. "E0001".
    pub id: String,
    /// Kind of event, e.g. "Birth".
    pub event_type: String,
    /// Date as entered, e.g. "abt 1850".
    pub date: String,
    /// Free-text description.
    pub description: String,
    /// Where it happened.
    pub place: Option<Handle>,
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

impl Event {
    /// Creates an event of the given type with a fresh handle.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            handle: Handle::new(),
            event_type: event_type.into(),
            change: now_secs(),
            ..Self::default()
        }
    }
}

impl PrimaryObject for Event {
    const CLASS: ObjectClass = ObjectClass::Event;

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
        if let Some(place) = self.place {
            visit(ObjectClass::Place, place);
        }
        visit_entries(&self.media_list, ObjectClass::Media, visit);
        visit_handles(&self.citation_list, ObjectClass::Citation, visit);
        visit_handles(&self.note_list, ObjectClass::Note, visit);
    }

    fn encode_references(&self, enc: &mut CanonicalEncoder) {
        enc.array(4);
        self.place.encode_cbor(enc);
        self.media_list.encode_cbor(enc);
        self.citation_list.encode_cbor(enc);
        self.note_list.encode_cbor(enc);
    }

    fn encode_scalars(&self, enc: &mut CanonicalEncoder) {
        enc.array(5)
            .text(&self.event_type)
            .text(&self.date)
            .text(&self.description);
        encode_common(enc, self.change, self.private);
    }

    fn decode_body(handle: Handle, id: String, dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_len(dec, "event references", 4)?;
        let place = Option::decode_cbor(dec)?;
        let media_list = Vec::decode_cbor(dec)?;
        let citation_list = Vec::decode_cbor(dec)?;
        let note_list = Vec::decode_cbor(dec)?;

        expect_len(dec, "event scalars", 5)?;
        let event_type = String::decode_cbor(dec)?;
        let date = String::decode_cbor(dec)?;
        let description = String::decode_cbor(dec)?;
        let (change, private) = decode_common(dec)?;

        Ok(Self {
            handle,
            id,
            event_type,
            date,
            description,
            place,
            media_list,
            citation_list,
            note_list,
            change,
            private,
        })
    }

    fn into_record(self) -> Record {
        Record::Event(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Event(event) => Some(event),
            _ => None,
        }
    }
}
