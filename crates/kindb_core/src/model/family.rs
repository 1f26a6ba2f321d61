//! Family records.

use super::codec::{decode_common, encode_common, expect_len, visit_entries, visit_handles};
use super::refs::{ChildRef, EventRef, MediaRef};
use super::{now_secs, PrimaryObject, Record};
use crate::handle::Handle;
use crate::types::ObjectClass;
use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CborDecode, CborEncode, CodecResult};
use serde::{Deserialize, Serialize};

/// A couple and their children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    /// Storage key.
    pub handle: Handle,
    /// Human-readable ID, e.g. "F0001".
    pub id: String,
    /// The father, if known.
    pub father_handle: Option<Handle>,
    /// The mother, if known.
    pub mother_handle: Option<Handle>,
    /// Children with their relation to each parent.
    pub child_ref_list: Vec<ChildRef>,
    /// Family events such as marriages.
    pub event_ref_list: Vec<EventRef>,
    /// Attached media.
    pub media_list: Vec<MediaRef>,
    /// Supporting citations.
    pub citation_list: Vec<Handle>,
    /// Attached notes.
    pub note_list: Vec<Handle>,
    /// Relationship type, e.g. "Married".
    pub relation_type: String,
    /// Last change, seconds since the Unix epoch.
    pub change: i64,
    /// Hidden from public reports.
    pub private: bool,
}

impl Family {
    /// Creates an empty family with a fresh handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handle: Handle::new(),
            relation_type: "Unknown".into(),
            change: now_secs(),
            ..Self::default()
        }
    }

    /// Handles of both parents, father first.
    pub fn parents(&self) -> impl Iterator<Item = Handle> + '_ {
        self.father_handle.iter().chain(self.mother_handle.iter()).copied()
    }
}

impl PrimaryObject for Family {
    const CLASS: ObjectClass = ObjectClass::Family;

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
        for parent in self.parents() {
            visit(ObjectClass::Person, parent);
        }
        visit_entries(&self.child_ref_list, ObjectClass::Person, visit);
        visit_entries(&self.event_ref_list, ObjectClass::Event, visit);
        visit_entries(&self.media_list, ObjectClass::Media, visit);
        visit_handles(&self.citation_list, ObjectClass::Citation, visit);
        visit_handles(&self.note_list, ObjectClass::Note, visit);
    }

    fn encode_references(&self, enc: &mut CanonicalEncoder) {
        enc.array(7);
        self.father_handle.encode_cbor(enc);
        self.mother_handle.encode_cbor(enc);
        self.child_ref_list.encode_cbor(enc);
        self.event_ref_list.encode_cbor(enc);
        self.media_list.encode_cbor(enc);
        self.citation_list.encode_cbor(enc);
        self.note_list.encode_cbor(enc);
    }

    fn encode_scalars(&self, enc: &mut CanonicalEncoder) {
        enc.array(3).text(&self.relation_type);
        encode_common(enc, self.change, self.private);
    }

    fn decode_body(handle: Handle, id: String, dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_len(dec, "family references", 7)?;
        let father_handle = Option::decode_cbor(dec)?;
        let mother_handle = Option::decode_cbor(dec)?;
        let child_ref_list = Vec::decode_cbor(dec)?;
        let event_ref_list = Vec::decode_cbor(dec)?;
        let media_list = Vec::decode_cbor(dec)?;
        let citation_list = Vec::decode_cbor(dec)?;
        let note_list = Vec::decode_cbor(dec)?;

        expect_len(dec, "family scalars", 3)?;
        let relation_type = String::decode_cbor(dec)?;
        let (change, private) = decode_common(dec)?;

        Ok(Self {
            handle,
            id,
            father_handle,
            mother_handle,
            child_ref_list,
            event_ref_list,
            media_list,
            citation_list,
            note_list,
            relation_type,
            change,
            private,
        })
    }

    fn into_record(self) -> Record {
        Record::Family(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Family(family) => Some(family),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_roundtrip() {
        let mut family = Family::new();
        family.id = "F0023".into();
        family.father_handle = Some(Handle::new());
        family.child_ref_list.push(ChildRef {
            handle: Handle::new(),
            father_rel: "Birth".into(),
            mother_rel: "Adopted".into(),
        });
        assert_eq!(Family::decode(&family.encode()).unwrap(), family);
    }

    #[test]
    fn parents_skip_missing() {
        let mut family = Family::new();
        assert_eq!(family.parents().count(), 0);
        let mother = Handle::new();
        family.mother_handle = Some(mother);
        assert_eq!(family.parents().collect::<Vec<_>>(), vec![mother]);
    }
}
