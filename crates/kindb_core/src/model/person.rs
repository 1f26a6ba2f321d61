//! Person records.

use super::codec::{decode_common, encode_common, expect_len, visit_entries, visit_handles};
use super::refs::{EventRef, Gender, MediaRef, Name, PersonRef};
use super::{now_secs, PrimaryObject, Record};
use crate::handle::Handle;
use crate::types::ObjectClass;
use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CborDecode, CborEncode, CodecResult};
use serde::{Deserialize, Serialize};

/// A person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Storage key.
    pub handle: Handle,
    /// Human-readable ID, e.g. "I0001".
    pub id: String,
    /// Recorded sex.
    pub gender: Gender,
    /// Preferred name.
    pub primary_name: Name,
    /// Other names the person is known by.
    pub alternate_names: Vec<Name>,
    /// Families in which the person is a spouse.
    pub family_list: Vec<Handle>,
    /// Families in which the person is a child.
    pub parent_family_list: Vec<Handle>,
    /// Events the person took part in.
    pub event_ref_list: Vec<EventRef>,
    /// Index into `event_ref_list` of the birth event.
    pub birth_ref_index: Option<u32>,
    /// Index into `event_ref_list` of the death event.
    pub death_ref_index: Option<u32>,
    /// Attached media.
    pub media_list: Vec<MediaRef>,
    /// Supporting citations.
    pub citation_list: Vec<Handle>,
    /// Attached notes.
    pub note_list: Vec<Handle>,
    /// Associations with other people.
    pub person_ref_list: Vec<PersonRef>,
    /// Free-form key/value attributes.
    pub attributes: Vec<(String, String)>,
    /// Last change, seconds since the Unix epoch.
    pub change: i64,
    /// Hidden from public reports.
    pub private: bool,
}

impl Person {
    /// Creates a person with a fresh handle and no ID.
    #[must_use]
    pub fn new(given: impl Into<String>, surname: impl Into<String>) -> Self {
        Self {
            handle: Handle::new(),
            primary_name: Name {
                given: given.into(),
                surname: surname.into(),
            },
            change: now_secs(),
            ..Self::default()
        }
    }

    /// The birth event reference, if recorded.
    #[must_use]
    pub fn birth_ref(&self) -> Option<&EventRef> {
        self.birth_ref_index
            .and_then(|index| self.event_ref_list.get(index as usize))
    }

    /// The death event reference, if recorded.
    #[must_use]
    pub fn death_ref(&self) -> Option<&EventRef> {
        self.death_ref_index
            .and_then(|index| self.event_ref_list.get(index as usize))
    }
}

impl PrimaryObject for Person {
    const CLASS: ObjectClass = ObjectClass::Person;

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
        visit_handles(&self.family_list, ObjectClass::Family, visit);
        visit_handles(&self.parent_family_list, ObjectClass::Family, visit);
        visit_entries(&self.event_ref_list, ObjectClass::Event, visit);
        visit_entries(&self.media_list, ObjectClass::Media, visit);
        visit_handles(&self.citation_list, ObjectClass::Citation, visit);
        visit_handles(&self.note_list, ObjectClass::Note, visit);
        visit_entries(&self.person_ref_list, ObjectClass::Person, visit);
    }

    fn encode_references(&self, enc: &mut CanonicalEncoder) {
        enc.array(7);
        self.family_list.encode_cbor(enc);
        self.parent_family_list.encode_cbor(enc);
        self.event_ref_list.encode_cbor(enc);
        self.media_list.encode_cbor(enc);
        self.citation_list.encode_cbor(enc);
        self.note_list.encode_cbor(enc);
        self.person_ref_list.encode_cbor(enc);
    }

    fn encode_scalars(&self, enc: &mut CanonicalEncoder) {
        enc.array(8);
        self.gender.encode_cbor(enc);
        self.primary_name.encode_cbor(enc);
        self.alternate_names.encode_cbor(enc);
        self.birth_ref_index.encode_cbor(enc);
        self.death_ref_index.encode_cbor(enc);
        self.attributes.encode_cbor(enc);
        encode_common(enc, self.change, self.private);
    }

    fn decode_body(handle: Handle, id: String, dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_len(dec, "person references", 7)?;
        let family_list = Vec::decode_cbor(dec)?;
        let parent_family_list = Vec::decode_cbor(dec)?;
        let event_ref_list = Vec::decode_cbor(dec)?;
        let media_list = Vec::decode_cbor(dec)?;
        let citation_list = Vec::decode_cbor(dec)?;
        let note_list = Vec::decode_cbor(dec)?;
        let person_ref_list = Vec::decode_cbor(dec)?;

        expect_len(dec, "person scalars", 8)?;
        let gender = Gender::decode_cbor(dec)?;
        let primary_name = Name::decode_cbor(dec)?;
        let alternate_names = Vec::decode_cbor(dec)?;
        let birth_ref_index = Option::decode_cbor(dec)?;
        let death_ref_index = Option::decode_cbor(dec)?;
        let attributes = Vec::decode_cbor(dec)?;
        let (change, private) = decode_common(dec)?;

        Ok(Self {
            handle,
            id,
            gender,
            primary_name,
            alternate_names,
            family_list,
            parent_family_list,
            event_ref_list,
            birth_ref_index,
            death_ref_index,
            media_list,
            citation_list,
            note_list,
            person_ref_list,
            attributes,
            change,
            private,
        })
    }

    fn into_record(self) -> Record {
        Record::Person(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Person(person) => Some(person),
            _ => None,
        }
    }
}
