//! Genealogy record model.
//!
//! Nine primary object classes, each addressed by a [`Handle`] and carrying
//! a class-scoped human-readable ID. Reference fields point at other
//! objects' handles and form the graph the reference map inverts.

mod codec;
mod event;
mod family;
mod media;
mod person;
mod place;
mod refs;
mod source;

pub use codec::{
    decode_object, encode_object, extract_references, peek_header, record_tag,
    reference_layout, RecordHeader, RefField, RefKind, References, Target, RECORD_TAG_BASE,
    SCHEMA_VERSION,
};
pub use event::Event;
pub use family::Family;
pub use media::{Media, Note};
pub use person::Person;
pub use place::Place;
pub use refs::{ChildRef, EventRef, Gender, MediaRef, Name, PersonRef, PlaceRef, RefEntry, RepoRef};
pub use source::{Citation, Repository, Source};

use crate::error::CoreResult;
use crate::handle::Handle;
use crate::types::ObjectClass;
use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CodecResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Trait for the nine record structs stored by the database.
///
/// Implementors write their reference fields in the fixed order given by
/// [`reference_layout`] for their class, so that [`extract_references`]
/// can read them without decoding scalar fields.
///
/// # Example
///
/// ```rust
/// use kindb_core::model::{Family, Person, PrimaryObject};
///
/// let father = Person::new("Anna", "Berg");
/// let mut family = Family::new();
/// family.father_handle = Some(father.handle);
///
/// assert!(family.references().contains(&father.handle));
/// let bytes = family.encode();
/// assert_eq!(Family::decode(&bytes).unwrap(), family);
/// ```
pub trait PrimaryObject: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// The class this type stores.
    const CLASS: ObjectClass;

    /// Returns the object's handle.
    fn handle(&self) -> Handle;

    /// Returns the object's human-readable ID. Empty until assigned.
    fn id(&self) -> &str;

    /// Replaces the human-readable ID.
    fn set_id(&mut self, id: String);

    /// Calls `visit` for every referenced handle, in layout order.
    fn visit_references(&self, visit: &mut dyn FnMut(ObjectClass, Handle));

    /// Writes the reference section.
    fn encode_references(&self, enc: &mut CanonicalEncoder);

    /// Writes the scalar section.
    fn encode_scalars(&self, enc: &mut CanonicalEncoder);

    /// Reads the reference and scalar sections that follow the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the sections are malformed.
    fn decode_body(handle: Handle, id: String, dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self>;

    /// Wraps the object in a [`Record`].
    fn into_record(self) -> Record;

    /// Unwraps a [`Record`] of this class.
    fn from_record(record: Record) -> Option<Self>;

    /// The set of handles this object references.
    fn references(&self) -> BTreeSet<Handle> {
        let mut handles = BTreeSet::new();
        self.visit_references(&mut |_, handle| {
            handles.insert(handle);
        });
        handles
    }

    /// Encodes the object as a stored payload.
    fn encode(&self) -> Vec<u8> {
        encode_object(self)
    }

    /// Decodes a stored payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::CorruptRecord`] if the bytes are not a
    /// valid payload of this class.
    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        decode_object(bytes)
    }
}

/// A primary object of any class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "lowercase")]
pub enum Record {
    /// A person.
    Person(Person),
    /// A family.
    Family(Family),
    /// An event.
    Event(Event),
    /// A place.
    Place(Place),
    /// A source.
    Source(Source),
    /// A citation.
    Citation(Citation),
    /// A repository.
    Repository(Repository),
    /// A media object.
    Media(Media),
    /// A note.
    Note(Note),
}

impl Record {
    /// Returns the record's class.
    #[must_use]
    pub fn class(&self) -> ObjectClass {
        match self {
            Record::Person(_) => ObjectClass::Person,
            Record::Family(_) => ObjectClass::Family,
            Record::Event(_) => ObjectClass::Event,
            Record::Place(_) => ObjectClass::Place,
            Record::Source(_) => ObjectClass::Source,
            Record::Citation(_) => ObjectClass::Citation,
            Record::Repository(_) => ObjectClass::Repository,
            Record::Media(_) => ObjectClass::Media,
            Record::Note(_) => ObjectClass::Note,
        }
    }

    /// Returns the record's handle.
    #[must_use]
    pub fn handle(&self) -> Handle {
        match self {
            Record::Person(o) => o.handle,
            Record::Family(o) => o.handle,
            Record::Event(o) => o.handle,
            Record::Place(o) => o.handle,
            Record::Source(o) => o.handle,
            Record::Citation(o) => o.handle,
            Record::Repository(o) => o.handle,
            Record::Media(o) => o.handle,
            Record::Note(o) => o.handle,
        }
    }

    /// Returns the record's human-readable ID.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Record::Person(o) => &o.id,
            Record::Family(o) => &o.id,
            Record::Event(o) => &o.id,
            Record::Place(o) => &o.id,
            Record::Source(o) => &o.id,
            Record::Citation(o) => &o.id,
            Record::Repository(o) => &o.id,
            Record::Media(o) => &o.id,
            Record::Note(o) => &o.id,
        }
    }

    /// Replaces the record's human-readable ID.
    pub fn set_id(&mut self, id: String) {
        match self {
            Record::Person(o) => o.id = id,
            Record::Family(o) => o.id = id,
            Record::Event(o) => o.id = id,
            Record::Place(o) => o.id = id,
            Record::Source(o) => o.id = id,
            Record::Citation(o) => o.id = id,
            Record::Repository(o) => o.id = id,
            Record::Media(o) => o.id = id,
            Record::Note(o) => o.id = id,
        }
    }

    /// The set of handles the record references.
    #[must_use]
    pub fn references(&self) -> BTreeSet<Handle> {
        match self {
            Record::Person(o) => o.references(),
            Record::Family(o) => o.references(),
            Record::Event(o) => o.references(),
            Record::Place(o) => o.references(),
            Record::Source(o) => o.references(),
            Record::Citation(o) => o.references(),
            Record::Repository(o) => o.references(),
            Record::Media(o) => o.references(),
            Record::Note(o) => o.references(),
        }
    }

    /// Encodes the record as a stored payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Record::Person(o) => encode_object(o),
            Record::Family(o) => encode_object(o),
            Record::Event(o) => encode_object(o),
            Record::Place(o) => encode_object(o),
            Record::Source(o) => encode_object(o),
            Record::Citation(o) => encode_object(o),
            Record::Repository(o) => encode_object(o),
            Record::Media(o) => encode_object(o),
            Record::Note(o) => encode_object(o),
        }
    }

    /// Decodes a stored payload of the given class.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::CorruptRecord`] on malformed bytes.
    pub fn decode(class: ObjectClass, bytes: &[u8]) -> CoreResult<Self> {
        Ok(match class {
            ObjectClass::Person => Record::Person(decode_object(bytes)?),
            ObjectClass::Family => Record::Family(decode_object(bytes)?),
            ObjectClass::Event => Record::Event(decode_object(bytes)?),
            ObjectClass::Place => Record::Place(decode_object(bytes)?),
            ObjectClass::Source => Record::Source(decode_object(bytes)?),
            ObjectClass::Citation => Record::Citation(decode_object(bytes)?),
            ObjectClass::Repository => Record::Repository(decode_object(bytes)?),
            ObjectClass::Media => Record::Media(decode_object(bytes)?),
            ObjectClass::Note => Record::Note(decode_object(bytes)?),
        })
    }
}

macro_rules! impl_from_object {
    ($($ty:ident),*) => {
        $(
            impl From<$ty> for Record {
                fn from(object: $ty) -> Self {
                    Record::$ty(object)
                }
            }
        )*
    };
}

impl_from_object!(Person, Family, Event, Place, Source, Citation, Repository, Media, Note);

/// Current wall-clock time in seconds since the Unix epoch.
pub(crate) fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accessors_follow_the_variant() {
        let mut record = Record::from(Note::new("Born at sea."));
        assert_eq!(record.class(), ObjectClass::Note);
        assert_eq!(record.id(), "");
        record.set_id("N0007".to_string());
        assert_eq!(record.id(), "N0007");

        let decoded = Record::decode(ObjectClass::Note, &record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn decode_with_wrong_class_is_corrupt() {
        let person = Person::new("Jon", "Berg");
        let err = Record::decode(ObjectClass::Family, &person.encode()).unwrap_err();
        assert!(err.is_skippable());
    }

    #[test]
    fn serde_tags_records_by_class() {
        let record = Record::from(Repository::new("State Archive"));
        let text = serde_json::to_string(&record).unwrap();
        assert!(text.contains("\"class\":\"repository\""));
    }
}
