//! Stored payload format.
//!
//! ```text
//! tag(RECORD_TAG_BASE + class code) [
//!     schema_version,
//!     handle,              ; 16-byte string
//!     id,                  ; text
//!     [reference fields],  ; fixed per-class layout
//!     [scalar fields],
//! ]
//! ```
//!
//! Reference fields come before scalars so that [`extract_references`] can
//! stop reading once it has them.

use super::PrimaryObject;
use crate::error::{CoreError, CoreResult};
use crate::handle::Handle;
use crate::types::ObjectClass;
use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CborDecode, CborEncode, CodecError, CodecResult};
use std::collections::BTreeSet;

/// First CBOR tag number used for record payloads.
pub const RECORD_TAG_BASE: u64 = 41_000;

/// Schema version written into every payload.
pub const SCHEMA_VERSION: u64 = 1;

const HEADER_FIELDS: usize = 5;

/// Returns the CBOR tag that wraps payloads of `class`.
#[must_use]
pub fn record_tag(class: ObjectClass) -> u64 {
    RECORD_TAG_BASE + u64::from(class.code())
}

/// Shape of one reference field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// A single handle or null.
    Optional,
    /// An array of handles.
    List,
    /// An array of arrays, each starting with a handle.
    StructList,
}

/// One reference field of a class layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefField {
    /// Field name.
    pub name: &'static str,
    /// Field shape.
    pub kind: RefKind,
    /// Class of the referenced objects.
    pub target: ObjectClass,
}

const fn field(name: &'static str, kind: RefKind, target: ObjectClass) -> RefField {
    RefField { name, kind, target }
}

use ObjectClass as C;
use RefKind::{List, Optional, StructList};

const PERSON_REFS: &[RefField] = &[
    field("family_list", List, C::Family),
    field("parent_family_list", List, C::Family),
    field("event_ref_list", StructList, C::Event),
    field("media_list", StructList, C::Media),
    field("citation_list", List, C::Citation),
    field("note_list", List, C::Note),
    field("person_ref_list", StructList, C::Person),
];

const FAMILY_REFS: &[RefField] = &[
    field("father_handle", Optional, C::Person),
    field("mother_handle", Optional, C::Person),
    field("child_ref_list", StructList, C::Person),
    field("event_ref_list", StructList, C::Event),
    field("media_list", StructList, C::Media),
    field("citation_list", List, C::Citation),
    field("note_list", List, C::Note),
];

const EVENT_REFS: &[RefField] = &[
    field("place", Optional, C::Place),
    field("media_list", StructList, C::Media),
    field("citation_list", List, C::Citation),
    field("note_list", List, C::Note),
];

const PLACE_REFS: &[RefField] = &[
    field("enclosed_by", StructList, C::Place),
    field("media_list", StructList, C::Media),
    field("citation_list", List, C::Citation),
    field("note_list", List, C::Note),
];

const SOURCE_REFS: &[RefField] = &[
    field("repo_ref_list", StructList, C::Repository),
    field("media_list", StructList, C::Media),
    field("note_list", List, C::Note),
];

const CITATION_REFS: &[RefField] = &[
    field("source_handle", Optional, C::Source),
    field("media_list", StructList, C::Media),
    field("note_list", List, C::Note),
];

const REPOSITORY_REFS: &[RefField] = &[field("note_list", List, C::Note)];

const MEDIA_REFS: &[RefField] = &[
    field("citation_list", List, C::Citation),
    field("note_list", List, C::Note),
];

const NOTE_REFS: &[RefField] = &[];

/// The reference fields of `class`, in stored order.
#[must_use]
pub fn reference_layout(class: ObjectClass) -> &'static [RefField] {
    match class {
        C::Person => PERSON_REFS,
        C::Family => FAMILY_REFS,
        C::Event => EVENT_REFS,
        C::Place => PLACE_REFS,
        C::Source => SOURCE_REFS,
        C::Citation => CITATION_REFS,
        C::Repository => REPOSITORY_REFS,
        C::Media => MEDIA_REFS,
        C::Note => NOTE_REFS,
    }
}

/// Handle and ID read from the front of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Class of the payload.
    pub class: ObjectClass,
    /// The object's handle.
    pub handle: Handle,
    /// The object's ID.
    pub id: String,
}

/// One referenced handle and the class its field points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Target {
    /// Class named by the reference field.
    pub class: ObjectClass,
    /// Referenced handle.
    pub handle: Handle,
}

/// Outbound references of one stored payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct References {
    /// Handle of the referencing object.
    pub owner: Handle,
    /// Every reference in layout order, repeats included.
    pub targets: Vec<Target>,
}

impl References {
    /// Distinct referenced handles.
    #[must_use]
    pub fn handles(&self) -> BTreeSet<Handle> {
        self.targets.iter().map(|target| target.handle).collect()
    }
}

/// Encodes an object as a stored payload.
pub fn encode_object<T: PrimaryObject>(object: &T) -> Vec<u8> {
    let mut enc = CanonicalEncoder::with_capacity(128);
    enc.tag(record_tag(T::CLASS))
        .array(HEADER_FIELDS)
        .uint(SCHEMA_VERSION);
    object.handle().encode_cbor(&mut enc);
    enc.text(object.id());
    object.encode_references(&mut enc);
    object.encode_scalars(&mut enc);
    enc.into_bytes()
}

/// Decodes a stored payload into an object.
///
/// # Errors
///
/// Returns [`CoreError::CorruptRecord`] naming the class and, when the
/// header could be read, the handle.
pub fn decode_object<T: PrimaryObject>(bytes: &[u8]) -> CoreResult<T> {
    with_header(T::CLASS, bytes, |handle, id, dec| {
        let object = T::decode_body(handle, id.to_string(), dec)?;
        dec.finish()?;
        Ok(object)
    })
}

/// Reads only the header of a payload.
pub fn peek_header(class: ObjectClass, bytes: &[u8]) -> CoreResult<RecordHeader> {
    with_header(class, bytes, |handle, id, _| {
        Ok(RecordHeader {
            class,
            handle,
            id: id.to_string(),
        })
    })
}

/// Reads the header and the reference section of a payload without
/// decoding any scalar field.
///
/// # Errors
///
/// Returns [`CoreError::CorruptRecord`] if the header or reference section
/// is malformed.
pub fn extract_references(class: ObjectClass, bytes: &[u8]) -> CoreResult<References> {
    with_header(class, bytes, |owner, _, dec| {
        let layout = reference_layout(class);
        expect_len(dec, "reference section", layout.len())?;

        let mut targets = Vec::new();
        for field in layout {
            let mut push = |handle| {
                targets.push(Target {
                    class: field.target,
                    handle,
                });
            };
            match field.kind {
                RefKind::Optional => {
                    if dec.peek_is_null() {
                        dec.read_null()?;
                    } else {
                        push(Handle::decode_cbor(dec)?);
                    }
                }
                RefKind::List => {
                    for _ in 0..dec.read_array_len()? {
                        push(Handle::decode_cbor(dec)?);
                    }
                }
                RefKind::StructList => {
                    for _ in 0..dec.read_array_len()? {
                        let fields = dec.read_array_len()?;
                        if fields == 0 {
                            return Err(CodecError::invalid_structure(format!(
                                "empty entry in {}",
                                field.name
                            )));
                        }
                        push(Handle::decode_cbor(dec)?);
                        for _ in 1..fields {
                            dec.skip()?;
                        }
                    }
                }
            }
        }
        Ok(References { owner, targets })
    })
}

fn with_header<R>(
    class: ObjectClass,
    bytes: &[u8],
    body: impl FnOnce(Handle, &str, &mut CanonicalDecoder<'_>) -> CodecResult<R>,
) -> CoreResult<R> {
    let mut dec = CanonicalDecoder::new(bytes);
    let (handle, id) = read_header(class, &mut dec)
        .map_err(|err| CoreError::corrupt_record(class, None, err.to_string()))?;
    body(handle, id, &mut dec)
        .map_err(|err| CoreError::corrupt_record(class, Some(handle), err.to_string()))
}

fn read_header<'a>(
    class: ObjectClass,
    dec: &mut CanonicalDecoder<'a>,
) -> CodecResult<(Handle, &'a str)> {
    let tag = dec.read_tag()?;
    if tag != record_tag(class) {
        let found = tag
            .checked_sub(RECORD_TAG_BASE)
            .and_then(|code| u8::try_from(code).ok())
            .and_then(ObjectClass::from_code);
        return Err(CodecError::invalid_structure(match found {
            Some(other) => format!("payload belongs to class {other}"),
            None => format!("unexpected payload tag {tag}"),
        }));
    }
    expect_len(dec, "record", HEADER_FIELDS)?;
    let version = dec.read_uint()?;
    if version != SCHEMA_VERSION {
        return Err(CodecError::unsupported(format!("schema version {version}")));
    }
    let handle = Handle::decode_cbor(dec)?;
    let id = dec.read_text()?;
    Ok((handle, id))
}

/// Reads an array header and checks its length.
pub(crate) fn expect_len(
    dec: &mut CanonicalDecoder<'_>,
    what: &str,
    expected: usize,
) -> CodecResult<()> {
    let len = dec.read_array_len()?;
    if len == expected {
        Ok(())
    } else {
        Err(CodecError::invalid_structure(format!(
            "{what} must have {expected} fields, found {len}"
        )))
    }
}

/// Writes the trailing scalars every class carries.
pub(crate) fn encode_common(enc: &mut CanonicalEncoder, change: i64, private: bool) {
    enc.int(change).bool(private);
}

/// Reads the trailing scalars every class carries.
pub(crate) fn decode_common(dec: &mut CanonicalDecoder<'_>) -> CodecResult<(i64, bool)> {
    Ok((dec.read_int()?, dec.read_bool()?))
}

/// Visits the handle of every element of a reference struct list.
pub(crate) fn visit_entries<E: super::RefEntry>(
    entries: &[E],
    class: ObjectClass,
    visit: &mut dyn FnMut(ObjectClass, Handle),
) {
    for entry in entries {
        visit(class, entry.target());
    }
}

/// Visits every handle of a plain handle list.
pub(crate) fn visit_handles(
    handles: &[Handle],
    class: ObjectClass,
    visit: &mut dyn FnMut(ObjectClass, Handle),
) {
    for handle in handles {
        visit(class, *handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Citation, Event, EventRef, Family, MediaRef, Person, PersonRef, PlaceRef, Record,
        RepoRef, Source,
    };

    fn media_ref() -> MediaRef {
        MediaRef {
            handle: Handle::new(),
            region: Some([1, 2, 3, 4]),
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let person = Person::new("Karin", "Lund");
        assert_eq!(person.encode(), person.clone().encode());
    }

    #[test]
    fn header_carries_class_tag_and_version() {
        let family = Family::new();
        let bytes = family.encode();
        let header = peek_header(ObjectClass::Family, &bytes).unwrap();
        assert_eq!(header.handle, family.handle);
        assert_eq!(header.id, "");
        // tag 41001 is 0xd9 0xa0 0x29
        assert_eq!(&bytes[..3], &[0xd9, 0xa0, 0x29]);
    }

    #[test]
    fn extraction_matches_typed_references() {
        let mut person = Person::new("Per", "Holm");
        person.family_list = vec![Handle::new()];
        person.parent_family_list = vec![Handle::new(), Handle::new()];
        person.event_ref_list = vec![EventRef {
            handle: Handle::new(),
            role: "Primary".into(),
        }];
        person.media_list = vec![media_ref()];
        person.citation_list = vec![Handle::new()];
        person.note_list = vec![Handle::new()];
        person.person_ref_list = vec![PersonRef {
            handle: Handle::new(),
            relation: "Godfather".into(),
        }];

        let mut event = Event::new("Birth");
        event.place = Some(Handle::new());
        event.media_list = vec![media_ref()];

        let mut source = Source::new("Parish book");
        source.repo_ref_list = vec![RepoRef {
            handle: Handle::new(),
            call_number: "A-12".into(),
            media_type: "Book".into(),
        }];

        let mut citation = Citation::new("p. 4");
        citation.source_handle = Some(Handle::new());

        let mut place = crate::model::Place::new("Uppsala");
        place.enclosed_by = vec![PlaceRef {
            handle: Handle::new(),
            date: "1700".into(),
        }];

        for record in [
            Record::from(person),
            Record::from(event),
            Record::from(source),
            Record::from(citation),
            Record::from(place),
        ] {
            let refs = extract_references(record.class(), &record.encode()).unwrap();
            assert_eq!(refs.owner, record.handle());
            assert_eq!(refs.handles(), record.references());
            assert!(!refs.targets.is_empty());
        }
    }

    #[test]
    fn repeated_reference_is_one_handle() {
        let spouse = Handle::new();
        let mut family = Family::new();
        family.father_handle = Some(spouse);
        family.mother_handle = Some(spouse);
        let refs = extract_references(ObjectClass::Family, &family.encode()).unwrap();
        assert_eq!(refs.targets.len(), 2);
        assert_eq!(refs.handles().len(), 1);
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let note = crate::model::Note::new("x");
        let mut bytes = note.encode();
        // tag (3 bytes), array header (1 byte), then the version
        assert_eq!(bytes[4], 0x01);
        bytes[4] = 0x02;
        let err = Record::decode(ObjectClass::Note, &bytes).unwrap_err();
        match err {
            CoreError::CorruptRecord { class, handle, message } => {
                assert_eq!(class, ObjectClass::Note);
                assert_eq!(handle, None);
                assert!(message.contains("schema version 2"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn damaged_body_reports_handle() {
        let family = Family::new();
        let mut bytes = family.encode();
        bytes.truncate(bytes.len() - 1);
        let err = Family::decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            CoreError::CorruptRecord { handle: Some(h), .. } if h == family.handle
        ));
    }

    #[test]
    fn garbage_is_corrupt_not_panic() {
        for bytes in [&[][..], &[0xff][..], &[0xd9, 0xa0][..], &b"not cbor at all"[..]] {
            for class in ObjectClass::ALL {
                assert!(Record::decode(class, bytes).is_err());
                assert!(extract_references(class, bytes).is_err());
            }
        }
    }

    #[test]
    fn every_layout_targets_are_classes() {
        let total: usize = ObjectClass::ALL
            .iter()
            .map(|class| reference_layout(*class).len())
            .sum();
        assert_eq!(total, 7 + 7 + 4 + 4 + 3 + 3 + 1 + 2);
        assert!(reference_layout(ObjectClass::Note).is_empty());
    }
}
