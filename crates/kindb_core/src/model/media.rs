//! Media objects and notes.

use super::codec::{decode_common, encode_common, expect_len, visit_handles};
use super::{now_secs, PrimaryObject, Record};
use crate::handle::Handle;
use crate::types::ObjectClass;
use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CborDecode, CborEncode, CodecResult};
use serde::{Deserialize, Serialize};

/// An external file such as a scanned document or photograph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// Storage key.
    pub handle: Handle,
    /// Human-readable ID, e.g. "O0001".
    pub id: String,
    /// File path.
    pub path: String,
    /// MIME type.
    pub mime: String,
    /// Description.
    pub description: String,
    /// Date of the depicted content.
    pub date: String,
    /// Supporting citations.
    pub citation_list: Vec<Handle>,
    /// Attached notes.
    pub note_list: Vec<Handle>,
    /// Last change, seconds since the Unix epoch.
    pub change: i64,
    /// Hidden from public reports.
    pub private: bool,
}

impl Media {
    /// Creates a media object with a fresh handle.
    #[must_use]
    pub fn new(path: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            handle: Handle::new(),
            path: path.into(),
            mime: mime.into(),
            change: now_secs(),
            ..Self::default()
        }
    }
}

impl PrimaryObject for Media {
    const CLASS: ObjectClass = ObjectClass::Media;

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
        visit_handles(&self.citation_list, ObjectClass::Citation, visit);
        visit_handles(&self.note_list, ObjectClass::Note, visit);
    }

    fn encode_references(&self, enc: &mut CanonicalEncoder) {
        enc.array(2);
        self.citation_list.encode_cbor(enc);
        self.note_list.encode_cbor(enc);
    }

    fn encode_scalars(&self, enc: &mut CanonicalEncoder) {
        enc.array(6)
            .text(&self.path)
            .text(&self.mime)
            .text(&self.description)
            .text(&self.date);
        encode_common(enc, self.change, self.private);
    }

    fn decode_body(handle: Handle, id: String, dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_len(dec, "media references", 2)?;
        let citation_list = Vec::decode_cbor(dec)?;
        let note_list = Vec::decode_cbor(dec)?;

        expect_len(dec, "media scalars", 6)?;
        let path = String::decode_cbor(dec)?;
        let mime = String::decode_cbor(dec)?;
        let description = String::decode_cbor(dec)?;
        let date = String::decode_cbor(dec)?;
        let (change, private) = decode_common(dec)?;

        Ok(Self {
            handle,
            id,
            path,
            mime,
            description,
            date,
            citation_list,
            note_list,
            change,
            private,
        })
    }

    fn into_record(self) -> Record {
        Record::Media(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Media(media) => Some(media),
            _ => None,
        }
    }
}

/// Free text attached to other objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Storage key.
    pub handle: Handle,
    /// Human-readable ID, e.g. "N0001".
    pub id: String,
    /// The text.
    pub text: String,
    /// Kind, e.g. "Research".
    pub note_type: String,
    /// Whether `text` is preformatted.
    pub preformatted: bool,
    /// Last change, seconds since the Unix epoch.
    pub change: i64,
    /// Hidden from public reports.
    pub private: bool,
}

impl Note {
    /// Creates a note with a fresh handle.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            handle: Handle::new(),
            text: text.into(),
            note_type: "General".into(),
            change: now_secs(),
            ..Self::default()
        }
    }
}

impl PrimaryObject for Note {
    const CLASS: ObjectClass = ObjectClass::Note;

    fn handle(&self) -> Handle {
        self.handle
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn visit_references(&self, _visit: &mut dyn FnMut(ObjectClass, Handle)) {}

    fn encode_references(&self, enc: &mut CanonicalEncoder) {
        enc.array(0);
    }

    fn encode_scalars(&self, enc: &mut CanonicalEncoder) {
        enc.array(5)
            .text(&self.text)
            .text(&self.note_type)
            .bool(self.preformatted);
        encode_common(enc, self.change, self.private);
    }

    fn decode_body(handle: Handle, id: String, dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_len(dec, "note references", 0)?;
        expect_len(dec, "note scalars", 5)?;
        let text = String::decode_cbor(dec)?;
        let note_type = String::decode_cbor(dec)?;
        let preformatted = bool::decode_cbor(dec)?;
        let (change, private) = decode_common(dec)?;

        Ok(Self {
            handle,
            id,
            text,
            note_type,
            preformatted,
            change,
            private,
        })
    }

    fn into_record(self) -> Record {
        Record::Note(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Note(note) => Some(note),
            _ => None,
        }
    }
}
