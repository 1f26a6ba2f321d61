//! Sources, citations and repositories.

use super::codec::{decode_common, encode_common, expect_len, visit_entries, visit_handles};
use super::refs::{MediaRef, RepoRef};
use super::{now_secs, PrimaryObject, Record};
use crate::handle::Handle;
use crate::types::ObjectClass;
use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CborDecode, CborEncode, CodecError, CodecResult};
use serde::{Deserialize, Serialize};

/// A document or publication that evidence is drawn from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Storage key.
    pub handle: Handle,
    /// Human-readable ID, e.g. "S0001".
    pub id: String,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Publication facts.
    pub pubinfo: String,
    /// Short title.
    pub abbrev: String,
    /// Repositories holding the source.
    pub repo_ref_list: Vec<RepoRef>,
    /// Attached media.
    pub media_list: Vec<MediaRef>,
    /// Attached notes.
    pub note_list: Vec<Handle>,
    /// Last change, seconds since the Unix epoch.
    pub change: i64,
    /// Hidden from public reports.
    pub private: bool,
}

impl Source {
    /// Creates a source with a fresh handle.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            handle: Handle::new(),
            title: title.into(),
            change: now_secs(),
            ..Self::default()
        }
    }
}

impl PrimaryObject for Source {
    const CLASS: ObjectClass = ObjectClass::Source;

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
        visit_entries(&self.repo_ref_list, ObjectClass::Repository, visit);
        visit_entries(&self.media_list, ObjectClass::Media, visit);
        visit_handles(&self.note_list, ObjectClass::Note, visit);
    }

    fn encode_references(&self, enc: &mut CanonicalEncoder) {
        enc.array(3);
        self.repo_ref_list.encode_cbor(enc);
        self.media_list.encode_cbor(enc);
        self.note_list.encode_cbor(enc);
    }

    fn encode_scalars(&self, enc: &mut CanonicalEncoder) {
        enc.array(6)
            .text(&self.title)
            .text(&self.author)
            .text(&self.pubinfo)
            .text(&self.abbrev);
        encode_common(enc, self.change, self.private);
    }

    fn decode_body(handle: Handle, id: String, dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_len(dec, "source references", 3)?;
        let repo_ref_list = Vec::decode_cbor(dec)?;
        let media_list = Vec::decode_cbor(dec)?;
        let note_list = Vec::decode_cbor(dec)?;

        expect_len(dec, "source scalars", 6)?;
        let title = String::decode_cbor(dec)?;
        let author = String::decode_cbor(dec)?;
        let pubinfo = String::decode_cbor(dec)?;
        let abbrev = String::decode_cbor(dec)?;
        let (change, private) = decode_common(dec)?;

        Ok(Self {
            handle,
            id,
            title,
            author,
            pubinfo,
            abbrev,
            repo_ref_list,
            media_list,
            note_list,
            change,
            private,
        })
    }

    fn into_record(self) -> Record {
        Record::Source(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Source(source) => Some(source),
            _ => None,
        }
    }
}

/// A pointer into a source, e.g. a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Storage key.
    pub handle: Handle,
    /// Human-readable ID, e.g. "C0001".
    pub id: String,
    /// Location inside the source.
    pub page: String,
    /// Date of the cited entry.
    pub date: String,
    /// Confidence level, 0 (very low) to 4 (very high).
    pub confidence: u8,
    /// The cited source.
    pub source_handle: Option<Handle>,
    /// Attached media.
    pub media_list: Vec<MediaRef>,
    /// Attached notes.
    pub note_list: Vec<Handle>,
    /// Last change, seconds since the Unix epoch.
    pub change: i64,
    /// Hidden from public reports.
    pub private: bool,
}

impl Citation {
    /// Creates a citation with normal confidence and a fresh handle.
    #[must_use]
    pub fn new(page: impl Into<String>) -> Self {
        Self {
            handle: Handle::new(),
            page: page.into(),
            confidence: 2,
            change: now_secs(),
            ..Self::default()
        }
    }
}

impl PrimaryObject for Citation {
    const CLASS: ObjectClass = ObjectClass::Citation;

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
        if let Some(source) = self.source_handle {
            visit(ObjectClass::Source, source);
        }
        visit_entries(&self.media_list, ObjectClass::Media, visit);
        visit_handles(&self.note_list, ObjectClass::Note, visit);
    }

    fn encode_references(&self, enc: &mut CanonicalEncoder) {
        enc.array(3);
        self.source_handle.encode_cbor(enc);
        self.media_list.encode_cbor(enc);
        self.note_list.encode_cbor(enc);
    }

    fn encode_scalars(&self, enc: &mut CanonicalEncoder) {
        enc.array(5)
            .text(&self.page)
            .text(&self.date)
            .uint(u64::from(self.confidence));
        encode_common(enc, self.change, self.private);
    }

    fn decode_body(handle: Handle, id: String, dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_len(dec, "citation references", 3)?;
        let source_handle = Option::decode_cbor(dec)?;
        let media_list = Vec::decode_cbor(dec)?;
        let note_list = Vec::decode_cbor(dec)?;

        expect_len(dec, "citation scalars", 5)?;
        let page = String::decode_cbor(dec)?;
        let date = String::decode_cbor(dec)?;
        let offset = dec.position();
        let confidence = u8::try_from(dec.read_uint()?)
            .map_err(|_| CodecError::IntegerOverflow { offset })?;
        let (change, private) = decode_common(dec)?;

        Ok(Self {
            handle,
            id,
            page,
            date,
            confidence,
            source_handle,
            media_list,
            note_list,
            change,
            private,
        })
    }

    fn into_record(self) -> Record {
        Record::Citation(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Citation(citation) => Some(citation),
            _ => None,
        }
    }
}

/// An archive or library holding sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Storage key.
    pub handle: Handle,
    /// Human-readable ID, e.g. "R0001".
    pub id: String,
    /// Name.
    pub name: String,
    /// Kind, e.g. "Archive" or "Library".
    pub repo_type: String,
    /// Attached notes.
    pub note_list: Vec<Handle>,
    /// Last change, seconds since the Unix epoch.
    pub change: i64,
    /// Hidden from public reports.
    pub private: bool,
}

impl Repository {
    /// Creates a repository with a fresh handle.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            handle: Handle::new(),
            name: name.into(),
            change: now_secs(),
            ..Self::default()
        }
    }
}

impl PrimaryObject for Repository {
    const CLASS: ObjectClass = ObjectClass::Repository;

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
        visit_handles(&self.note_list, ObjectClass::Note, visit);
    }

    fn encode_references(&self, enc: &mut CanonicalEncoder) {
        enc.array(1);
        self.note_list.encode_cbor(enc);
    }

    fn encode_scalars(&self, enc: &mut CanonicalEncoder) {
        enc.array(4).text(&self.name).text(&self.repo_type);
        encode_common(enc, self.change, self.private);
    }

    fn decode_body(handle: Handle, id: String, dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        expect_len(dec, "repository references", 1)?;
        let note_list = Vec::decode_cbor(dec)?;

        expect_len(dec, "repository scalars", 4)?;
        let name = String::decode_cbor(dec)?;
        let repo_type = String::decode_cbor(dec)?;
        let (change, private) = decode_common(dec)?;

        Ok(Self {
            handle,
            id,
            name,
            repo_type,
            note_list,
            change,
            private,
        })
    }

    fn into_record(self) -> Record {
        Record::Repository(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Repository(repository) => Some(repository),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_confidence_roundtrip() {
        let mut citation = Citation::new("fol. 12r");
        citation.confidence = 4;
        citation.source_handle = Some(Handle::new());
        assert_eq!(Citation::decode(&citation.encode()).unwrap(), citation);
    }

    #[test]
    fn source_and_repository_roundtrip() {
        let repository = Repository::new("Riksarkivet");
        let mut source = Source::new("Husförhörslängd");
        source.repo_ref_list.push(RepoRef {
            handle: repository.handle,
            call_number: "AI:12".into(),
            media_type: "Book".into(),
        });
        assert_eq!(Source::decode(&source.encode()).unwrap(), source);
        assert_eq!(Repository::decode(&repository.encode()).unwrap(), repository);
        assert!(source.references().contains(&repository.handle));
    }
}
