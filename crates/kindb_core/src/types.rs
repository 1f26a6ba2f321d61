//! Core type definitions for kindb.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a committed transaction.
///
/// Transaction IDs are monotonically increasing and never reused. Undo and
/// redo operations receive fresh IDs of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following transaction ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// The nine primary object classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    /// An individual.
    Person,
    /// A couple and their children.
    Family,
    /// Something that happened at a time and place.
    Event,
    /// A location, possibly enclosed by other places.
    Place,
    /// A source of information.
    Source,
    /// A specific reference into a source.
    Citation,
    /// Where sources are held.
    Repository,
    /// An image or other file.
    Media,
    /// Free text.
    Note,
}

impl ObjectClass {
    /// All classes in storage order.
    pub const ALL: [ObjectClass; 9] = [
        ObjectClass::Person,
        ObjectClass::Family,
        ObjectClass::Event,
        ObjectClass::Place,
        ObjectClass::Source,
        ObjectClass::Citation,
        ObjectClass::Repository,
        ObjectClass::Media,
        ObjectClass::Note,
    ];

    /// Stable one-byte code used in persisted reference and undo entries.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            ObjectClass::Person => 0,
            ObjectClass::Family => 1,
            ObjectClass::Event => 2,
            ObjectClass::Place => 3,
            ObjectClass::Source => 4,
            ObjectClass::Citation => 5,
            ObjectClass::Repository => 6,
            ObjectClass::Media => 7,
            ObjectClass::Note => 8,
        }
    }

    /// Reverses [`ObjectClass::code`].
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ObjectClass::Person),
            1 => Some(ObjectClass::Family),
            2 => Some(ObjectClass::Event),
            3 => Some(ObjectClass::Place),
            4 => Some(ObjectClass::Source),
            5 => Some(ObjectClass::Citation),
            6 => Some(ObjectClass::Repository),
            7 => Some(ObjectClass::Media),
            8 => Some(ObjectClass::Note),
            _ => None,
        }
    }

    /// Lower-case class name; also the name of the primary table.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Family => "family",
            ObjectClass::Event => "event",
            ObjectClass::Place => "place",
            ObjectClass::Source => "source",
            ObjectClass::Citation => "citation",
            ObjectClass::Repository => "repository",
            ObjectClass::Media => "media",
            ObjectClass::Note => "note",
        }
    }

    /// Name of the ID -> handle table.
    #[must_use]
    pub const fn id_table(self) -> &'static str {
        match self {
            ObjectClass::Person => "person_id",
            ObjectClass::Family => "family_id",
            ObjectClass::Event => "event_id",
            ObjectClass::Place => "place_id",
            ObjectClass::Source => "source_id",
            ObjectClass::Citation => "citation_id",
            ObjectClass::Repository => "repository_id",
            ObjectClass::Media => "media_id",
            ObjectClass::Note => "note_id",
        }
    }

    /// Default human-readable ID template.
    #[must_use]
    pub const fn default_id_prefix(self) -> &'static str {
        match self {
            ObjectClass::Person => "I%04d",
            ObjectClass::Family => "F%04d",
            ObjectClass::Event => "E%04d",
            ObjectClass::Place => "P%04d",
            ObjectClass::Source => "S%04d",
            ObjectClass::Citation => "C%04d",
            ObjectClass::Repository => "R%04d",
            ObjectClass::Media => "O%04d",
            ObjectClass::Note => "N%04d",
        }
    }

    /// Index of this class in [`ObjectClass::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self.code() as usize
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObjectClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        ObjectClass::ALL
            .into_iter()
            .find(|class| class.name() == lower)
            .ok_or_else(|| format!("unknown object class: {s}"))
    }
}

/// Kind of change applied to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    /// The object was created.
    Add,
    /// The object was replaced.
    Update,
    /// The object was removed.
    Delete,
}

impl ChangeOp {
    pub(crate) const fn code(self) -> u8 {
        match self {
            ChangeOp::Add => 0,
            ChangeOp::Update => 1,
            ChangeOp::Delete => 2,
        }
    }

    pub(crate) const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ChangeOp::Add),
            1 => Some(ChangeOp::Update),
            2 => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeOp::Add => "add",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
        })
    }
}
