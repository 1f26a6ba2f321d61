//! Person name indexes.
//!
//! The surname index and the gender statistics are derived from person
//! payloads and change in the same engine transaction as the person table,
//! so commits, undo and redo keep them exact. Name groups are user settings
//! and are written outside the undo history.

use crate::error::{CoreError, CoreResult};
use crate::handle::Handle;
use crate::kv::{KvEngine, KvTxn};
use crate::model::{Gender, Person, PrimaryObject};
use crate::schema::{decode_handle_key, GENDER_STATS, NAME_GROUP, SURNAMES};
use kindb_storage::StorageError;
use serde::Serialize;
use std::collections::BTreeMap;

/// How often a first name was recorded with each gender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenderCounts {
    /// People recorded as female.
    pub female: u64,
    /// People recorded as male.
    pub male: u64,
    /// People of unknown gender.
    pub unknown: u64,
}

impl GenderCounts {
    /// The gender a new person with this first name most likely has.
    ///
    /// A name seen only with one gender and never as unknown yields that
    /// gender. Otherwise one gender must outweigh the other plus twice the
    /// unknown count.
    #[must_use]
    pub fn guess(&self) -> Gender {
        if self.unknown == 0 {
            if self.male > 0 && self.female == 0 {
                return Gender::Male;
            }
            if self.female > 0 && self.male == 0 {
                return Gender::Female;
            }
        }
        if self.male > 2 * self.unknown + self.female {
            Gender::Male
        } else if self.female > 2 * self.unknown + self.male {
            Gender::Female
        } else {
            Gender::Unknown
        }
    }

    fn is_empty(&self) -> bool {
        self.female == 0 && self.male == 0 && self.unknown == 0
    }

    fn slot(&mut self, gender: Gender) -> &mut u64 {
        match gender {
            Gender::Female => &mut self.female,
            Gender::Male => &mut self.male,
            Gender::Unknown => &mut self.unknown,
        }
    }

    fn encode(&self) -> [u8; 24] {
        let mut bytes = [0u8; 24];
        bytes[..8].copy_from_slice(&self.female.to_be_bytes());
        bytes[8..16].copy_from_slice(&self.male.to_be_bytes());
        bytes[16..].copy_from_slice(&self.unknown.to_be_bytes());
        bytes
    }

    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != 24 {
            return Err(corrupted(format!(
                "gender statistics entry of {} bytes",
                bytes.len()
            )));
        }
        let word = |at: usize| {
            let mut array = [0u8; 8];
            array.copy_from_slice(&bytes[at..at + 8]);
            u64::from_be_bytes(array)
        };
        Ok(Self {
            female: word(0),
            male: word(8),
            unknown: word(16),
        })
    }
}

/// Key under which a person is counted in the gender statistics.
fn first_name(person: &Person) -> Option<&str> {
    person.primary_name.given.split_whitespace().next()
}

fn surname(person: &Person) -> Option<&str> {
    Some(person.primary_name.surname.as_str()).filter(|name| !name.is_empty())
}

/// Moves one person's index entries from its old payload to its new one.
pub(crate) fn apply_person_change(
    kv: &mut KvTxn<'_>,
    handle: Handle,
    old: Option<&[u8]>,
    new: Option<&[u8]>,
) -> CoreResult<()> {
    let old = old.map(Person::decode).transpose()?;
    let new = new.map(Person::decode).transpose()?;

    let old_surname = old.as_ref().and_then(surname);
    let new_surname = new.as_ref().and_then(surname);
    if old_surname != new_surname {
        if let Some(name) = old_surname {
            kv.delete_dup(SURNAMES, name.as_bytes(), handle.as_bytes())?;
        }
        if let Some(name) = new_surname {
            kv.put_dup(SURNAMES, name.as_bytes(), handle.as_bytes())?;
        }
    }

    let old_key = old.as_ref().and_then(|p| first_name(p).map(|name| (name, p.gender)));
    let new_key = new.as_ref().and_then(|p| first_name(p).map(|name| (name, p.gender)));
    if old_key != new_key {
        if let Some((name, gender)) = old_key {
            adjust_gender(kv, name, gender, false)?;
        }
        if let Some((name, gender)) = new_key {
            adjust_gender(kv, name, gender, true)?;
        }
    }
    Ok(())
}

fn adjust_gender(kv: &mut KvTxn<'_>, name: &str, gender: Gender, count: bool) -> CoreResult<()> {
    let mut counts = match kv.get(GENDER_STATS, name.as_bytes())? {
        Some(bytes) => GenderCounts::decode(&bytes)?,
        None => GenderCounts::default(),
    };
    let slot = counts.slot(gender);
    *slot = if count {
        slot.saturating_add(1)
    } else {
        slot.saturating_sub(1)
    };
    if counts.is_empty() {
        kv.delete(GENDER_STATS, name.as_bytes())
    } else {
        kv.put(GENDER_STATS, name.as_bytes(), &counts.encode())
    }
}

/// Gender counts recorded for a first name.
pub(crate) fn gender_counts(engine: &KvEngine, first_name: &str) -> CoreResult<GenderCounts> {
    match engine.get(GENDER_STATS, first_name.as_bytes())? {
        Some(bytes) => GenderCounts::decode(&bytes),
        None => Ok(GenderCounts::default()),
    }
}

/// Distinct primary surnames of all people, in byte order.
pub(crate) fn surnames(engine: &KvEngine) -> CoreResult<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for (key, _) in engine.cursor(SURNAMES)? {
        let name = decode_text(key)?;
        if names.last() != Some(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

/// People whose primary surname is `surname`.
pub(crate) fn people_with_surname(engine: &KvEngine, surname: &str) -> CoreResult<Vec<Handle>> {
    engine
        .get_dups(SURNAMES, surname.as_bytes())?
        .iter()
        .map(|value| decode_handle_key(value))
        .collect()
}

/// Maps `surname` to `group`, or removes its mapping.
pub(crate) fn set_name_group(
    kv: &mut KvTxn<'_>,
    surname: &str,
    group: Option<&str>,
) -> CoreResult<()> {
    match group {
        Some(group) => kv.put(NAME_GROUP, surname.as_bytes(), group.as_bytes()),
        None => kv.delete(NAME_GROUP, surname.as_bytes()),
    }
}

/// The group `surname` is mapped to, if any.
pub(crate) fn name_group(engine: &KvEngine, surname: &str) -> CoreResult<Option<String>> {
    engine
        .get(NAME_GROUP, surname.as_bytes())?
        .map(decode_text)
        .transpose()
}

/// Every surname mapping.
pub(crate) fn name_groups(engine: &KvEngine) -> CoreResult<BTreeMap<String, String>> {
    let mut groups = BTreeMap::new();
    for (key, value) in engine.cursor(NAME_GROUP)? {
        groups.insert(decode_text(key)?, decode_text(value)?);
    }
    Ok(groups)
}

fn decode_text(bytes: Vec<u8>) -> CoreResult<String> {
    String::from_utf8(bytes).map_err(|err| corrupted(format!("name index key: {err}")))
}

fn corrupted(message: String) -> CoreError {
    CoreError::Storage(StorageError::corrupted(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::EngineOptions;
    use crate::schema::table_specs;
    use kindb_storage::InMemoryBackend;

    fn engine() -> KvEngine {
        KvEngine::open(
            Box::new(InMemoryBackend::new()),
            &table_specs(),
            EngineOptions::default(),
        )
        .unwrap()
    }

    fn write(engine: &KvEngine, handle: Handle, old: Option<&Person>, new: Option<&Person>) {
        let mut kv = engine.begin_txn().unwrap();
        let old = old.map(|person| person.encode());
        let new = new.map(|person| person.encode());
        apply_person_change(&mut kv, handle, old.as_deref(), new.as_deref()).unwrap();
        kv.commit().unwrap();
    }

    #[test]
    fn surname_index_follows_renames() {
        let engine = engine();
        let anna = Person::new("Anna Maria", "Berg");
        let mut olof = Person::new("Olof", "Berg");
        write(&engine, anna.handle, None, Some(&anna));
        write(&engine, olof.handle, None, Some(&olof));

        assert_eq!(surnames(&engine).unwrap(), vec!["Berg".to_string()]);
        let mut expected = vec![anna.handle, olof.handle];
        expected.sort_unstable();
        assert_eq!(people_with_surname(&engine, "Berg").unwrap(), expected);

        let before = olof.clone();
        olof.primary_name.surname = "Ek".to_string();
        write(&engine, olof.handle, Some(&before), Some(&olof));
        assert_eq!(surnames(&engine).unwrap(), vec!["Berg", "Ek"]);
        assert_eq!(people_with_surname(&engine, "Berg").unwrap(), vec![anna.handle]);

        write(&engine, anna.handle, Some(&anna), None);
        assert_eq!(surnames(&engine).unwrap(), vec!["Ek"]);
    }

    #[test]
    fn empty_surnames_are_not_indexed() {
        let engine = engine();
        let nameless = Person::new("Kim", "");
        write(&engine, nameless.handle, None, Some(&nameless));
        assert!(surnames(&engine).unwrap().is_empty());
    }

    #[test]
    fn gender_counts_track_first_given_name() {
        let engine = engine();
        let mut anna = Person::new("Anna Maria", "Berg");
        anna.gender = Gender::Female;
        let mut other = Person::new("Anna", "Ek");
        other.gender = Gender::Female;
        write(&engine, anna.handle, None, Some(&anna));
        write(&engine, other.handle, None, Some(&other));

        let counts = gender_counts(&engine, "Anna").unwrap();
        assert_eq!(counts.female, 2);
        assert_eq!(counts.guess(), Gender::Female);

        let before = other.clone();
        other.gender = Gender::Unknown;
        write(&engine, other.handle, Some(&before), Some(&other));
        let counts = gender_counts(&engine, "Anna").unwrap();
        assert_eq!((counts.female, counts.unknown), (1, 1));
        assert_eq!(counts.guess(), Gender::Unknown);

        write(&engine, anna.handle, Some(&anna), None);
        write(&engine, other.handle, Some(&other), None);
        assert_eq!(engine.len(GENDER_STATS).unwrap(), 0);
    }

    #[test]
    fn guess_needs_a_clear_majority() {
        let counts = GenderCounts {
            female: 1,
            male: 4,
            unknown: 1,
        };
        assert_eq!(counts.guess(), Gender::Male);
        let counts = GenderCounts {
            female: 2,
            male: 4,
            unknown: 1,
        };
        assert_eq!(counts.guess(), Gender::Unknown);
        assert_eq!(GenderCounts::default().guess(), Gender::Unknown);
    }

    #[test]
    fn name_groups_set_and_clear() {
        let engine = engine();
        let mut kv = engine.begin_txn().unwrap();
        set_name_group(&mut kv, "Bergh", Some("Berg")).unwrap();
        set_name_group(&mut kv, "Berg", Some("Berg")).unwrap();
        kv.commit().unwrap();
        assert_eq!(name_group(&engine, "Bergh").unwrap().as_deref(), Some("Berg"));
        assert_eq!(name_groups(&engine).unwrap().len(), 2);

        let mut kv = engine.begin_txn().unwrap();
        set_name_group(&mut kv, "Bergh", None).unwrap();
        kv.commit().unwrap();
        assert_eq!(name_group(&engine, "Bergh").unwrap(), None);
    }
}
