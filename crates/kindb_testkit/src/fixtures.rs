//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases, running
//! generated workloads against them and comparing store states.

use crate::crash::{CrashControl, CrashableBackend};
use crate::generators::{HandlePool, Op, Step};
use kindb_core::model::{
    ChildRef, Citation, Event, EventRef, Family, Note, Person, Place, Record, Source,
};
use kindb_core::{
    Backlink, Config, CoreError, CoreResult, Database, Handle, InMemoryBackend, ObjectClass,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates an in-memory test database with custom configuration.
    pub fn memory_with_config(config: Config) -> Self {
        Self {
            db: Database::open_with_backend(config, Box::new(InMemoryBackend::new()))
                .expect("Failed to open in-memory database"),
            _temp_dir: None,
        }
    }

    /// Creates a new store in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("store"))
            .expect("Failed to open file database");
        Self {
            db,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("store"))
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust
/// use kindb_testkit::with_temp_db;
/// use kindb_core::ObjectClass;
///
/// with_temp_db(|db| {
///     assert_eq!(db.count(ObjectClass::Person).unwrap(), 0);
/// });
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a store in a temporary directory.
pub fn with_temp_dir<F, R>(f: F) -> R
where
    F: FnOnce(&Path) -> R,
{
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    f(temp_dir.path())
}

/// A database over a log that can be made to crash, plus what is needed to
/// reopen the log afterwards.
pub struct CrashHarness {
    /// The database writing through the crashable backend.
    pub db: Database,
    /// Switches of the crashable backend.
    pub control: Arc<CrashControl>,
    log: InMemoryBackend,
    config: Config,
}

impl CrashHarness {
    /// Opens an empty database over a crashable in-memory log.
    pub fn new(config: Config) -> Self {
        let log = InMemoryBackend::new();
        let backend = CrashableBackend::new(Box::new(log.clone()));
        let control = backend.control();
        let db = Database::open_with_backend(config.clone(), Box::new(backend))
            .expect("Failed to open crashable database");
        Self {
            db,
            control,
            log,
            config,
        }
    }

    /// Opens a second database over a copy of the log as it stands, as a
    /// restarted process would see it.
    pub fn reopen(&self) -> CoreResult<Database> {
        Database::open_with_backend(self.config.clone(), Box::new(self.log.detached()))
    }
}

/// Every observable piece of committed state, for exact comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// Raw payload per live object.
    pub records: BTreeMap<(ObjectClass, Handle), Vec<u8>>,
    /// ID index resolution of every live object's ID.
    pub ids: BTreeMap<(ObjectClass, String), Option<Handle>>,
    /// SHA-256 over the stored reference map.
    pub reference_digest: [u8; 32],
    /// Stored surname index.
    pub surnames: BTreeMap<String, BTreeSet<Handle>>,
}

impl StoreSnapshot {
    /// Reads the committed state of `db`.
    pub fn capture(db: &Database) -> CoreResult<Self> {
        let mut records = BTreeMap::new();
        let mut ids = BTreeMap::new();
        for class in ObjectClass::ALL {
            let live: Vec<(Handle, Record)> = db.cursor(class)?.collect::<CoreResult<_>>()?;
            for (handle, record) in live {
                let payload = db
                    .get_raw(class, handle)?
                    .ok_or(CoreError::NotFound { class, handle })?;
                records.insert((class, handle), payload);
                let id = record.id().to_string();
                let owner = db.handle_for_id(class, &id)?;
                ids.insert((class, id), owner);
            }
        }
        Ok(Self {
            records,
            ids,
            reference_digest: db.reference_map_digest()?,
            surnames: stored_surnames(db)?,
        })
    }
}

/// Backlinks of every target, derived from the live records alone.
pub fn expected_backlinks(db: &Database) -> CoreResult<BTreeMap<Handle, BTreeSet<Backlink>>> {
    let mut expected: BTreeMap<Handle, BTreeSet<Backlink>> = BTreeMap::new();
    for class in ObjectClass::ALL {
        for item in db.cursor(class)? {
            let (handle, record) = item?;
            for target in record.references() {
                expected
                    .entry(target)
                    .or_default()
                    .insert(Backlink { class, handle });
            }
        }
    }
    Ok(expected)
}

/// Backlinks of `target` as the reference map answers them.
pub fn stored_backlinks(db: &Database, target: Handle) -> CoreResult<BTreeSet<Backlink>> {
    db.find_backlinks(target)?.collect()
}

/// Checks `find_backlinks` against [`expected_backlinks`] for every pool
/// handle. Returns the first disagreement.
pub fn check_backlinks(db: &Database, pool: &HandlePool) -> Result<(), String> {
    let expected = expected_backlinks(db).map_err(|e| e.to_string())?;
    for (_, target) in pool.iter() {
        let stored = stored_backlinks(db, target).map_err(|e| e.to_string())?;
        let want = expected.get(&target).cloned().unwrap_or_default();
        if stored != want {
            return Err(format!(
                "backlinks of {target}: stored {stored:?}, expected {want:?}"
            ));
        }
    }
    Ok(())
}

/// The surname index as stored.
pub fn stored_surnames(db: &Database) -> CoreResult<BTreeMap<String, BTreeSet<Handle>>> {
    let mut index = BTreeMap::new();
    for surname in db.surnames()? {
        let people = db.people_with_surname(&surname)?.into_iter().collect();
        index.insert(surname, people);
    }
    Ok(index)
}

/// Checks the surname index against the primary surnames of live people.
pub fn check_surnames(db: &Database) -> Result<(), String> {
    let mut expected: BTreeMap<String, BTreeSet<Handle>> = BTreeMap::new();
    let people: Vec<(Handle, Record)> = db
        .cursor(ObjectClass::Person)
        .and_then(|cursor| cursor.collect())
        .map_err(|e| e.to_string())?;
    for (handle, record) in people {
        if let Record::Person(person) = record {
            if !person.primary_name.surname.is_empty() {
                expected
                    .entry(person.primary_name.surname)
                    .or_default()
                    .insert(handle);
            }
        }
    }
    let stored = stored_surnames(db).map_err(|e| e.to_string())?;
    if stored == expected {
        Ok(())
    } else {
        Err(format!("surname index {stored:?}, expected {expected:?}"))
    }
}

/// Commits one generated step.
///
/// A `Put` of a live handle becomes an update keeping the stored ID; a
/// `Delete` of a missing handle is skipped.
pub fn apply_step(db: &Database, pool: &HandlePool, step: &Step) -> CoreResult<()> {
    match step {
        Step::Undo => db.undo().map(drop),
        Step::Redo => db.redo().map(drop),
        Step::Commit(ops) => {
            let mut txn = db.begin("generated")?;
            let result = ops.iter().try_for_each(|op| match op {
                Op::Put(record) => {
                    let mut record = record.clone();
                    match db.get_in_txn(&txn, record.class(), record.handle())? {
                        Some(current) => {
                            record.set_id(current.id().to_string());
                            db.update_record(&mut txn, &record)
                        }
                        None => db.add_record(&mut txn, &mut record).map(drop),
                    }
                }
                Op::Delete { class, slot } => {
                    let handle = pool.get(*class, *slot);
                    if db.get_in_txn(&txn, *class, handle)?.is_some() {
                        db.remove_object(&mut txn, *class, handle)
                    } else {
                        Ok(())
                    }
                }
            });
            match result {
                Ok(()) => db.commit(&mut txn).map(drop),
                Err(err) => {
                    db.abort(&mut txn)?;
                    Err(err)
                }
            }
        }
    }
}

/// Commits every step, stopping at the first error.
pub fn apply_workload(db: &Database, pool: &HandlePool, steps: &[Step]) -> CoreResult<()> {
    steps.iter().try_for_each(|step| apply_step(db, pool, step))
}

/// Handles of a small sample tree.
#[derive(Debug, Clone, Copy)]
pub struct SampleTree {
    /// Husband.
    pub father: Handle,
    /// Wife.
    pub mother: Handle,
    /// Their child.
    pub child: Handle,
    /// The couple's family.
    pub family: Handle,
    /// The child's birth.
    pub birth: Handle,
    /// Where the birth took place.
    pub place: Handle,
    /// Parish register.
    pub source: Handle,
    /// Entry in the register.
    pub citation: Handle,
    /// Research note on the birth.
    pub note: Handle,
}

/// Commits a three-person family with a sourced birth event.
pub fn sample_tree(db: &Database) -> CoreResult<SampleTree> {
    let mut place = Place::new("Uppsala");
    let mut source = Source::new("Parish register");
    let mut citation = Citation::new("p. 12");
    citation.source_handle = Some(source.handle);
    let mut note = Note::new("Baptised the same week.");

    let mut birth = Event::new("Birth");
    birth.date = "1871-04-02".to_string();
    birth.place = Some(place.handle);
    birth.citation_list.push(citation.handle);
    birth.note_list.push(note.handle);

    let mut father = Person::new("Johan", "Lind");
    let mut mother = Person::new("Maria", "Lind");
    let mut child = Person::new("Anna", "Lind");
    child.event_ref_list.push(EventRef {
        handle: birth.handle,
        role: "Primary".to_string(),
    });
    child.birth_ref_index = Some(0);

    let mut family = Family::new();
    family.father_handle = Some(father.handle);
    family.mother_handle = Some(mother.handle);
    family.child_ref_list.push(ChildRef {
        handle: child.handle,
        father_rel: "Birth".to_string(),
        mother_rel: "Birth".to_string(),
    });
    family.relation_type = "Married".to_string();
    for person in [&mut father, &mut mother] {
        person.family_list.push(family.handle);
    }
    child.parent_family_list.push(family.handle);

    db.transaction("sample tree", |txn| {
        db.add_object(txn, &mut place)?;
        db.add_object(txn, &mut source)?;
        db.add_object(txn, &mut citation)?;
        db.add_object(txn, &mut note)?;
        db.add_object(txn, &mut birth)?;
        db.add_object(txn, &mut father)?;
        db.add_object(txn, &mut mother)?;
        db.add_object(txn, &mut child)?;
        db.add_object(txn, &mut family)?;
        Ok(())
    })?;

    Ok(SampleTree {
        father: father.handle,
        mother: mother.handle,
        child: child.handle,
        family: family.handle,
        birth: birth.handle,
        place: place.handle,
        source: source.handle,
        citation: citation.handle,
        note: note.handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database() {
        let db = TestDatabase::memory();
        assert!(db.path().is_none());
        assert!(db.is_open());
    }

    #[test]
    fn test_file_database() {
        let db = TestDatabase::file();
        let path = db.path().unwrap();
        assert!(path.join("LOCK").exists());
    }

    #[test]
    fn sample_tree_is_consistent() {
        with_temp_db(|db| {
            let tree = sample_tree(db).unwrap();
            let family_links = stored_backlinks(db, tree.family).unwrap();
            assert_eq!(family_links.len(), 3);
            assert!(family_links.iter().all(|l| l.class == ObjectClass::Person));

            let expected = expected_backlinks(db).unwrap();
            assert_eq!(expected[&tree.source].len(), 1);
            assert!(db.verify_reference_map().unwrap().is_consistent());
        });
    }

    #[test]
    fn snapshot_tracks_undo() {
        with_temp_db(|db| {
            let empty = StoreSnapshot::capture(db).unwrap();
            sample_tree(db).unwrap();
            let full = StoreSnapshot::capture(db).unwrap();
            assert_eq!(full.records.len(), 9);
            assert!(full.ids.values().all(Option::is_some));

            assert!(db.undo().unwrap());
            assert_eq!(StoreSnapshot::capture(db).unwrap(), empty);
        });
    }

    #[test]
    fn apply_step_turns_put_of_live_handle_into_update() {
        with_temp_db(|db| {
            let pool = HandlePool::standard();
            let mut note = Note::new("first");
            note.handle = pool.get(ObjectClass::Note, 0);
            apply_step(db, &pool, &Step::Commit(vec![Op::Put(note.clone().into())])).unwrap();

            note.text = "second".to_string();
            apply_step(db, &pool, &Step::Commit(vec![Op::Put(note.clone().into())])).unwrap();
            let stored = db.get_object::<Note>(note.handle).unwrap().unwrap();
            assert_eq!(stored.text, "second");
            assert_eq!(stored.id, "N0000");

            let delete = Op::Delete {
                class: ObjectClass::Note,
                slot: 0,
            };
            apply_step(db, &pool, &Step::Commit(vec![delete.clone(), delete])).unwrap();
            assert_eq!(db.count(ObjectClass::Note).unwrap(), 0);
        });
    }
}
