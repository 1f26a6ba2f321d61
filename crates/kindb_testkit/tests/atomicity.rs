//! Interrupted commits leave no trace.

use kindb_core::model::{Family, Note, Person};
use kindb_core::{Config, ObjectClass};
use kindb_testkit::prelude::*;

fn commit_family(db: &kindb_core::Database, person: &Person) -> kindb_core::CoreResult<()> {
    let mut family = Family::new();
    family.father_handle = Some(person.handle);
    let mut note = Note::new("unfinished");
    let mut txn = db.begin("interrupted")?;
    db.add_object(&mut txn, &mut family)?;
    db.add_object(&mut txn, &mut note)?;
    db.commit(&mut txn).map(drop)
}

/// Builds the pre-crash state: the sample tree plus one unlinked person.
fn prepare() -> (CrashHarness, SampleTree, Person) {
    let harness = CrashHarness::new(Config::default());
    let db = &harness.db;
    let tree = sample_tree(db).unwrap();
    let mut person = Person::new("Nils", "Ek");
    db.transaction("person", |txn| db.add_object(txn, &mut person))
        .unwrap();
    (harness, tree, person)
}

/// Bytes the interrupted commit writes when nothing interrupts it.
fn commit_size() -> u64 {
    let (harness, _, person) = prepare();
    let start = harness.control.bytes_written();
    commit_family(&harness.db, &person).unwrap();
    harness.control.bytes_written() - start
}

#[test]
fn torn_commit_is_discarded_on_reopen() {
    let size = commit_size();
    assert!(size > 2);
    for budget in [0, 1, size / 2, size - 1] {
        let (harness, tree, person) = prepare();
        let db = &harness.db;
        let before = StoreSnapshot::capture(db).unwrap();

        harness.control.crash_after(budget);
        assert!(commit_family(db, &person).is_err(), "budget {budget}");
        assert!(harness.control.has_crashed());

        // The open database kept its pre-commit state.
        assert_eq!(StoreSnapshot::capture(db).unwrap(), before);
        assert!(stored_backlinks(db, person.handle).unwrap().is_empty());

        let reopened = harness.reopen().unwrap();
        assert_eq!(StoreSnapshot::capture(&reopened).unwrap(), before);
        assert_eq!(reopened.count(ObjectClass::Family).unwrap(), 1);
        assert_eq!(
            stored_backlinks(&reopened, tree.father).unwrap().len(),
            1,
            "budget {budget}"
        );
        if budget > 0 {
            assert!(reopened.recovery_info().discarded_bytes > 0);
            assert!(reopened.needs_recovery());
        }
    }
}

#[test]
fn failed_flush_rolls_back_the_commit() {
    let harness = CrashHarness::new(Config::default());
    let db = &harness.db;
    let person = Person::new("Lea", "Ahl");
    let before = StoreSnapshot::capture(db).unwrap();

    harness.control.set_fail_on_flush(true);
    assert!(commit_family(db, &person).is_err());
    assert_eq!(StoreSnapshot::capture(db).unwrap(), before);
    assert!(!db.can_undo().unwrap());
    assert_eq!(db.stats().transactions_aborted, 1);

    // The writer slot was released.
    harness.control.reset();
    assert!(db.begin("next").is_ok());
}
