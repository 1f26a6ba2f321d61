//! Benchmark utilities.

use kindb_core::model::{ChildRef, Event, EventRef, Family, Person, PersonRef};
use kindb_core::{CoreResult, Database, Handle};
use rand::seq::SliceRandom;
use rand::Rng;

/// Generate a random capitalised name.
pub fn random_name<R: Rng>(rng: &mut R) -> String {
    let len = rng.gen_range(3..9);
    let mut name: String = (0..len)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect();
    name[..1].make_ascii_uppercase();
    name
}

/// Generate a person with `events` event references.
pub fn person_with_events<R: Rng>(rng: &mut R, events: usize) -> Person {
    let mut person = Person::new(random_name(rng), random_name(rng));
    person.event_ref_list = (0..events)
        .map(|_| EventRef {
            handle: Handle::new(),
            role: "Primary".to_string(),
        })
        .collect();
    person
}

/// Commits `families` families of two parents and up to three children,
/// one transaction per family. Returns every person's handle.
pub fn populate<R: Rng>(db: &Database, rng: &mut R, families: usize) -> CoreResult<Vec<Handle>> {
    let mut people = Vec::with_capacity(families * 4);
    for _ in 0..families {
        let mut father = Person::new(random_name(rng), random_name(rng));
        let mut mother = Person::new(random_name(rng), random_name(rng));
        let mut family = Family::new();
        let mut marriage = Event::new("Marriage");
        family.father_handle = Some(father.handle);
        family.mother_handle = Some(mother.handle);
        family.event_ref_list.push(EventRef {
            handle: marriage.handle,
            role: "Family".to_string(),
        });

        let mut children: Vec<Person> = (0..rng.gen_range(0..=3))
            .map(|_| Person::new(random_name(rng), random_name(rng)))
            .collect();
        for child in &mut children {
            child.parent_family_list.push(family.handle);
            family.child_ref_list.push(ChildRef {
                handle: child.handle,
                father_rel: "Birth".to_string(),
                mother_rel: "Birth".to_string(),
            });
        }
        // Link some families into earlier generations.
        if let Some(grandparent) = people.choose(rng).copied() {
            father.person_ref_list.push(PersonRef {
                handle: grandparent,
                relation: "Godfather".to_string(),
            });
        }

        db.transaction("family", |txn| {
            db.add_object(txn, &mut marriage)?;
            db.add_object(txn, &mut father)?;
            db.add_object(txn, &mut mother)?;
            for child in &mut children {
                db.add_object(txn, child)?;
            }
            db.add_object(txn, &mut family)?;
            Ok(())
        })?;

        people.push(father.handle);
        people.push(mother.handle);
        people.extend(children.iter().map(|c| c.handle));
    }
    Ok(people)
}

/// Commits one person and `referrers` families naming it as father.
/// Returns the person's handle.
pub fn hub_with_referrers(db: &Database, referrers: usize) -> CoreResult<Handle> {
    let mut hub = Person::new("Hub", "Person");
    db.transaction("hub", |txn| db.add_object(txn, &mut hub))?;
    let mut txn = db.begin("referrers")?;
    for _ in 0..referrers {
        let mut family = Family::new();
        family.father_handle = Some(hub.handle);
        db.add_object(&mut txn, &mut family)?;
    }
    db.commit(&mut txn)?;
    Ok(hub.handle)
}
