//! Property-based test generators using proptest.
//!
//! Records reference each other through a [`HandlePool`]: a small, fixed
//! set of handles per class. Drawing both record handles and reference
//! targets from the pool makes generated workloads collide often, which is
//! where reference maintenance and undo have something to get wrong.

use kindb_core::model::{
    ChildRef, Citation, Event, EventRef, Family, Gender, Media, MediaRef, Note, Person,
    PersonRef, Place, PlaceRef, Record, RepoRef, Repository, Source,
};
use kindb_core::{Handle, ObjectClass, HANDLE_LEN};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Handles per class in [`HandlePool::standard`].
pub const POOL_SIZE: usize = 4;

/// Fixed handles per class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlePool {
    handles: BTreeMap<ObjectClass, Vec<Handle>>,
}

impl HandlePool {
    /// Builds a deterministic pool of `size` handles per class.
    pub fn new(size: usize) -> Self {
        let size = size.clamp(1, 255);
        let handles = ObjectClass::ALL
            .iter()
            .map(|&class| {
                let list = (0..size)
                    .map(|slot| {
                        let mut bytes = [0u8; HANDLE_LEN];
                        bytes[0] = class.code();
                        bytes[1] = slot as u8;
                        bytes[HANDLE_LEN - 1] = 0x4b;
                        Handle::from_bytes(bytes)
                    })
                    .collect();
                (class, list)
            })
            .collect();
        Self { handles }
    }

    /// A pool of [`POOL_SIZE`] handles per class.
    pub fn standard() -> Self {
        Self::new(POOL_SIZE)
    }

    /// Handles per class.
    pub fn size(&self) -> usize {
        self.handles.values().next().map_or(0, Vec::len)
    }

    /// The handle in `slot` of `class`, wrapping around.
    pub fn get(&self, class: ObjectClass, slot: usize) -> Handle {
        let list = &self.handles[&class];
        list[slot % list.len()]
    }

    /// Every handle of `class`.
    pub fn all(&self, class: ObjectClass) -> &[Handle] {
        &self.handles[&class]
    }

    /// Every handle of every class.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectClass, Handle)> + '_ {
        self.handles
            .iter()
            .flat_map(|(class, list)| list.iter().map(move |h| (*class, *h)))
    }
}

/// Strategy for arbitrary handles.
pub fn handle_strategy() -> impl Strategy<Value = Handle> {
    prop::array::uniform16(any::<u8>()).prop_map(Handle::from_bytes)
}

/// Strategy for one of the nine classes.
pub fn class_strategy() -> impl Strategy<Value = ObjectClass> {
    prop::sample::select(ObjectClass::ALL.to_vec())
}

/// Strategy for short display text, including non-ASCII letters.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-zÅÄÖåäöé ]{0,12}").expect("Invalid regex")
}

fn pool_ref(pool: &HandlePool, class: ObjectClass) -> impl Strategy<Value = Handle> {
    let pool = pool.clone();
    (0..pool.size()).prop_map(move |slot| pool.get(class, slot))
}

fn refs(pool: &HandlePool, class: ObjectClass, max: usize) -> impl Strategy<Value = Vec<Handle>> {
    prop::collection::vec(pool_ref(pool, class), 0..=max)
}

fn media_refs(pool: &HandlePool) -> impl Strategy<Value = Vec<MediaRef>> {
    prop::collection::vec(
        (
            pool_ref(pool, ObjectClass::Media),
            prop::option::of(prop::array::uniform4(0u8..=100)),
        )
            .prop_map(|(handle, region)| MediaRef { handle, region }),
        0..=1,
    )
}

fn event_refs(pool: &HandlePool) -> impl Strategy<Value = Vec<EventRef>> {
    prop::collection::vec(
        (pool_ref(pool, ObjectClass::Event), text_strategy())
            .prop_map(|(handle, role)| EventRef { handle, role }),
        0..=2,
    )
}

/// Strategy for a person occupying a pool slot.
pub fn person_strategy(pool: &HandlePool) -> impl Strategy<Value = Person> {
    (
        pool_ref(pool, ObjectClass::Person),
        (text_strategy(), text_strategy()),
        prop::sample::select(vec![Gender::Female, Gender::Male, Gender::Unknown]),
        refs(pool, ObjectClass::Family, 2),
        refs(pool, ObjectClass::Family, 1),
        event_refs(pool),
        media_refs(pool),
        refs(pool, ObjectClass::Citation, 1),
        refs(pool, ObjectClass::Note, 2),
        prop::collection::vec(
            (pool_ref(pool, ObjectClass::Person), text_strategy())
                .prop_map(|(handle, relation)| PersonRef { handle, relation }),
            0..=1,
        ),
        any::<bool>(),
    )
        .prop_map(
            |(
                handle,
                (given, surname),
                gender,
                family_list,
                parent_family_list,
                event_ref_list,
                media_list,
                citation_list,
                note_list,
                person_ref_list,
                private,
            )| {
                let mut person = Person::new(given, surname);
                person.handle = handle;
                person.gender = gender;
                person.family_list = family_list;
                person.parent_family_list = parent_family_list;
                person.birth_ref_index = (!event_ref_list.is_empty()).then_some(0);
                person.event_ref_list = event_ref_list;
                person.media_list = media_list;
                person.citation_list = citation_list;
                person.note_list = note_list;
                person.person_ref_list = person_ref_list;
                person.private = private;
                person
            },
        )
}

/// Strategy for a family occupying a pool slot.
pub fn family_strategy(pool: &HandlePool) -> impl Strategy<Value = Family> {
    (
        pool_ref(pool, ObjectClass::Family),
        prop::option::of(pool_ref(pool, ObjectClass::Person)),
        prop::option::of(pool_ref(pool, ObjectClass::Person)),
        prop::collection::vec(
            pool_ref(pool, ObjectClass::Person).prop_map(|handle| ChildRef {
                handle,
                father_rel: "Birth".to_string(),
                mother_rel: "Birth".to_string(),
            }),
            0..=2,
        ),
        event_refs(pool),
        refs(pool, ObjectClass::Citation, 1),
        refs(pool, ObjectClass::Note, 1),
        prop::sample::select(vec!["Married", "Unmarried", "Unknown"]),
    )
        .prop_map(
            |(handle, father, mother, children, events, citations, notes, relation)| {
                let mut family = Family::new();
                family.handle = handle;
                family.father_handle = father;
                family.mother_handle = mother;
                family.child_ref_list = children;
                family.event_ref_list = events;
                family.citation_list = citations;
                family.note_list = notes;
                family.relation_type = relation.to_string();
                family
            },
        )
}

/// Strategy for an event occupying a pool slot.
pub fn event_strategy(pool: &HandlePool) -> impl Strategy<Value = Event> {
    (
        pool_ref(pool, ObjectClass::Event),
        prop::sample::select(vec!["Birth", "Death", "Marriage", "Census"]),
        prop::string::string_regex("(1[6-9][0-9]{2}(-[01][0-9])?)?").expect("Invalid regex"),
        prop::option::of(pool_ref(pool, ObjectClass::Place)),
        media_refs(pool),
        refs(pool, ObjectClass::Citation, 2),
        refs(pool, ObjectClass::Note, 1),
    )
        .prop_map(
            |(handle, event_type, date, place, media, citations, notes)| {
                let mut event = Event::new(event_type);
                event.handle = handle;
                event.date = date;
                event.place = place;
                event.media_list = media;
                event.citation_list = citations;
                event.note_list = notes;
                event
            },
        )
}

/// Strategy for a place occupying a pool slot.
pub fn place_strategy(pool: &HandlePool) -> impl Strategy<Value = Place> {
    (
        pool_ref(pool, ObjectClass::Place),
        text_strategy(),
        prop::collection::vec(
            pool_ref(pool, ObjectClass::Place).prop_map(|handle| PlaceRef {
                handle,
                date: String::new(),
            }),
            0..=1,
        ),
        refs(pool, ObjectClass::Citation, 1),
        refs(pool, ObjectClass::Note, 1),
    )
        .prop_map(|(handle, name, enclosed_by, citations, notes)| {
            let mut place = Place::new(name);
            place.handle = handle;
            place.enclosed_by = enclosed_by;
            place.citation_list = citations;
            place.note_list = notes;
            place
        })
}

/// Strategy for a source occupying a pool slot.
pub fn source_strategy(pool: &HandlePool) -> impl Strategy<Value = Source> {
    (
        pool_ref(pool, ObjectClass::Source),
        text_strategy(),
        prop::collection::vec(
            pool_ref(pool, ObjectClass::Repository).prop_map(|handle| RepoRef {
                handle,
                call_number: String::new(),
                media_type: "Book".to_string(),
            }),
            0..=2,
        ),
        media_refs(pool),
        refs(pool, ObjectClass::Note, 1),
    )
        .prop_map(|(handle, title, repos, media, notes)| {
            let mut source = Source::new(title);
            source.handle = handle;
            source.repo_ref_list = repos;
            source.media_list = media;
            source.note_list = notes;
            source
        })
}

/// Strategy for a citation occupying a pool slot.
pub fn citation_strategy(pool: &HandlePool) -> impl Strategy<Value = Citation> {
    (
        pool_ref(pool, ObjectClass::Citation),
        text_strategy(),
        0u8..=4,
        prop::option::of(pool_ref(pool, ObjectClass::Source)),
        refs(pool, ObjectClass::Note, 1),
    )
        .prop_map(|(handle, page, confidence, source, notes)| {
            let mut citation = Citation::new(page);
            citation.handle = handle;
            citation.confidence = confidence;
            citation.source_handle = source;
            citation.note_list = notes;
            citation
        })
}

/// Strategy for a repository occupying a pool slot.
pub fn repository_strategy(pool: &HandlePool) -> impl Strategy<Value = Repository> {
    (
        pool_ref(pool, ObjectClass::Repository),
        text_strategy(),
        refs(pool, ObjectClass::Note, 2),
    )
        .prop_map(|(handle, name, notes)| {
            let mut repository = Repository::new(name);
            repository.handle = handle;
            repository.note_list = notes;
            repository
        })
}

/// Strategy for a media object occupying a pool slot.
pub fn media_strategy(pool: &HandlePool) -> impl Strategy<Value = Media> {
    (
        pool_ref(pool, ObjectClass::Media),
        prop::string::string_regex("[a-z]{1,8}\\.(jpg|png)").expect("Invalid regex"),
        refs(pool, ObjectClass::Citation, 1),
        refs(pool, ObjectClass::Note, 1),
    )
        .prop_map(|(handle, path, citations, notes)| {
            let mut media = Media::new(path, "image/jpeg");
            media.handle = handle;
            media.citation_list = citations;
            media.note_list = notes;
            media
        })
}

/// Strategy for a note occupying a pool slot.
pub fn note_strategy(pool: &HandlePool) -> impl Strategy<Value = Note> {
    (pool_ref(pool, ObjectClass::Note), text_strategy(), any::<bool>()).prop_map(
        |(handle, text, preformatted)| {
            let mut note = Note::new(text);
            note.handle = handle;
            note.preformatted = preformatted;
            note
        },
    )
}

/// Strategy for a record of any class, with an empty ID.
pub fn record_strategy(pool: &HandlePool) -> impl Strategy<Value = Record> {
    prop_oneof![
        3 => person_strategy(pool).prop_map(Record::from),
        3 => family_strategy(pool).prop_map(Record::from),
        2 => event_strategy(pool).prop_map(Record::from),
        1 => place_strategy(pool).prop_map(Record::from),
        1 => source_strategy(pool).prop_map(Record::from),
        1 => citation_strategy(pool).prop_map(Record::from),
        1 => repository_strategy(pool).prop_map(Record::from),
        1 => media_strategy(pool).prop_map(Record::from),
        1 => note_strategy(pool).prop_map(Record::from),
    ]
}

/// One change inside a generated transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Add the record, or replace it if its handle is live.
    Put(Record),
    /// Remove the object in a pool slot if it is live.
    Delete {
        /// Class of the object.
        class: ObjectClass,
        /// Pool slot.
        slot: usize,
    },
}

/// One step of a generated workload.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Commit a transaction of these changes.
    Commit(Vec<Op>),
    /// Call undo.
    Undo,
    /// Call redo.
    Redo,
}

/// Strategy for a single change.
pub fn op_strategy(pool: &HandlePool) -> impl Strategy<Value = Op> {
    let size = pool.size();
    prop_oneof![
        3 => record_strategy(pool).prop_map(Op::Put),
        1 => (class_strategy(), 0..size).prop_map(|(class, slot)| Op::Delete { class, slot }),
    ]
}

/// Strategy for a workload step.
pub fn step_strategy(pool: &HandlePool) -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => prop::collection::vec(op_strategy(pool), 1..=4).prop_map(Step::Commit),
        1 => Just(Step::Undo),
        1 => Just(Step::Redo),
    ]
}

/// Strategy for a workload of up to `max_steps` steps.
pub fn workload_strategy(pool: &HandlePool, max_steps: usize) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(step_strategy(pool), 1..=max_steps.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn pool_is_deterministic_and_distinct() {
        let pool = HandlePool::standard();
        assert_eq!(pool, HandlePool::standard());
        let all: std::collections::BTreeSet<_> = pool.iter().map(|(_, h)| h).collect();
        assert_eq!(all.len(), POOL_SIZE * ObjectClass::ALL.len());
        assert_eq!(pool.get(ObjectClass::Note, POOL_SIZE), pool.get(ObjectClass::Note, 0));
    }

    #[test]
    fn generated_records_stay_in_the_pool() {
        let pool = HandlePool::standard();
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let record = record_strategy(&pool)
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(pool.all(record.class()).contains(&record.handle()));
            assert!(record.id().is_empty());
            for target in record.references() {
                assert!(pool.iter().any(|(_, h)| h == target));
            }
        }
    }
}
