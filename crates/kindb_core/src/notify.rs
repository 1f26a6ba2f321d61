//! Per-class change notification.
//!
//! After a commit, undo or redo is durable, every touched class gets one
//! [`ChangeEvent`] listing the `(operation, handle)` pairs of that class.
//! Delivery is synchronous and in-process. Subscribers cannot fail the
//! commit: returned errors are logged and panics are caught.
//!
//! # Usage
//!
//! ```rust
//! use kindb_core::{Database, ObjectClass};
//! use kindb_core::model::Person;
//!
//! let db = Database::open_in_memory().unwrap();
//! let events = db.subscribe_channel(ObjectClass::Person);
//!
//! let mut txn = db.begin("add person").unwrap();
//! db.add_object(&mut txn, &mut Person::new("Ada", "Lind")).unwrap();
//! db.commit(&mut txn).unwrap();
//!
//! let event = events.try_recv().unwrap();
//! assert_eq!(event.class, ObjectClass::Person);
//! assert_eq!(event.changes.len(), 1);
//! ```

use crate::handle::Handle;
use crate::transaction::ChangeRecord;
use crate::types::{ChangeOp, ObjectClass, TransactionId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// Error a subscriber callback may return.
pub type SubscriberError = Box<dyn Error + Send + Sync>;

type Callback = Arc<dyn Fn(&ChangeEvent) -> Result<(), SubscriberError> + Send + Sync>;

/// Identifies a subscription for [`Notifier::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// What produced a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// An ordinary commit.
    Commit,
    /// An undo.
    Undo,
    /// A redo.
    Redo,
}

/// Changes to one class made by one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// Id of the engine transaction that wrote the changes.
    pub txn_id: TransactionId,
    /// The class all changes belong to.
    pub class: ObjectClass,
    /// What produced the changes.
    pub source: ChangeSource,
    /// The distinct `(operation, handle)` pairs.
    pub changes: BTreeSet<(ChangeOp, Handle)>,
}

impl ChangeEvent {
    /// Handles with the given operation.
    pub fn handles(&self, op: ChangeOp) -> impl Iterator<Item = Handle> + '_ {
        self.changes
            .iter()
            .filter(move |(change_op, _)| *change_op == op)
            .map(|(_, handle)| *handle)
    }
}

/// Groups change records into one event per class.
///
/// Updates of a handle that the same transaction also deleted are dropped.
pub(crate) fn group_events(
    txn_id: TransactionId,
    source: ChangeSource,
    records: &[ChangeRecord],
) -> Vec<ChangeEvent> {
    let deleted: BTreeSet<(ObjectClass, Handle)> = records
        .iter()
        .filter(|record| record.op == ChangeOp::Delete)
        .map(|record| (record.class, record.handle))
        .collect();

    let mut by_class: BTreeMap<ObjectClass, BTreeSet<(ChangeOp, Handle)>> = BTreeMap::new();
    for record in records {
        if record.op == ChangeOp::Update && deleted.contains(&(record.class, record.handle)) {
            continue;
        }
        by_class
            .entry(record.class)
            .or_default()
            .insert((record.op, record.handle));
    }

    by_class
        .into_iter()
        .map(|(class, changes)| ChangeEvent {
            txn_id,
            class,
            source,
            changes,
        })
        .collect()
}

enum Sink {
    Callback(Callback),
    Channel(Sender<ChangeEvent>),
}

struct Subscriber {
    id: SubscriptionId,
    class: ObjectClass,
    sink: Sink,
}

/// Distributes change events to subscribers.
///
/// - Emits only committed changes
/// - Preserves commit order
/// - Is thread-safe
pub struct Notifier {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// Creates a notifier without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a callback for one class.
    pub fn subscribe<F>(&self, class: ObjectClass, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.register(class, Sink::Callback(Arc::new(callback)))
    }

    /// Returns a receiver for one class's events.
    ///
    /// Dropping the receiver ends the subscription at the next delivery.
    pub fn subscribe_channel(&self, class: ObjectClass) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.register(class, Sink::Channel(tx));
        rx
    }

    fn register(&self, class: ObjectClass, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .push(Arc::new(Subscriber { id, class, sink }));
        id
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Delivers events in order.
    ///
    /// Subscribers registered or removed from inside a callback take effect
    /// from the next event on.
    pub fn publish(&self, events: &[ChangeEvent]) {
        let mut disconnected = Vec::new();
        for event in events {
            let snapshot: Vec<Arc<Subscriber>> = self
                .subscribers
                .read()
                .iter()
                .filter(|subscriber| subscriber.class == event.class)
                .cloned()
                .collect();

            for subscriber in snapshot {
                match &subscriber.sink {
                    Sink::Callback(callback) => deliver(subscriber.id, callback, event),
                    Sink::Channel(tx) => {
                        if tx.send(event.clone()).is_err() {
                            disconnected.push(subscriber.id);
                        }
                    }
                }
            }
        }

        if !disconnected.is_empty() {
            self.subscribers
                .write()
                .retain(|subscriber| !disconnected.contains(&subscriber.id));
        }
    }
}

fn deliver(id: SubscriptionId, callback: &Callback, event: &ChangeEvent) {
    match catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(subscription = %id, class = %event.class, error = %err, "subscriber failed");
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(subscription = %id, class = %event.class, panic = %message, "subscriber panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn record(class: ObjectClass, op: ChangeOp, handle: Handle) -> ChangeRecord {
        ChangeRecord {
            class,
            op,
            handle,
            old: None,
            new: None,
        }
    }

    fn event(class: ObjectClass) -> ChangeEvent {
        ChangeEvent {
            txn_id: TransactionId::new(1),
            class,
            source: ChangeSource::Commit,
            changes: [(ChangeOp::Add, Handle::new())].into(),
        }
    }

    #[test]
    fn grouping_is_per_class_and_drops_updates_of_deleted() {
        let (a, b, c) = (Handle::new(), Handle::new(), Handle::new());
        let records = [
            record(ObjectClass::Person, ChangeOp::Add, a),
            record(ObjectClass::Person, ChangeOp::Update, a),
            record(ObjectClass::Family, ChangeOp::Update, b),
            record(ObjectClass::Family, ChangeOp::Delete, b),
            record(ObjectClass::Family, ChangeOp::Update, c),
        ];
        let events = group_events(TransactionId::new(3), ChangeSource::Undo, &records);
        assert_eq!(events.len(), 2);

        let person = &events[0];
        assert_eq!(person.class, ObjectClass::Person);
        assert_eq!(person.changes.len(), 2);

        let family = &events[1];
        assert_eq!(family.handles(ChangeOp::Delete).collect::<Vec<_>>(), vec![b]);
        assert_eq!(family.handles(ChangeOp::Update).collect::<Vec<_>>(), vec![c]);
        assert_eq!(family.source, ChangeSource::Undo);
    }

    #[test]
    fn callbacks_only_see_their_class() {
        let notifier = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        notifier.subscribe(ObjectClass::Note, move |event| {
            sink.lock().unwrap().push(event.class);
            Ok(())
        });

        notifier.publish(&[event(ObjectClass::Person), event(ObjectClass::Note)]);
        assert_eq!(*seen.lock().unwrap(), vec![ObjectClass::Note]);
    }

    #[test]
    fn failing_and_panicking_subscribers_do_not_stop_delivery() {
        let notifier = Notifier::new();
        let delivered = Arc::new(AtomicU64::new(0));
        notifier.subscribe(ObjectClass::Event, |_| Err("disk full".into()));
        notifier.subscribe(ObjectClass::Event, |_| panic!("subscriber bug"));
        let counter = Arc::clone(&delivered);
        notifier.subscribe(ObjectClass::Event, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        notifier.publish(&[event(ObjectClass::Event)]);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.subscriber_count(), 3);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let notifier = Notifier::new();
        let kept = notifier.subscribe_channel(ObjectClass::Media);
        drop(notifier.subscribe_channel(ObjectClass::Media));
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.publish(&[event(ObjectClass::Media)]);
        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap().class, ObjectClass::Media);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let notifier = Notifier::new();
        let rx = notifier.subscribe_channel(ObjectClass::Source);
        let id = notifier.subscribe(ObjectClass::Source, |_| Ok(()));
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.publish(&[event(ObjectClass::Source)]);
        assert!(rx.try_recv().is_ok());
    }
}
