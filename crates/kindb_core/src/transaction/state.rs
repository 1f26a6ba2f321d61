//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::handle::Handle;
use crate::kv::KvEngine;
use crate::model::peek_header;
use crate::types::{ChangeOp, ObjectClass, TransactionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction accepts changes.
    Open,
    /// Transaction has been committed.
    Committed(TransactionId),
    /// Transaction has been aborted, or its commit failed.
    Aborted,
}

/// One logical mutation of a primary object.
///
/// `old` is the payload the change was based on and `new` the payload it
/// writes. Adds have no `old`, deletes have no `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Class of the object.
    pub class: ObjectClass,
    /// Kind of change.
    pub op: ChangeOp,
    /// Handle of the object.
    pub handle: Handle,
    /// Payload before the change.
    pub old: Option<Vec<u8>>,
    /// Payload after the change.
    pub new: Option<Vec<u8>>,
}

impl ChangeRecord {
    /// The change that reverts this one.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let op = match self.op {
            ChangeOp::Add => ChangeOp::Delete,
            ChangeOp::Update => ChangeOp::Update,
            ChangeOp::Delete => ChangeOp::Add,
        };
        Self {
            class: self.class,
            op,
            handle: self.handle,
            old: self.new.clone(),
            new: self.old.clone(),
        }
    }
}

/// Exclusive right to write, held by the open transaction.
///
/// Releasing it frees the writer slot and forgets the table intents the
/// transaction declared.
#[derive(Debug)]
pub(crate) struct WriterLease {
    flag: Arc<AtomicBool>,
    engine: Arc<KvEngine>,
}

impl WriterLease {
    pub(crate) fn acquire(flag: &Arc<AtomicBool>, engine: &Arc<KvEngine>) -> CoreResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CoreError::busy("another write transaction is open"))?;
        Ok(Self {
            flag: Arc::clone(flag),
            engine: Arc::clone(engine),
        })
    }

    pub(crate) fn engine(&self) -> &KvEngine {
        &self.engine
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        self.engine.clear_write_intents();
        self.flag.store(false, Ordering::Release);
    }
}

/// An open write transaction.
///
/// Changes are only recorded here; nothing touches storage until the
/// owning database commits the transaction. Dropping an open transaction
/// aborts it.
#[derive(Debug)]
pub struct Transaction {
    description: String,
    batch: bool,
    state: TransactionState,
    changes: Vec<ChangeRecord>,
    lease: Option<WriterLease>,
}

impl Transaction {
    pub(crate) fn new(description: String, batch: bool, lease: WriterLease) -> Self {
        Self {
            description,
            batch,
            state: TransactionState::Open,
            changes: Vec::new(),
            lease: Some(lease),
        }
    }

    /// The description recorded in the undo history.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// True for bulk-import transactions.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.batch
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction still accepts changes.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// The id assigned at commit.
    #[must_use]
    pub fn txn_id(&self) -> Option<TransactionId> {
        match self.state {
            TransactionState::Committed(id) => Some(id),
            _ => None,
        }
    }

    /// Recorded changes, in order.
    #[must_use]
    pub fn changes(&self) -> &[ChangeRecord] {
        &self.changes
    }

    /// Number of recorded changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if no change was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Records the creation of an object.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::TransactionClosed`] once the transaction has
    /// ended, with [`CoreError::CorruptRecord`] if `payload` is not a record
    /// of `class`, and with [`CoreError::CursorConflict`] while a cursor is
    /// open on the class table.
    pub fn add(&mut self, class: ObjectClass, handle: Handle, payload: Vec<u8>) -> CoreResult<()> {
        self.record(class, ChangeOp::Add, handle, None, Some(payload))
    }

    /// Records the replacement of `old` by `new`.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::add`].
    pub fn update(
        &mut self,
        class: ObjectClass,
        handle: Handle,
        old: Vec<u8>,
        new: Vec<u8>,
    ) -> CoreResult<()> {
        self.record(class, ChangeOp::Update, handle, Some(old), Some(new))
    }

    /// Records the removal of an object whose current payload is `old`.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::add`].
    pub fn delete(&mut self, class: ObjectClass, handle: Handle, old: Vec<u8>) -> CoreResult<()> {
        self.record(class, ChangeOp::Delete, handle, Some(old), None)
    }

    /// The payload this transaction last wrote for a handle.
    ///
    /// `None` if the transaction has not touched it; `Some(None)` if it
    /// deleted it.
    #[must_use]
    pub fn pending(&self, class: ObjectClass, handle: Handle) -> Option<Option<&[u8]>> {
        self.changes
            .iter()
            .rev()
            .find(|change| change.class == class && change.handle == handle)
            .map(|change| change.new.as_deref())
    }

    /// True if a payload written by this transaction carries `id`.
    pub(crate) fn writes_id(&self, class: ObjectClass, id: &str) -> bool {
        self.changes
            .iter()
            .filter(|change| change.class == class)
            .filter_map(|change| change.new.as_deref())
            .any(|payload| peek_header(class, payload).is_ok_and(|header| header.id == id))
    }

    fn record(
        &mut self,
        class: ObjectClass,
        op: ChangeOp,
        handle: Handle,
        old: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> CoreResult<()> {
        self.ensure_open()?;
        for payload in old.iter().chain(new.iter()) {
            let header = peek_header(class, payload)?;
            if header.handle != handle {
                return Err(CoreError::invalid_operation(format!(
                    "payload of {class} {} recorded under handle {handle}",
                    header.handle
                )));
            }
        }
        if let Some(lease) = &self.lease {
            lease.engine().declare_write_intent(class.name())?;
        }
        self.changes.push(ChangeRecord {
            class,
            op,
            handle,
            old,
            new,
        });
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::TransactionClosed {
                txn_id: self.txn_id(),
            })
        }
    }

    pub(crate) fn mark_committed(&mut self, txn_id: TransactionId) {
        self.state = TransactionState::Committed(txn_id);
        self.lease = None;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
        self.lease = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::EngineOptions;
    use crate::model::{Note, PrimaryObject};
    use crate::schema::table_specs;
    use kindb_storage::InMemoryBackend;

    fn engine() -> Arc<KvEngine> {
        Arc::new(
            KvEngine::open(
                Box::new(InMemoryBackend::new()),
                &table_specs(),
                EngineOptions::default(),
            )
            .unwrap(),
        )
    }

    fn open_txn(flag: &Arc<AtomicBool>, engine: &Arc<KvEngine>) -> Transaction {
        Transaction::new(
            "test".to_string(),
            false,
            WriterLease::acquire(flag, engine).unwrap(),
        )
    }

    #[test]
    fn lease_is_exclusive_until_released() {
        let engine = engine();
        let flag = Arc::new(AtomicBool::new(false));
        let mut txn = open_txn(&flag, &engine);

        let err = WriterLease::acquire(&flag, &engine).unwrap_err();
        assert!(err.is_retryable());

        txn.mark_aborted();
        assert!(WriterLease::acquire(&flag, &engine).is_ok());
    }

    #[test]
    fn closed_transaction_rejects_changes() {
        let engine = engine();
        let flag = Arc::new(AtomicBool::new(false));
        let mut txn = open_txn(&flag, &engine);
        txn.mark_committed(TransactionId::new(7));

        let note = Note::new("late");
        let err = txn
            .add(ObjectClass::Note, note.handle, note.encode())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::TransactionClosed {
                txn_id: Some(TransactionId(7))
            }
        ));
        assert!(err.is_programmer_error());
    }

    #[test]
    fn payload_must_match_class_and_handle() {
        let engine = engine();
        let flag = Arc::new(AtomicBool::new(false));
        let mut txn = open_txn(&flag, &engine);
        let note = Note::new("text");

        let err = txn
            .add(ObjectClass::Person, note.handle, note.encode())
            .unwrap_err();
        assert!(err.is_skippable());

        let err = txn
            .add(ObjectClass::Note, Handle::new(), note.encode())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert!(txn.is_empty());
    }

    #[test]
    fn pending_sees_latest_change() {
        let engine = engine();
        let flag = Arc::new(AtomicBool::new(false));
        let mut txn = open_txn(&flag, &engine);
        let mut note = Note::new("first");
        note.id = "N0001".to_string();
        let first = note.encode();
        txn.add(ObjectClass::Note, note.handle, first.clone()).unwrap();
        assert_eq!(txn.pending(ObjectClass::Note, note.handle), Some(Some(&first[..])));
        assert!(txn.writes_id(ObjectClass::Note, "N0001"));
        assert!(!txn.writes_id(ObjectClass::Person, "N0001"));

        txn.delete(ObjectClass::Note, note.handle, first).unwrap();
        assert_eq!(txn.pending(ObjectClass::Note, note.handle), Some(None));
        assert_eq!(txn.pending(ObjectClass::Note, Handle::new()), None);
    }

    #[test]
    fn open_cursor_blocks_recording() {
        let engine = engine();
        let flag = Arc::new(AtomicBool::new(false));
        let mut txn = open_txn(&flag, &engine);
        let cursor = engine.cursor("note").unwrap();

        let note = Note::new("blocked");
        let err = txn
            .add(ObjectClass::Note, note.handle, note.encode())
            .unwrap_err();
        assert!(matches!(err, CoreError::CursorConflict { table: "note" }));
        cursor.close();
        txn.add(ObjectClass::Note, note.handle, note.encode()).unwrap();
    }

    #[test]
    fn inverse_swaps_payloads() {
        let change = ChangeRecord {
            class: ObjectClass::Note,
            op: ChangeOp::Add,
            handle: Handle::new(),
            old: None,
            new: Some(vec![1]),
        };
        let inverse = change.inverse();
        assert_eq!(inverse.op, ChangeOp::Delete);
        assert_eq!(inverse.old, Some(vec![1]));
        assert_eq!(inverse.new, None);
        assert_eq!(inverse.inverse(), change);
    }
}
