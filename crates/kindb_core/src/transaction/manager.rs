//! Transaction manager.

use super::history::{self, HistoryEntry, HistoryItem};
use super::state::{ChangeRecord, Transaction, WriterLease};
use crate::error::{CoreError, CoreResult};
use crate::handle::Handle;
use crate::id_index::IdAllocator;
use crate::kv::{KvEngine, KvTxn};
use crate::model::{extract_references, now_secs, peek_header};
use crate::names;
use crate::notify::ChangeSource;
use crate::refmap;
use crate::schema::{
    decode_handle_key, decode_u64, encode_u64, set_needs_rebuild, META, META_DEFAULT_PERSON,
    META_NEXT_TXN, REDO, UNDO,
};
use crate::types::{ChangeOp, ObjectClass, TransactionId};
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// What a successful commit, undo or redo wrote.
#[derive(Debug, Clone)]
pub(crate) struct CommitOutcome {
    pub(crate) txn_id: TransactionId,
    pub(crate) source: ChangeSource,
    pub(crate) changes: Vec<ChangeRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Commit,
    Batch,
    Undo,
    Redo,
}

/// Applies transactions to the engine.
///
/// Every commit, undo and redo runs inside one engine transaction: primary
/// tables, ID index, reference map, history stacks and counters change
/// together or not at all.
///
/// ## Single-Writer Guarantee
///
/// At most one [`Transaction`] is open at a time. Undo, redo and rebuild
/// take the same writer slot for their duration, so they fail with
/// [`CoreError::Busy`] while a transaction is open.
#[derive(Debug)]
pub(crate) struct TransactionManager {
    engine: Arc<KvEngine>,
    ids: IdAllocator,
    writer: Arc<AtomicBool>,
    undo_capacity: usize,
}

impl TransactionManager {
    pub(crate) fn new(engine: Arc<KvEngine>, ids: IdAllocator, undo_capacity: usize) -> Self {
        Self {
            engine,
            ids,
            writer: Arc::new(AtomicBool::new(false)),
            undo_capacity,
        }
    }

    pub(crate) fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Takes the writer slot without opening a transaction.
    pub(crate) fn acquire_lease(&self) -> CoreResult<WriterLease> {
        WriterLease::acquire(&self.writer, &self.engine)
    }

    /// Opens a write transaction.
    pub(crate) fn begin(&self, description: &str, batch: bool) -> CoreResult<Transaction> {
        if self.engine.is_read_only() {
            return Err(CoreError::invalid_operation("store is opened read-only"));
        }
        let lease = self.acquire_lease()?;
        Ok(Transaction::new(description.to_string(), batch, lease))
    }

    /// Commits a transaction.
    ///
    /// The transaction ends either way: committed on success, aborted if
    /// any step fails.
    pub(crate) fn commit(&self, txn: &mut Transaction) -> CoreResult<CommitOutcome> {
        txn.ensure_open()?;
        let mode = if txn.is_batch() {
            Mode::Batch
        } else {
            Mode::Commit
        };
        let entry = HistoryEntry {
            txn_id: TransactionId::new(0),
            description: txn.description().to_string(),
            timestamp: now_secs(),
            changes: txn.changes().to_vec(),
        };

        match self.write(mode, entry) {
            Ok(outcome) => {
                txn.mark_committed(outcome.txn_id);
                tracing::debug!(
                    txn = %outcome.txn_id,
                    changes = outcome.changes.len(),
                    batch = txn.is_batch(),
                    "transaction committed"
                );
                Ok(outcome)
            }
            Err(err) => {
                txn.mark_aborted();
                tracing::debug!(error = %err, "commit failed, change not saved");
                Err(err)
            }
        }
    }

    /// Writes store settings in one engine commit outside the undo history.
    ///
    /// Takes the writer slot for the duration, so it fails with
    /// [`CoreError::Busy`] while a transaction is open.
    pub(crate) fn write_settings<F>(&self, what: &str, f: F) -> CoreResult<()>
    where
        F: FnOnce(&mut KvTxn<'_>) -> CoreResult<()>,
    {
        if self.engine.is_read_only() {
            return Err(CoreError::invalid_operation(format!(
                "cannot change {what} on a read-only store"
            )));
        }
        let _lease = self.acquire_lease()?;
        let mut kv = self.engine.begin_txn()?;
        f(&mut kv)?;
        kv.commit()?;
        tracing::debug!(setting = what, "store setting written");
        Ok(())
    }

    /// Discards a transaction.
    pub(crate) fn abort(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_open()?;
        txn.mark_aborted();
        Ok(())
    }

    /// Reverts the most recent undoable transaction.
    pub(crate) fn undo(&self) -> CoreResult<Option<CommitOutcome>> {
        self.replay(Mode::Undo)
    }

    /// Re-applies the most recently undone transaction.
    pub(crate) fn redo(&self) -> CoreResult<Option<CommitOutcome>> {
        self.replay(Mode::Redo)
    }

    fn replay(&self, mode: Mode) -> CoreResult<Option<CommitOutcome>> {
        let (table, verb) = match mode {
            Mode::Undo => (UNDO, "undo"),
            _ => (REDO, "redo"),
        };
        if self.engine.is_read_only() {
            return Err(CoreError::invalid_operation(format!(
                "cannot {verb} on a read-only store"
            )));
        }
        if self.engine.len(table)? == 0 {
            return Ok(None);
        }
        let _lease = self.acquire_lease()?;
        let outcome = self.write_history(mode)?;
        if let Some(outcome) = &outcome {
            tracing::debug!(txn = %outcome.txn_id, changes = outcome.changes.len(), "{verb} applied");
        }
        Ok(outcome)
    }

    pub(crate) fn can_undo(&self) -> CoreResult<bool> {
        Ok(self.engine.len(UNDO)? > 0)
    }

    pub(crate) fn can_redo(&self) -> CoreResult<bool> {
        Ok(self.engine.len(REDO)? > 0)
    }

    /// Undoable transactions, newest first.
    pub(crate) fn undo_history(&self) -> CoreResult<Vec<HistoryItem>> {
        let mut items = Vec::new();
        for (_, value) in self.engine.cursor(UNDO)? {
            items.push(HistoryEntry::decode(&value)?.item());
        }
        items.reverse();
        Ok(items)
    }

    fn write(&self, mode: Mode, mut entry: HistoryEntry) -> CoreResult<CommitOutcome> {
        let mut kv = self.engine.begin_txn()?;
        self.apply_all(&mut kv, &entry.changes, mode != Mode::Batch)?;
        let txn_id = allocate_txn_id(&mut kv)?;
        entry.txn_id = txn_id;

        if mode == Mode::Batch {
            kv.clear(UNDO)?;
            kv.clear(REDO)?;
            set_needs_rebuild(&mut kv, true)?;
        } else if !entry.changes.is_empty() {
            kv.clear(REDO)?;
            self.push_undo(&mut kv, &entry)?;
        }

        self.ids.persist(&mut kv)?;
        kv.commit()?;
        Ok(CommitOutcome {
            txn_id,
            source: ChangeSource::Commit,
            changes: entry.changes,
        })
    }

    fn write_history(&self, mode: Mode) -> CoreResult<Option<CommitOutcome>> {
        let mut kv = self.engine.begin_txn()?;
        let (from, source) = match mode {
            Mode::Undo => (UNDO, ChangeSource::Undo),
            _ => (REDO, ChangeSource::Redo),
        };
        let Some(mut entry) = history::pop(&mut kv, from)? else {
            return Ok(None);
        };

        let applied: Vec<ChangeRecord> = match mode {
            Mode::Undo => entry.changes.iter().rev().map(ChangeRecord::inverse).collect(),
            _ => entry.changes.clone(),
        };
        self.apply_all(&mut kv, &applied, true)?;

        let txn_id = allocate_txn_id(&mut kv)?;
        entry.txn_id = txn_id;
        match mode {
            Mode::Undo => history::push(&mut kv, REDO, &entry)?,
            _ => self.push_undo(&mut kv, &entry)?,
        }
        kv.commit()?;

        Ok(Some(CommitOutcome {
            txn_id,
            source,
            changes: applied,
        }))
    }

    fn push_undo(&self, kv: &mut KvTxn<'_>, entry: &HistoryEntry) -> CoreResult<()> {
        if self.undo_capacity == 0 {
            return Ok(());
        }
        history::push(kv, UNDO, entry)?;
        let evicted = history::evict(kv, UNDO, self.undo_capacity)?;
        if evicted > 0 {
            tracing::debug!(evicted, capacity = self.undo_capacity, "oldest undo entries evicted");
        }
        Ok(())
    }

    fn apply_all(
        &self,
        kv: &mut KvTxn<'_>,
        changes: &[ChangeRecord],
        maintain_refs: bool,
    ) -> CoreResult<()> {
        for change in changes {
            apply_change(kv, change, maintain_refs)?;
        }
        Ok(())
    }
}

fn allocate_txn_id(kv: &mut KvTxn<'_>) -> CoreResult<TransactionId> {
    let next = match kv.get(META, META_NEXT_TXN)? {
        Some(bytes) => decode_u64(&bytes)?,
        None => 1,
    };
    kv.put(META, META_NEXT_TXN, &encode_u64(next + 1))?;
    Ok(TransactionId::new(next))
}

/// Writes one change record into primary table, ID index and reference map.
fn apply_change(kv: &mut KvTxn<'_>, change: &ChangeRecord, maintain_refs: bool) -> CoreResult<()> {
    let class = change.class;
    let key = change.handle.as_bytes();
    let current = kv.get(class.name(), key)?;

    match (change.op, &current) {
        (ChangeOp::Add, Some(_)) => {
            return Err(CoreError::invalid_operation(format!(
                "{class} {} already exists",
                change.handle
            )));
        }
        (ChangeOp::Update | ChangeOp::Delete, None) => {
            return Err(CoreError::NotFound {
                class,
                handle: change.handle,
            });
        }
        (ChangeOp::Update | ChangeOp::Delete, Some(stored)) => {
            if change.old.as_deref() != Some(stored.as_slice()) {
                return Err(CoreError::StaleRecord {
                    class,
                    handle: change.handle,
                });
            }
        }
        (ChangeOp::Add, None) => {}
    }

    let old_id = match &current {
        Some(bytes) => Some(peek_header(class, bytes)?.id),
        None => None,
    };
    let new_id = match &change.new {
        Some(bytes) => {
            let id = peek_header(class, bytes)?.id;
            if id.is_empty() {
                return Err(CoreError::invalid_operation(format!(
                    "{class} {} has no id",
                    change.handle
                )));
            }
            Some(id)
        }
        None => None,
    };

    let id_table = class.id_table();
    if let Some(old_id) = old_id.as_deref() {
        if new_id.as_deref() != Some(old_id)
            && kv.get(id_table, old_id.as_bytes())?.as_deref() == Some(&key[..])
        {
            kv.delete(id_table, old_id.as_bytes())?;
        }
    }
    if let Some(new_id) = &new_id {
        if let Some(owner) = kv.get(id_table, new_id.as_bytes())? {
            if owner.as_slice() != &key[..] {
                let owner = decode_handle_key(&owner)?;
                return Err(CoreError::DuplicateId {
                    class,
                    id: new_id.clone(),
                    owner,
                });
            }
        } else {
            kv.put(id_table, new_id.as_bytes(), key)?;
        }
    }

    match &change.new {
        Some(bytes) => kv.put(class.name(), key, bytes)?,
        None => kv.delete(class.name(), key)?,
    }

    if class == ObjectClass::Person {
        names::apply_person_change(kv, change.handle, current.as_deref(), change.new.as_deref())?;
        if change.new.is_none()
            && kv.get(META, META_DEFAULT_PERSON)?.as_deref() == Some(&key[..])
        {
            kv.delete(META, META_DEFAULT_PERSON)?;
        }
    }

    if maintain_refs {
        let old_refs = reference_set(class, current.as_deref())?;
        let new_refs = reference_set(class, change.new.as_deref())?;
        refmap::apply_delta(kv, class, change.handle, &old_refs, &new_refs)?;
    }
    Ok(())
}

fn reference_set(class: ObjectClass, payload: Option<&[u8]>) -> CoreResult<BTreeSet<Handle>> {
    match payload {
        Some(bytes) => Ok(extract_references(class, bytes)?.handles()),
        None => Ok(BTreeSet::new()),
    }
}
