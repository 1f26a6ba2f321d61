//! Undo and redo stacks.
//!
//! Both stacks are unique tables keyed by big-endian transaction id, so the
//! last key is the top of the stack. Entries are CBOR arrays:
//!
//! ```text
//! [txn_id, description, timestamp, [[class, op, handle, old|null, new|null], …]]
//! ```

use super::state::ChangeRecord;
use crate::error::{CoreError, CoreResult};
use crate::handle::Handle;
use crate::kv::KvTxn;
use crate::schema::{decode_u64, encode_u64};
use crate::types::{ChangeOp, ObjectClass, TransactionId};
use kindb_codec::{CanonicalDecoder, CanonicalEncoder, CodecError};
use serde::Serialize;

/// A committed transaction as kept on the undo or redo stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HistoryEntry {
    pub(crate) txn_id: TransactionId,
    pub(crate) description: String,
    pub(crate) timestamp: i64,
    pub(crate) changes: Vec<ChangeRecord>,
}

/// Summary of an undoable transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryItem {
    /// Id under which the entry was recorded.
    pub txn_id: TransactionId,
    /// Caller-supplied description.
    pub description: String,
    /// Seconds since the Unix epoch at commit.
    pub timestamp: i64,
    /// Number of changes.
    pub changes: usize,
}

impl HistoryEntry {
    pub(crate) fn item(&self) -> HistoryItem {
        HistoryItem {
            txn_id: self.txn_id,
            description: self.description.clone(),
            timestamp: self.timestamp,
            changes: self.changes.len(),
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut enc = CanonicalEncoder::with_capacity(64);
        enc.array(4)
            .uint(self.txn_id.as_u64())
            .text(&self.description)
            .int(self.timestamp)
            .array(self.changes.len());
        for change in &self.changes {
            enc.array(5)
                .uint(u64::from(change.class.code()))
                .uint(u64::from(change.op.code()))
                .bytes(change.handle.as_bytes());
            for payload in [&change.old, &change.new] {
                match payload {
                    Some(bytes) => enc.bytes(bytes),
                    None => enc.null(),
                };
            }
        }
        enc.into_bytes()
    }

    pub(crate) fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut dec = CanonicalDecoder::new(bytes);
        dec.expect_array(4)?;
        let txn_id = TransactionId::new(dec.read_uint()?);
        let description = dec.read_text()?.to_string();
        let timestamp = dec.read_int()?;
        let count = dec.read_array_len()?;

        let mut changes = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            dec.expect_array(5)?;
            let class = small_code(dec.read_uint()?)
                .and_then(ObjectClass::from_code)
                .ok_or_else(|| CodecError::invalid_structure("unknown class code in history"))?;
            let op = small_code(dec.read_uint()?)
                .and_then(ChangeOp::from_code)
                .ok_or_else(|| CodecError::invalid_structure("unknown change code in history"))?;
            let handle = Handle::from_slice(dec.read_bytes()?)
                .ok_or_else(|| CodecError::invalid_structure("malformed handle in history"))?;
            let old = read_opt_bytes(&mut dec)?;
            let new = read_opt_bytes(&mut dec)?;
            changes.push(ChangeRecord {
                class,
                op,
                handle,
                old,
                new,
            });
        }
        dec.finish()?;

        Ok(Self {
            txn_id,
            description,
            timestamp,
            changes,
        })
    }
}

fn small_code(value: u64) -> Option<u8> {
    u8::try_from(value).ok()
}

fn read_opt_bytes(dec: &mut CanonicalDecoder<'_>) -> CoreResult<Option<Vec<u8>>> {
    if dec.peek_is_null() {
        dec.read_null()?;
        Ok(None)
    } else {
        Ok(Some(dec.read_bytes()?.to_vec()))
    }
}

/// Pushes an entry on top of a stack.
pub(crate) fn push(kv: &mut KvTxn<'_>, table: &str, entry: &HistoryEntry) -> CoreResult<()> {
    kv.put(table, &encode_u64(entry.txn_id.as_u64()), &entry.encode())
}

/// Removes and returns the top of a stack.
pub(crate) fn pop(kv: &mut KvTxn<'_>, table: &str) -> CoreResult<Option<HistoryEntry>> {
    let Some((key, value)) = kv.last(table)? else {
        return Ok(None);
    };
    kv.delete(table, &key)?;
    let entry = HistoryEntry::decode(&value)?;
    if decode_u64(&key)? != entry.txn_id.as_u64() {
        return Err(CoreError::invalid_operation(format!(
            "history entry {} stored under a different key",
            entry.txn_id
        )));
    }
    Ok(Some(entry))
}

/// Drops the oldest entries until at most `capacity` remain.
pub(crate) fn evict(kv: &mut KvTxn<'_>, table: &str, capacity: usize) -> CoreResult<usize> {
    let mut evicted = 0;
    while kv.len(table)? > capacity {
        let Some((key, _)) = kv.first(table)? else {
            break;
        };
        kv.delete(table, &key)?;
        evicted += 1;
    }
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{EngineOptions, KvEngine};
    use crate::schema::{table_specs, UNDO};
    use kindb_storage::InMemoryBackend;

    fn entry(id: u64) -> HistoryEntry {
        HistoryEntry {
            txn_id: TransactionId::new(id),
            description: format!("edit {id}"),
            timestamp: 1_700_000_000,
            changes: vec![
                ChangeRecord {
                    class: ObjectClass::Place,
                    op: ChangeOp::Update,
                    handle: Handle::new(),
                    old: Some(vec![1, 2]),
                    new: Some(vec![3]),
                },
                ChangeRecord {
                    class: ObjectClass::Note,
                    op: ChangeOp::Delete,
                    handle: Handle::new(),
                    old: Some(vec![9]),
                    new: None,
                },
            ],
        }
    }

    #[test]
    fn entry_survives_encoding() {
        let original = entry(42);
        assert_eq!(HistoryEntry::decode(&original.encode()).unwrap(), original);
        assert_eq!(original.item().changes, 2);
    }

    #[test]
    fn truncated_entry_is_an_error() {
        let bytes = entry(1).encode();
        assert!(HistoryEntry::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn stack_pops_newest_and_evicts_oldest() {
        let engine = KvEngine::open(
            Box::new(InMemoryBackend::new()),
            &table_specs(),
            EngineOptions::default(),
        )
        .unwrap();
        let mut kv = engine.begin_txn().unwrap();
        for id in [3, 1, 2, 4] {
            push(&mut kv, UNDO, &entry(id)).unwrap();
        }
        assert_eq!(evict(&mut kv, UNDO, 3).unwrap(), 1);
        assert_eq!(pop(&mut kv, UNDO).unwrap().unwrap().txn_id, TransactionId(4));
        assert_eq!(pop(&mut kv, UNDO).unwrap().unwrap().txn_id, TransactionId(3));
        assert_eq!(pop(&mut kv, UNDO).unwrap().unwrap().txn_id, TransactionId(2));
        assert!(pop(&mut kv, UNDO).unwrap().is_none());
    }
}
