//! Persisted table layout.
//!
//! ```text
//! person … note           handle -> record payload
//! person_id … note_id     id -> handle
//! reference_map (dup)     referenced handle -> class code ‖ referencing handle
//! person_surname (dup)    primary surname -> person handle
//! name_group              surname -> group name
//! gender_stats            first given name -> female, male, unknown counts
//! undo, redo              txn id (big-endian) -> encoded change list
//! meta                    counters, flags, default person, bookmarks
//! ```

use crate::error::{CoreError, CoreResult};
use crate::handle::{Handle, HANDLE_LEN};
use crate::kv::{KvEngine, KvTxn, TableSpec};
use crate::types::ObjectClass;
use kindb_storage::StorageError;

/// The backlink table.
pub const REFERENCE_MAP: &str = "reference_map";
/// Undo history, oldest first.
pub const UNDO: &str = "undo";
/// Redo history, oldest first.
pub const REDO: &str = "redo";
/// Counters and flags.
pub const META: &str = "meta";
/// Person handles by primary surname.
pub const SURNAMES: &str = "person_surname";
/// Surname grouping chosen by the user.
pub const NAME_GROUP: &str = "name_group";
/// Gender counts by first given name.
pub const GENDER_STATS: &str = "gender_stats";

pub(crate) const META_NEXT_TXN: &[u8] = b"next_txn";
pub(crate) const META_NEEDS_REBUILD: &[u8] = b"needs_rebuild";
pub(crate) const META_DEFAULT_PERSON: &[u8] = b"default_person";

/// Length of a reference map value.
pub(crate) const BACKLINK_LEN: usize = 1 + HANDLE_LEN;

/// Every table of a kindb store.
#[must_use]
pub fn table_specs() -> Vec<TableSpec> {
    let mut specs: Vec<TableSpec> = ObjectClass::ALL
        .iter()
        .flat_map(|class| {
            [
                TableSpec::unique(class.name()),
                TableSpec::unique(class.id_table()),
            ]
        })
        .collect();
    specs.push(TableSpec::dup_sort(REFERENCE_MAP));
    specs.push(TableSpec::dup_sort(SURNAMES));
    specs.push(TableSpec::unique(NAME_GROUP));
    specs.push(TableSpec::unique(GENDER_STATS));
    specs.push(TableSpec::unique(UNDO));
    specs.push(TableSpec::unique(REDO));
    specs.push(TableSpec::unique(META));
    specs
}

pub(crate) fn next_id_key(class: ObjectClass) -> Vec<u8> {
    format!("next_id:{}", class.name()).into_bytes()
}

pub(crate) fn bookmarks_key(class: ObjectClass) -> Vec<u8> {
    format!("bookmarks:{}", class.name()).into_bytes()
}

pub(crate) fn encode_u64(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

pub(crate) fn decode_u64(bytes: &[u8]) -> CoreResult<u64> {
    let array: [u8; 8] = bytes.try_into().map_err(|_| {
        CoreError::Storage(StorageError::corrupted(format!(
            "expected 8-byte counter, found {} bytes",
            bytes.len()
        )))
    })?;
    Ok(u64::from_be_bytes(array))
}

/// Encodes the value stored under a referenced handle.
pub(crate) fn encode_backlink(class: ObjectClass, handle: Handle) -> [u8; BACKLINK_LEN] {
    let mut value = [0u8; BACKLINK_LEN];
    value[0] = class.code();
    value[1..].copy_from_slice(handle.as_bytes());
    value
}

/// Decodes a reference map value.
pub(crate) fn decode_backlink(value: &[u8]) -> CoreResult<(ObjectClass, Handle)> {
    let corrupted = || {
        CoreError::Storage(StorageError::corrupted(format!(
            "malformed reference map entry of {} bytes",
            value.len()
        )))
    };
    if value.len() != BACKLINK_LEN {
        return Err(corrupted());
    }
    let class = ObjectClass::from_code(value[0]).ok_or_else(corrupted)?;
    let handle = Handle::from_slice(&value[1..]).ok_or_else(corrupted)?;
    Ok((class, handle))
}

/// Concatenates handles into one value.
pub(crate) fn encode_handles(handles: &[Handle]) -> Vec<u8> {
    handles.iter().flat_map(|handle| *handle.as_bytes()).collect()
}

/// Splits a value written by [`encode_handles`].
pub(crate) fn decode_handles(bytes: &[u8]) -> CoreResult<Vec<Handle>> {
    if bytes.len() % HANDLE_LEN != 0 {
        return Err(CoreError::Storage(StorageError::corrupted(format!(
            "handle list of {} bytes",
            bytes.len()
        ))));
    }
    bytes.chunks_exact(HANDLE_LEN).map(decode_handle_key).collect()
}

/// Decodes a key that must be a handle.
pub(crate) fn decode_handle_key(key: &[u8]) -> CoreResult<Handle> {
    Handle::from_slice(key).ok_or_else(|| {
        CoreError::Storage(StorageError::corrupted(format!(
            "table key of {} bytes is not a handle",
            key.len()
        )))
    })
}

/// Reads a committed meta counter.
pub(crate) fn read_counter(engine: &KvEngine, key: &[u8]) -> CoreResult<Option<u64>> {
    engine.get(META, key)?.map(|bytes| decode_u64(&bytes)).transpose()
}

/// Sets or clears the persistent rebuild flag.
pub(crate) fn set_needs_rebuild(kv: &mut KvTxn<'_>, value: bool) -> CoreResult<()> {
    if value {
        kv.put(META, META_NEEDS_REBUILD, &[1])
    } else {
        kv.delete(META, META_NEEDS_REBUILD)
    }
}
