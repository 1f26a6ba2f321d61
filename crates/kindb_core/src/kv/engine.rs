//! Table image backed by an append-only commit log.
//!
//! The engine keeps every table in memory as ordered maps and persists each
//! committed batch as one framed log record. Opening the engine replays the
//! log; a torn tail left by a crash is cut off, a damaged complete record is
//! reported as corruption.

use super::cursor::{DupCursor, KvCursor};
use super::log::{self, KvOp};
use crate::error::{CoreError, CoreResult};
use kindb_storage::StorageBackend;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::time::Duration;

/// How a table stores its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// One value per key.
    Unique,
    /// A sorted set of distinct values per key.
    DupSort,
}

/// Declaration of one engine table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name, also used in the commit log.
    pub name: &'static str,
    /// Value layout.
    pub kind: TableKind,
}

impl TableSpec {
    /// Declares a unique-key table.
    #[must_use]
    pub const fn unique(name: &'static str) -> Self {
        Self {
            name,
            kind: TableKind::Unique,
        }
    }

    /// Declares a duplicate-key table.
    #[must_use]
    pub const fn dup_sort(name: &'static str) -> Self {
        Self {
            name,
            kind: TableKind::DupSort,
        }
    }
}

/// Engine tuning taken from the database configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Sync the log to stable storage on every commit.
    pub sync_on_commit: bool,
    /// How long [`KvEngine::begin_txn`] waits for the write lock.
    pub lock_timeout: Duration,
    /// Reject write transactions and leave torn tails in place.
    pub read_only: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            lock_timeout: Duration::from_secs(2),
            read_only: false,
        }
    }
}

/// What happened while replaying the log at open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryInfo {
    /// Batches replayed.
    pub batches: u64,
    /// Bytes of torn tail that were cut off.
    pub discarded_bytes: u64,
}

/// Log sizes before and after a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    /// Log size before compaction.
    pub before: u64,
    /// Log size after compaction.
    pub after: u64,
}

#[derive(Debug)]
enum Table {
    Unique(BTreeMap<Vec<u8>, Vec<u8>>),
    Dup(BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>>),
}

impl Table {
    fn new(kind: TableKind) -> Self {
        match kind {
            TableKind::Unique => Table::Unique(BTreeMap::new()),
            TableKind::DupSort => Table::Dup(BTreeMap::new()),
        }
    }

    fn entry_count(&self) -> usize {
        match self {
            Table::Unique(map) => map.len(),
            Table::Dup(map) => map.values().map(BTreeSet::len).sum(),
        }
    }

    /// Returns false if the operation does not fit the table kind.
    fn apply(&mut self, op: &KvOp) -> bool {
        match (self, op) {
            (Table::Unique(map), KvOp::Put { key, value, .. }) => {
                map.insert(key.clone(), value.clone());
            }
            (Table::Unique(map), KvOp::Delete { key, .. }) => {
                map.remove(key);
            }
            (Table::Dup(map), KvOp::PutDup { key, value, .. }) => {
                map.entry(key.clone()).or_default().insert(value.clone());
            }
            (Table::Dup(map), KvOp::DeleteDup { key, value, .. }) => {
                if let Some(values) = map.get_mut(key) {
                    values.remove(value);
                    if values.is_empty() {
                        map.remove(key);
                    }
                }
            }
            (Table::Unique(map), KvOp::Clear { .. }) => map.clear(),
            (Table::Dup(map), KvOp::Clear { .. }) => map.clear(),
            _ => return false,
        }
        true
    }
}

#[derive(Debug)]
struct Image {
    tables: HashMap<&'static str, Table>,
}

impl Image {
    fn new(specs: &[TableSpec]) -> Self {
        Self {
            tables: specs
                .iter()
                .map(|spec| (spec.name, Table::new(spec.kind)))
                .collect(),
        }
    }

    fn apply(&mut self, op: &KvOp) -> CoreResult<()> {
        let table = op.table();
        let applied = self
            .tables
            .get_mut(table)
            .is_some_and(|data| data.apply(op));
        if applied {
            Ok(())
        } else {
            Err(CoreError::Storage(kindb_storage::StorageError::corrupted(
                format!("operation does not fit table {table}"),
            )))
        }
    }

    fn unique(&self, table: &'static str) -> CoreResult<&BTreeMap<Vec<u8>, Vec<u8>>> {
        match self.tables.get(table) {
            Some(Table::Unique(map)) => Ok(map),
            _ => Err(wrong_kind(table, TableKind::Unique)),
        }
    }

    fn dup(&self, table: &'static str) -> CoreResult<&BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>>> {
        match self.tables.get(table) {
            Some(Table::Dup(map)) => Ok(map),
            _ => Err(wrong_kind(table, TableKind::DupSort)),
        }
    }

    /// Rewrites the whole image as insert operations, tables in name order.
    fn snapshot_ops(&self) -> Vec<KvOp> {
        let mut names: Vec<&'static str> = self.tables.keys().copied().collect();
        names.sort_unstable();

        let mut ops = Vec::new();
        for table in names {
            match &self.tables[table] {
                Table::Unique(map) => {
                    ops.extend(map.iter().map(|(key, value)| KvOp::Put {
                        table,
                        key: key.clone(),
                        value: value.clone(),
                    }));
                }
                Table::Dup(map) => {
                    for (key, values) in map {
                        ops.extend(values.iter().map(|value| KvOp::PutDup {
                            table,
                            key: key.clone(),
                            value: value.clone(),
                        }));
                    }
                }
            }
        }
        ops
    }
}

fn wrong_kind(table: &str, expected: TableKind) -> CoreError {
    CoreError::invalid_operation(format!("table {table} is not a {expected:?} table"))
}

#[derive(Debug, Default)]
struct AccessState {
    cursors: HashMap<&'static str, usize>,
    intents: HashSet<&'static str>,
}

/// The key-value engine.
///
/// Readers never block each other. There is at most one [`KvTxn`] at a
/// time; a second caller waits up to the configured lock timeout and then
/// gets [`CoreError::Busy`].
pub struct KvEngine {
    kinds: HashMap<&'static str, TableKind>,
    image: RwLock<Image>,
    log: Mutex<Box<dyn StorageBackend>>,
    write_lock: Mutex<()>,
    access: Mutex<AccessState>,
    options: EngineOptions,
    recovery: RecoveryInfo,
}

impl std::fmt::Debug for KvEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvEngine")
            .field("tables", &self.kinds.len())
            .field("options", &self.options)
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl KvEngine {
    /// Opens the engine over a log backend and replays it.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if a complete log record fails
    /// verification, or an I/O error from the backend.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        tables: &[TableSpec],
        options: EngineOptions,
    ) -> CoreResult<Self> {
        let kinds: HashMap<&'static str, TableKind> =
            tables.iter().map(|spec| (spec.name, spec.kind)).collect();
        let mut image = Image::new(tables);

        let data = backend.read_all()?;
        let scan = log::scan(&data)?;
        let resolve = |name: &str| kinds.get_key_value(name).map(|(table, _)| *table);
        for payload in &scan.payloads {
            for op in log::decode_batch(payload, resolve)? {
                image.apply(&op)?;
            }
        }

        let discarded_bytes = data.len() as u64 - scan.valid_len;
        if discarded_bytes > 0 {
            if options.read_only {
                tracing::warn!(
                    discarded_bytes,
                    "commit log has a torn tail; leaving it in place (read-only)"
                );
            } else {
                tracing::warn!(discarded_bytes, "truncating torn commit log tail");
                backend.truncate(scan.valid_len)?;
                backend.sync()?;
            }
        }

        let recovery = RecoveryInfo {
            batches: scan.payloads.len() as u64,
            discarded_bytes,
        };
        tracing::debug!(batches = recovery.batches, "commit log replayed");

        Ok(Self {
            kinds,
            image: RwLock::new(image),
            log: Mutex::new(backend),
            write_lock: Mutex::new(()),
            access: Mutex::new(AccessState::default()),
            options,
            recovery,
        })
    }

    /// Returns what the replay at open found.
    #[must_use]
    pub fn recovery(&self) -> RecoveryInfo {
        self.recovery
    }

    /// Returns whether the engine rejects writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    /// Lists the declared tables in name order.
    #[must_use]
    pub fn tables(&self) -> Vec<(&'static str, TableKind)> {
        let mut tables: Vec<_> = self.kinds.iter().map(|(n, k)| (*n, *k)).collect();
        tables.sort_unstable_by_key(|(name, _)| *name);
        tables
    }

    pub(crate) fn table_name(&self, table: &str) -> CoreResult<&'static str> {
        self.kinds
            .get_key_value(table)
            .map(|(name, _)| *name)
            .ok_or_else(|| CoreError::invalid_operation(format!("unknown table {table}")))
    }

    fn expect_kind(&self, table: &str, kind: TableKind) -> CoreResult<&'static str> {
        let name = self.table_name(table)?;
        if self.kinds[name] == kind {
            Ok(name)
        } else {
            Err(wrong_kind(name, kind))
        }
    }

    /// Reads a committed value from a unique table.
    pub fn get(&self, table: &str, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let name = self.expect_kind(table, TableKind::Unique)?;
        Ok(self.image.read().unique(name)?.get(key).cloned())
    }

    /// Returns whether a committed key exists in any table.
    pub fn contains_key(&self, table: &str, key: &[u8]) -> CoreResult<bool> {
        let name = self.table_name(table)?;
        let image = self.image.read();
        Ok(match &image.tables[name] {
            Table::Unique(map) => map.contains_key(key),
            Table::Dup(map) => map.contains_key(key),
        })
    }

    /// Reads all committed values under a key of a duplicate-key table,
    /// in ascending byte order.
    pub fn get_dups(&self, table: &str, key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        let name = self.expect_kind(table, TableKind::DupSort)?;
        let image = self.image.read();
        Ok(image
            .dup(name)?
            .get(key)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Number of committed entries. Duplicate-key tables count every
    /// key/value pair.
    pub fn len(&self, table: &str) -> CoreResult<usize> {
        let name = self.table_name(table)?;
        Ok(self.image.read().tables[name].entry_count())
    }

    /// Number of distinct committed keys.
    pub fn key_count(&self, table: &str) -> CoreResult<usize> {
        let name = self.table_name(table)?;
        Ok(match &self.image.read().tables[name] {
            Table::Unique(map) => map.len(),
            Table::Dup(map) => map.len(),
        })
    }

    /// The committed entry following `after`, in key (then value) order.
    pub(crate) fn entry_after(
        &self,
        table: &'static str,
        after: Option<(&[u8], &[u8])>,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let image = self.image.read();
        let lower = after.map_or(Bound::Unbounded, |(key, _)| Bound::Excluded(key));
        match image.tables.get(table)? {
            Table::Unique(map) => map
                .range::<[u8], _>((lower, Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), v.clone())),
            Table::Dup(map) => {
                if let Some((key, value)) = after {
                    let next_value = map.get(key).and_then(|values| {
                        values
                            .range::<[u8], _>((Bound::Excluded(value), Bound::Unbounded))
                            .next()
                    });
                    if let Some(next) = next_value {
                        return Some((key.to_vec(), next.clone()));
                    }
                }
                map.range::<[u8], _>((lower, Bound::Unbounded))
                    .find_map(|(k, values)| values.first().map(|v| (k.clone(), v.clone())))
            }
        }
    }

    /// The committed value following `after` under one duplicate key.
    pub(crate) fn dup_value_after(
        &self,
        table: &'static str,
        key: &[u8],
        after: Option<&[u8]>,
    ) -> Option<Vec<u8>> {
        let image = self.image.read();
        let Some(Table::Dup(map)) = image.tables.get(table) else {
            return None;
        };
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        map.get(key)?
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .cloned()
    }

    /// Opens a cursor over all committed entries of a table.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::CursorConflict`] while a write transaction
    /// has declared an intent to write the table.
    pub fn cursor(&self, table: &str) -> CoreResult<KvCursor<'_>> {
        let name = self.table_name(table)?;
        self.register_cursor(name)?;
        Ok(KvCursor::new(self, name))
    }

    /// Opens a cursor over the values of one key of a duplicate-key table.
    pub fn dup_cursor(&self, table: &str, key: &[u8]) -> CoreResult<DupCursor<'_>> {
        let name = self.expect_kind(table, TableKind::DupSort)?;
        self.register_cursor(name)?;
        Ok(DupCursor::new(self, name, key.to_vec()))
    }

    fn register_cursor(&self, table: &'static str) -> CoreResult<()> {
        let mut access = self.access.lock();
        if access.intents.contains(table) {
            return Err(CoreError::CursorConflict { table });
        }
        *access.cursors.entry(table).or_default() += 1;
        Ok(())
    }

    pub(crate) fn release_cursor(&self, table: &'static str) {
        let mut access = self.access.lock();
        if let Some(count) = access.cursors.get_mut(table) {
            *count -= 1;
            if *count == 0 {
                access.cursors.remove(table);
            }
        }
    }

    /// Number of cursors currently open on a table.
    #[must_use]
    pub fn open_cursors(&self, table: &str) -> usize {
        self.access.lock().cursors.get(table).copied().unwrap_or(0)
    }

    /// Records that the current writer is going to modify `table`.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::CursorConflict`] if a cursor is open on it.
    pub fn declare_write_intent(&self, table: &str) -> CoreResult<()> {
        let name = self.table_name(table)?;
        let mut access = self.access.lock();
        if access.cursors.contains_key(name) {
            return Err(CoreError::CursorConflict { table: name });
        }
        access.intents.insert(name);
        Ok(())
    }

    /// Forgets all write intents.
    pub fn clear_write_intents(&self) {
        self.access.lock().intents.clear();
    }

    /// Starts the single engine write transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Busy`] if another transaction holds the write
    /// lock past the configured timeout.
    pub fn begin_txn(&self) -> CoreResult<KvTxn<'_>> {
        if self.options.read_only {
            return Err(CoreError::invalid_operation("store is opened read-only"));
        }
        let guard = self.lock_writer()?;
        Ok(KvTxn {
            engine: self,
            _guard: guard,
            ops: Vec::new(),
            unique: HashMap::new(),
            dup: HashMap::new(),
        })
    }

    fn lock_writer(&self) -> CoreResult<MutexGuard<'_, ()>> {
        self.write_lock
            .try_lock_for(self.options.lock_timeout)
            .ok_or_else(|| CoreError::busy("engine write lock is held by another transaction"))
    }

    /// Appends, verifies visibility constraints and applies one batch.
    fn commit_ops(&self, ops: &[KvOp]) -> CoreResult<()> {
        let record = log::frame(&log::encode_batch(ops))?;

        let access = self.access.lock();
        for op in ops {
            let table = op.table();
            if access.cursors.contains_key(table) {
                return Err(CoreError::CursorConflict { table });
            }
        }

        {
            let mut log = self.log.lock();
            let before = log.size()?;
            let written = log.append(&record).and_then(|_| {
                log.flush()?;
                if self.options.sync_on_commit {
                    log.sync()?;
                }
                Ok(())
            });
            if let Err(err) = written {
                if let Err(undo) = log.truncate(before) {
                    tracing::error!(error = %undo, "could not cut back a failed commit");
                }
                return Err(err.into());
            }
        }

        let mut image = self.image.write();
        for op in ops {
            image.apply(op)?;
        }
        drop(access);
        Ok(())
    }

    /// Current size of the commit log.
    pub fn log_size(&self) -> CoreResult<u64> {
        Ok(self.log.lock().size()?)
    }

    /// Rewrites the log as a single batch holding the current image.
    ///
    /// `rewrite` receives the new log bytes. It either returns a fresh
    /// backend that already holds them, or `None` to have the current
    /// backend truncated and rewritten in place.
    pub fn compact_with<F>(&self, rewrite: F) -> CoreResult<CompactStats>
    where
        F: FnOnce(&[u8]) -> CoreResult<Option<Box<dyn StorageBackend>>>,
    {
        if self.options.read_only {
            return Err(CoreError::invalid_operation("store is opened read-only"));
        }
        let _writer = self.lock_writer()?;

        let ops = self.image.read().snapshot_ops();
        let record = if ops.is_empty() {
            Vec::new()
        } else {
            log::frame(&log::encode_batch(&ops))?
        };

        let mut log = self.log.lock();
        let before = log.size()?;
        match rewrite(&record)? {
            Some(backend) => *log = backend,
            None => {
                log.truncate(0)?;
                log.append(&record)?;
                log.flush()?;
                log.sync()?;
            }
        }

        let after = record.len() as u64;
        tracing::info!(before, after, "commit log compacted");
        Ok(CompactStats { before, after })
    }
}

#[derive(Debug, Default)]
struct UniqueOverlay {
    cleared: bool,
    entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

#[derive(Debug, Default)]
struct DupDelta {
    added: BTreeSet<Vec<u8>>,
    removed: BTreeSet<Vec<u8>>,
}

#[derive(Debug, Default)]
struct DupOverlay {
    cleared: bool,
    keys: BTreeMap<Vec<u8>, DupDelta>,
}

/// The engine write transaction.
///
/// Writes are buffered and become visible to other readers only on
/// [`KvTxn::commit`]. Reads through the transaction see its own writes.
/// Dropping the transaction discards it.
pub struct KvTxn<'e> {
    engine: &'e KvEngine,
    _guard: MutexGuard<'e, ()>,
    ops: Vec<KvOp>,
    unique: HashMap<&'static str, UniqueOverlay>,
    dup: HashMap<&'static str, DupOverlay>,
}

impl std::fmt::Debug for KvTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvTxn")
            .field("ops", &self.ops.len())
            .finish_non_exhaustive()
    }
}

impl KvTxn<'_> {
    /// Reads a value, seeing this transaction's writes.
    pub fn get(&self, table: &str, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let name = self.engine.expect_kind(table, TableKind::Unique)?;
        if let Some(overlay) = self.unique.get(name) {
            if let Some(value) = overlay.entries.get(key) {
                return Ok(value.clone());
            }
            if overlay.cleared {
                return Ok(None);
            }
        }
        self.engine.get(name, key)
    }

    /// Inserts or replaces a value.
    pub fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> CoreResult<()> {
        let name = self.engine.expect_kind(table, TableKind::Unique)?;
        self.unique
            .entry(name)
            .or_default()
            .entries
            .insert(key.to_vec(), Some(value.to_vec()));
        self.ops.push(KvOp::Put {
            table: name,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Removes a key. Removing an absent key is a no-op.
    pub fn delete(&mut self, table: &str, key: &[u8]) -> CoreResult<()> {
        let name = self.engine.expect_kind(table, TableKind::Unique)?;
        self.unique
            .entry(name)
            .or_default()
            .entries
            .insert(key.to_vec(), None);
        self.ops.push(KvOp::Delete {
            table: name,
            key: key.to_vec(),
        });
        Ok(())
    }

    /// Reads all values under a duplicate key, seeing this transaction's
    /// writes.
    pub fn get_dups(&self, table: &str, key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        let name = self.engine.expect_kind(table, TableKind::DupSort)?;
        let overlay = self.dup.get(name);
        let mut values: BTreeSet<Vec<u8>> = if overlay.is_some_and(|o| o.cleared) {
            BTreeSet::new()
        } else {
            self.engine.get_dups(name, key)?.into_iter().collect()
        };
        if let Some(delta) = overlay.and_then(|o| o.keys.get(key)) {
            for value in &delta.removed {
                values.remove(value);
            }
            values.extend(delta.added.iter().cloned());
        }
        Ok(values.into_iter().collect())
    }

    /// Returns whether a key/value pair exists in a duplicate-key table.
    pub fn has_dup(&self, table: &str, key: &[u8], value: &[u8]) -> CoreResult<bool> {
        Ok(self
            .get_dups(table, key)?
            .iter()
            .any(|existing| existing == value))
    }

    /// Adds a value under a duplicate key. Adding an existing pair is a
    /// no-op.
    pub fn put_dup(&mut self, table: &str, key: &[u8], value: &[u8]) -> CoreResult<()> {
        let name = self.engine.expect_kind(table, TableKind::DupSort)?;
        let delta = self
            .dup
            .entry(name)
            .or_default()
            .keys
            .entry(key.to_vec())
            .or_default();
        delta.removed.remove(value);
        delta.added.insert(value.to_vec());
        self.ops.push(KvOp::PutDup {
            table: name,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Removes one value under a duplicate key.
    pub fn delete_dup(&mut self, table: &str, key: &[u8], value: &[u8]) -> CoreResult<()> {
        let name = self.engine.expect_kind(table, TableKind::DupSort)?;
        let delta = self
            .dup
            .entry(name)
            .or_default()
            .keys
            .entry(key.to_vec())
            .or_default();
        delta.added.remove(value);
        delta.removed.insert(value.to_vec());
        self.ops.push(KvOp::DeleteDup {
            table: name,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Removes every entry of a table.
    pub fn clear(&mut self, table: &str) -> CoreResult<()> {
        let name = self.engine.table_name(table)?;
        match self.engine.kinds[name] {
            TableKind::Unique => {
                self.unique.insert(
                    name,
                    UniqueOverlay {
                        cleared: true,
                        entries: BTreeMap::new(),
                    },
                );
            }
            TableKind::DupSort => {
                self.dup.insert(
                    name,
                    DupOverlay {
                        cleared: true,
                        keys: BTreeMap::new(),
                    },
                );
            }
        }
        self.ops.push(KvOp::Clear { table: name });
        Ok(())
    }

    /// Lowest entry of a unique table.
    pub fn first(&self, table: &str) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.edge(table, false)
    }

    /// Highest entry of a unique table.
    pub fn last(&self, table: &str) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.edge(table, true)
    }

    fn edge(&self, table: &str, last: bool) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        let name = self.engine.expect_kind(table, TableKind::Unique)?;
        let overlay = self.unique.get(name);
        let image = self.engine.image.read();
        let base = image.unique(name)?;

        let shadowed = |key: &[u8]| overlay.is_some_and(|o| o.entries.contains_key(key));
        let base_candidate = if overlay.is_some_and(|o| o.cleared) {
            None
        } else if last {
            base.iter().rev().find(|(key, _)| !shadowed(key))
        } else {
            base.iter().find(|(key, _)| !shadowed(key))
        };
        let overlay_candidate = overlay.and_then(|o| {
            let mut live = o
                .entries
                .iter()
                .filter_map(|(key, value)| value.as_ref().map(|value| (key, value)));
            if last {
                live.next_back()
            } else {
                live.next()
            }
        });

        let picked = match (base_candidate, overlay_candidate) {
            (Some(b), Some(o)) => {
                if (b.0 < o.0) != last {
                    b
                } else {
                    o
                }
            }
            (Some(b), None) => b,
            (None, Some(o)) => o,
            (None, None) => return Ok(None),
        };
        Ok(Some((picked.0.clone(), picked.1.clone())))
    }

    /// Number of entries in a unique table, seeing this transaction's
    /// writes.
    pub fn len(&self, table: &str) -> CoreResult<usize> {
        let name = self.engine.expect_kind(table, TableKind::Unique)?;
        let image = self.engine.image.read();
        let base = image.unique(name)?;
        let Some(overlay) = self.unique.get(name) else {
            return Ok(base.len());
        };

        let mut count = if overlay.cleared { 0 } else { base.len() };
        for (key, value) in &overlay.entries {
            let in_base = !overlay.cleared && base.contains_key(key);
            match (value.is_some(), in_base) {
                (true, false) => count += 1,
                (false, true) => count -= 1,
                _ => {}
            }
        }
        Ok(count)
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Makes all writes durable and visible as one batch.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::CursorConflict`] if a cursor is open on a
    /// written table, or with a storage error if the log append fails. In
    /// both cases nothing is applied and the log is left as it was.
    pub fn commit(self) -> CoreResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        self.engine.commit_ops(&self.ops)
    }

    /// Discards all writes.
    pub fn abort(self) {}
}
