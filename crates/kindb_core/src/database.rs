//! Database facade.

use crate::cache::RecordCache;
use crate::config::Config;
use crate::cursor::RecordCursor;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::handle::Handle;
use crate::id_index::IdAllocator;
use crate::kv::{CompactStats, EngineOptions, KvEngine, RecoveryInfo};
use crate::model::{Gender, PrimaryObject, Record};
use crate::names::{self, GenderCounts};
use crate::notify::{group_events, ChangeEvent, Notifier, SubscriberError, SubscriptionId};
use crate::refmap::{
    self, Backlinks, CallbackError, RebuildOptions, RebuildProgress, RebuildStats, VerifyReport,
};
use crate::schema::{
    bookmarks_key, decode_handle_key, decode_handles, encode_handles, table_specs, META,
    META_DEFAULT_PERSON, META_NEEDS_REBUILD, REDO, REFERENCE_MAP, UNDO,
};
use std::collections::BTreeMap;
use crate::stats::{DatabaseStats, StatsSnapshot, StoreStats};
use crate::transaction::{CommitOutcome, HistoryItem, Transaction, TransactionManager};
use crate::types::{ObjectClass, TransactionId};
use kindb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// The main database handle.
///
/// `Database` is the primary entry point for interacting with kindb.
/// It provides:
/// - Transactions with undo and redo
/// - Typed and raw record access
/// - Backlink queries and reference map maintenance
/// - Per-class change notification
///
/// # Opening a Database
///
/// ```rust,no_run
/// use kindb_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("family-tree")).unwrap();
/// // ...
/// db.close().unwrap();
/// ```
///
/// # Recording Changes
///
/// ```rust
/// use kindb_core::{Database, ObjectClass};
/// use kindb_core::model::{Family, Person};
///
/// let db = Database::open_in_memory().unwrap();
/// let mut father = Person::new("Erik", "Holm");
/// let mut family = Family::new();
/// family.father_handle = Some(father.handle);
///
/// db.transaction("add family", |txn| {
///     db.add_object(txn, &mut father)?;
///     db.add_object(txn, &mut family)?;
///     Ok(())
/// })
/// .unwrap();
///
/// let links: Vec<_> = db
///     .find_backlinks(father.handle)
///     .unwrap()
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(links.len(), 1);
/// assert_eq!(links[0].class, ObjectClass::Family);
/// assert_eq!(father.id, "I0000");
/// ```
pub struct Database {
    config: Config,
    /// None for in-memory databases.
    dir: Option<StoreDir>,
    engine: Arc<KvEngine>,
    txns: TransactionManager,
    notifier: Notifier,
    cache: RecordCache,
    stats: DatabaseStats,
    needs_recovery: AtomicBool,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens or creates a store directory with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the store open ([`CoreError::Busy`])
    /// - The commit log is corrupt
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a store directory with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use kindb_core::{Config, Database};
    /// use std::path::Path;
    ///
    /// let config = Config::default().undo_capacity(50).read_only(true);
    /// let db = Database::open_with_config(Path::new("family-tree"), config).unwrap();
    /// ```
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing, config.read_only)?;
        let backend = FileBackend::open(&dir.log_path())?;
        Self::assemble(config, Some(dir), Box::new(backend))
    }

    /// Opens a database over an arbitrary log backend.
    ///
    /// No directory is locked and no recovery marker is kept.
    pub fn open_with_backend(config: Config, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        Self::assemble(config, None, backend)
    }

    /// Opens a fresh in-memory database. Data is lost when it is dropped.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Config::default(), Box::new(InMemoryBackend::new()))
    }

    fn assemble(
        config: Config,
        dir: Option<StoreDir>,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let options = EngineOptions {
            sync_on_commit: config.sync_on_commit,
            lock_timeout: config.lock_timeout,
            read_only: config.read_only,
        };
        let engine = Arc::new(KvEngine::open(backend, &table_specs(), options)?);

        let recovery = engine.recovery();
        let mut needs_recovery = dir.as_ref().is_some_and(StoreDir::needs_recovery);
        if recovery.discarded_bytes > 0 {
            tracing::warn!(
                bytes = recovery.discarded_bytes,
                "torn commit discarded from the log"
            );
            needs_recovery = true;
        }

        let ids = IdAllocator::load(&engine, &config)?;
        let txns = TransactionManager::new(Arc::clone(&engine), ids, config.undo_capacity);
        let cache = RecordCache::new(config.cache_capacity);

        tracing::info!(
            path = dir.as_ref().map(|d| d.path().display().to_string()),
            batches = recovery.batches,
            read_only = config.read_only,
            "store opened"
        );

        Ok(Self {
            config,
            dir,
            engine,
            txns,
            notifier: Notifier::new(),
            cache,
            stats: DatabaseStats::new(),
            needs_recovery: AtomicBool::new(needs_recovery),
            is_open: RwLock::new(true),
        })
    }

    // ----- transactions -------------------------------------------------

    /// Begins a write transaction.
    ///
    /// # Errors
    ///
    /// [`CoreError::Busy`] while another transaction is open,
    /// [`CoreError::InvalidOperation`] on a read-only store.
    pub fn begin(&self, description: &str) -> CoreResult<Transaction> {
        self.ensure_open()?;
        self.txns.begin(description, false)
    }

    /// Begins a bulk-import transaction.
    ///
    /// Its commit skips reference map maintenance and undo recording,
    /// clears the undo and redo stacks, and flags the reference map for
    /// rebuild.
    pub fn begin_batch(&self, description: &str) -> CoreResult<Transaction> {
        self.ensure_open()?;
        self.txns.begin(description, true)
    }

    /// Commits a transaction and notifies subscribers.
    ///
    /// On error the transaction is aborted and nothing of it is visible.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<TransactionId> {
        self.ensure_open()?;
        match self.txns.commit(txn) {
            Ok(outcome) => {
                self.stats.record_commit();
                Ok(self.after_write(outcome))
            }
            Err(err) => {
                self.stats.record_abort();
                Err(err)
            }
        }
    }

    /// Aborts a transaction.
    pub fn abort(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.ensure_open()?;
        self.txns.abort(txn)?;
        self.stats.record_abort();
        Ok(())
    }

    /// Runs `f` in a transaction, committing on `Ok` and aborting on `Err`.
    pub fn transaction<F, T>(&self, description: &str, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let mut txn = self.begin(description)?;
        match f(&mut txn) {
            Ok(value) => {
                if txn.is_open() {
                    self.commit(&mut txn)?;
                }
                Ok(value)
            }
            Err(err) => {
                if txn.is_open() {
                    self.abort(&mut txn)?;
                }
                Err(err)
            }
        }
    }

    /// Reverts the most recent committed transaction.
    ///
    /// Returns false if there is nothing to undo.
    pub fn undo(&self) -> CoreResult<bool> {
        self.ensure_open()?;
        match self.txns.undo()? {
            Some(outcome) => {
                self.stats.record_undo();
                self.after_write(outcome);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-applies the most recently undone transaction.
    ///
    /// Returns false if there is nothing to redo.
    pub fn redo(&self) -> CoreResult<bool> {
        self.ensure_open()?;
        match self.txns.redo()? {
            Some(outcome) => {
                self.stats.record_redo();
                self.after_write(outcome);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// True if [`Database::undo`] would do something.
    pub fn can_undo(&self) -> CoreResult<bool> {
        self.ensure_open()?;
        self.txns.can_undo()
    }

    /// True if [`Database::redo`] would do something.
    pub fn can_redo(&self) -> CoreResult<bool> {
        self.ensure_open()?;
        self.txns.can_redo()
    }

    /// Undoable transactions, newest first.
    pub fn undo_history(&self) -> CoreResult<Vec<HistoryItem>> {
        self.ensure_open()?;
        self.txns.undo_history()
    }

    fn after_write(&self, outcome: CommitOutcome) -> TransactionId {
        for change in &outcome.changes {
            self.cache.invalidate(change.class, change.handle);
        }
        let events = group_events(outcome.txn_id, outcome.source, &outcome.changes);
        self.stats.record_notifications(events.len());
        self.notifier.publish(&events);
        outcome.txn_id
    }

    // ----- typed writes -------------------------------------------------

    /// Records the creation of an object, assigning the next free ID if
    /// its ID is empty.
    pub fn add_object<T: PrimaryObject>(
        &self,
        txn: &mut Transaction,
        object: &mut T,
    ) -> CoreResult<Handle> {
        txn.ensure_open()?;
        if object.id().is_empty() {
            object.set_id(self.next_id_in(txn, T::CLASS)?);
        }
        txn.add(T::CLASS, object.handle(), object.encode())?;
        Ok(object.handle())
    }

    /// Records the replacement of an object by `object`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the object neither exists nor was added
    /// earlier in `txn`.
    pub fn update_object<T: PrimaryObject>(
        &self,
        txn: &mut Transaction,
        object: &T,
    ) -> CoreResult<()> {
        let old = self.current_payload(txn, T::CLASS, object.handle())?;
        txn.update(T::CLASS, object.handle(), old, object.encode())
    }

    /// [`Database::add_object`] for a record of any class.
    pub fn add_record(&self, txn: &mut Transaction, record: &mut Record) -> CoreResult<Handle> {
        txn.ensure_open()?;
        if record.id().is_empty() {
            record.set_id(self.next_id_in(txn, record.class())?);
        }
        txn.add(record.class(), record.handle(), record.encode())?;
        Ok(record.handle())
    }

    /// [`Database::update_object`] for a record of any class.
    pub fn update_record(&self, txn: &mut Transaction, record: &Record) -> CoreResult<()> {
        let old = self.current_payload(txn, record.class(), record.handle())?;
        txn.update(record.class(), record.handle(), old, record.encode())
    }

    /// Records the removal of an object.
    pub fn remove_object(
        &self,
        txn: &mut Transaction,
        class: ObjectClass,
        handle: Handle,
    ) -> CoreResult<()> {
        let old = self.current_payload(txn, class, handle)?;
        txn.delete(class, handle, old)
    }

    /// Reads a record as the transaction would see it.
    pub fn get_in_txn(
        &self,
        txn: &Transaction,
        class: ObjectClass,
        handle: Handle,
    ) -> CoreResult<Option<Record>> {
        self.ensure_open()?;
        match txn.pending(class, handle) {
            Some(Some(payload)) => Record::decode(class, payload).map(Some),
            Some(None) => Ok(None),
            None => self.get(class, handle),
        }
    }

    fn current_payload(
        &self,
        txn: &Transaction,
        class: ObjectClass,
        handle: Handle,
    ) -> CoreResult<Vec<u8>> {
        self.ensure_open()?;
        txn.ensure_open()?;
        let current = match txn.pending(class, handle) {
            Some(pending) => pending.map(<[u8]>::to_vec),
            None => self.engine.get(class.name(), handle.as_bytes())?,
        };
        current.ok_or(CoreError::NotFound { class, handle })
    }

    fn next_id_in(&self, txn: &Transaction, class: ObjectClass) -> CoreResult<String> {
        self.ensure_open()?;
        self.txns.ids().next_id(class, |id| {
            Ok(txn.writes_id(class, id)
                || self.engine.contains_key(class.id_table(), id.as_bytes())?)
        })
    }

    // ----- reads --------------------------------------------------------

    /// Reads a committed record.
    pub fn get(&self, class: ObjectClass, handle: Handle) -> CoreResult<Option<Record>> {
        self.ensure_open()?;
        let record = self.cache.get_or_load(class, handle, || {
            self.engine
                .get(class.name(), handle.as_bytes())?
                .map(|payload| Record::decode(class, &payload))
                .transpose()
        })?;
        Ok(record.map(Arc::unwrap_or_clone))
    }

    /// Reads a committed record as its concrete type.
    pub fn get_object<T: PrimaryObject>(&self, handle: Handle) -> CoreResult<Option<T>> {
        Ok(self.get(T::CLASS, handle)?.and_then(T::from_record))
    }

    /// Reads a committed payload without decoding it.
    pub fn get_raw(&self, class: ObjectClass, handle: Handle) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.engine.get(class.name(), handle.as_bytes())
    }

    /// Looks up the handle that owns an ID.
    pub fn handle_for_id(&self, class: ObjectClass, id: &str) -> CoreResult<Option<Handle>> {
        self.ensure_open()?;
        self.engine
            .get(class.id_table(), id.as_bytes())?
            .map(|bytes| decode_handle_key(&bytes))
            .transpose()
    }

    /// Reads the committed record that owns an ID.
    pub fn get_by_id(&self, class: ObjectClass, id: &str) -> CoreResult<Option<Record>> {
        match self.handle_for_id(class, id)? {
            Some(handle) => self.get(class, handle),
            None => Ok(None),
        }
    }

    /// True if a committed record has this handle.
    pub fn has_handle(&self, class: ObjectClass, handle: Handle) -> CoreResult<bool> {
        self.ensure_open()?;
        self.engine.contains_key(class.name(), handle.as_bytes())
    }

    /// True if a committed record has this ID.
    pub fn has_id(&self, class: ObjectClass, id: &str) -> CoreResult<bool> {
        self.ensure_open()?;
        self.engine.contains_key(class.id_table(), id.as_bytes())
    }

    /// Number of committed records of a class.
    pub fn count(&self, class: ObjectClass) -> CoreResult<usize> {
        self.ensure_open()?;
        self.engine.len(class.name())
    }

    /// The next unused ID of a class.
    ///
    /// The class counter advances past the returned ID, so successive calls
    /// return distinct IDs even before anything is committed.
    pub fn find_next_id(&self, class: ObjectClass) -> CoreResult<String> {
        self.ensure_open()?;
        self.txns.ids().next_id(class, |id| {
            self.engine.contains_key(class.id_table(), id.as_bytes())
        })
    }

    /// Opens a cursor over the committed records of a class.
    ///
    /// # Errors
    ///
    /// [`CoreError::CursorConflict`] if the open transaction has already
    /// recorded a change of this class.
    pub fn cursor(&self, class: ObjectClass) -> CoreResult<RecordCursor<'_>> {
        self.ensure_open()?;
        Ok(RecordCursor::new(class, self.engine.cursor(class.name())?))
    }

    // ----- person names -------------------------------------------------

    /// Distinct primary surnames in use, in byte order.
    pub fn surnames(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        names::surnames(&self.engine)
    }

    /// People whose primary surname is exactly `surname`.
    pub fn people_with_surname(&self, surname: &str) -> CoreResult<Vec<Handle>> {
        self.ensure_open()?;
        names::people_with_surname(&self.engine, surname)
    }

    /// Groups `surname` under `group`, or ungroups it with `None`.
    ///
    /// Groupings are settings: they are saved immediately and are not part
    /// of the undo history.
    pub fn set_name_group(&self, surname: &str, group: Option<&str>) -> CoreResult<()> {
        self.ensure_open()?;
        self.txns.write_settings("name group", |kv| {
            names::set_name_group(kv, surname, group)
        })
    }

    /// The group `surname` belongs to, if one was set.
    pub fn name_group(&self, surname: &str) -> CoreResult<Option<String>> {
        self.ensure_open()?;
        names::name_group(&self.engine, surname)
    }

    /// Every surname grouping.
    pub fn name_groups(&self) -> CoreResult<BTreeMap<String, String>> {
        self.ensure_open()?;
        names::name_groups(&self.engine)
    }

    /// How often people with this first given name were recorded with each
    /// gender.
    pub fn gender_counts(&self, first_name: &str) -> CoreResult<GenderCounts> {
        self.ensure_open()?;
        names::gender_counts(&self.engine, first_name)
    }

    /// Best guess for the gender of a new person with this first name.
    pub fn guess_gender(&self, first_name: &str) -> CoreResult<Gender> {
        Ok(self.gender_counts(first_name)?.guess())
    }

    // ----- store settings -----------------------------------------------

    /// Sets or clears the home person of the tree.
    ///
    /// Deleting that person clears the setting in the same commit.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if `handle` is not a live person.
    pub fn set_default_person(&self, handle: Option<Handle>) -> CoreResult<()> {
        self.ensure_open()?;
        if let Some(handle) = handle {
            if !self.has_handle(ObjectClass::Person, handle)? {
                return Err(CoreError::NotFound {
                    class: ObjectClass::Person,
                    handle,
                });
            }
        }
        self.txns.write_settings("default person", |kv| match handle {
            Some(handle) => kv.put(META, META_DEFAULT_PERSON, handle.as_bytes()),
            None => kv.delete(META, META_DEFAULT_PERSON),
        })
    }

    /// The home person, if set.
    pub fn default_person(&self) -> CoreResult<Option<Handle>> {
        self.ensure_open()?;
        self.engine
            .get(META, META_DEFAULT_PERSON)?
            .map(|bytes| decode_handle_key(&bytes))
            .transpose()
    }

    /// Replaces the bookmarks of a class.
    pub fn set_bookmarks(&self, class: ObjectClass, handles: &[Handle]) -> CoreResult<()> {
        self.ensure_open()?;
        self.txns.write_settings("bookmarks", |kv| {
            kv.put(META, &bookmarks_key(class), &encode_handles(handles))
        })
    }

    /// Bookmarked handles of a class, in the order they were saved.
    pub fn bookmarks(&self, class: ObjectClass) -> CoreResult<Vec<Handle>> {
        self.ensure_open()?;
        match self.engine.get(META, &bookmarks_key(class))? {
            Some(bytes) => decode_handles(&bytes),
            None => Ok(Vec::new()),
        }
    }

    // ----- reference map ------------------------------------------------

    /// Every object currently referencing `handle`, read lazily.
    ///
    /// # Errors
    ///
    /// [`CoreError::RebuildRequired`] while the reference map is flagged
    /// stale.
    pub fn find_backlinks(&self, handle: Handle) -> CoreResult<Backlinks<'_>> {
        self.ensure_open()?;
        if self.needs_rebuild()? {
            return Err(CoreError::RebuildRequired);
        }
        Backlinks::open(&self.engine, handle, None)
    }

    /// Like [`Database::find_backlinks`], keeping only referencing objects
    /// of the given classes.
    pub fn find_backlinks_in(
        &self,
        handle: Handle,
        classes: &[ObjectClass],
    ) -> CoreResult<Backlinks<'_>> {
        self.ensure_open()?;
        if self.needs_rebuild()? {
            return Err(CoreError::RebuildRequired);
        }
        Backlinks::open(&self.engine, handle, Some(classes))
    }

    /// True while the reference map is flagged stale.
    pub fn needs_rebuild(&self) -> CoreResult<bool> {
        Ok(self.engine.get(META, META_NEEDS_REBUILD)?.is_some())
    }

    /// Recomputes the reference map from every live record.
    ///
    /// `progress` is called every `progress_interval` records and after
    /// each class. Returning `Err` from it cancels the rebuild with
    /// [`CoreError::RebuildAborted`], leaving the map cleared and flagged.
    pub fn rebuild<F>(&self, options: RebuildOptions, progress: F) -> CoreResult<RebuildStats>
    where
        F: FnMut(&RebuildProgress) -> Result<(), CallbackError>,
    {
        self.ensure_open()?;
        let _lease = self.txns.acquire_lease()?;
        let stats = refmap::rebuild(
            &self.engine,
            self.config.progress_interval,
            options,
            progress,
        )?;
        self.stats.record_rebuild();
        self.needs_recovery.store(false, Ordering::Release);
        Ok(stats)
    }

    /// Cross-checks the stored reference map against a recomputation.
    pub fn verify_reference_map(&self) -> CoreResult<VerifyReport> {
        self.ensure_open()?;
        refmap::verify(&self.engine, self.needs_rebuild()?)
    }

    /// SHA-256 over the stored reference map.
    pub fn reference_map_digest(&self) -> CoreResult<[u8; 32]> {
        self.ensure_open()?;
        refmap::digest(&self.engine)
    }

    // ----- notification -------------------------------------------------

    /// Calls `callback` after every commit, undo or redo that changes
    /// records of `class`.
    pub fn subscribe<F>(&self, class: ObjectClass, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.notifier.subscribe(class, callback)
    }

    /// Delivers the events of `class` over a channel.
    pub fn subscribe_channel(&self, class: ObjectClass) -> Receiver<ChangeEvent> {
        self.notifier.subscribe_channel(class)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // ----- lifecycle ----------------------------------------------------

    /// True if the previous session ended without a clean close, or a torn
    /// commit was discarded at open. Cleared by a completed rebuild.
    #[must_use]
    pub fn needs_recovery(&self) -> bool {
        self.needs_recovery.load(Ordering::Acquire)
    }

    /// How the commit log was replayed at open.
    #[must_use]
    pub fn recovery_info(&self) -> RecoveryInfo {
        self.engine.recovery()
    }

    /// Rewrites the commit log as a single snapshot batch.
    pub fn compact(&self) -> CoreResult<CompactStats> {
        self.ensure_open()?;
        let _lease = self.txns.acquire_lease()?;
        match &self.dir {
            Some(dir) => self.engine.compact_with(|bytes| {
                let path = dir.replace_log(bytes)?;
                let backend: Box<dyn StorageBackend> = Box::new(FileBackend::open(&path)?);
                Ok(Some(backend))
            }),
            None => self.engine.compact_with(|_| Ok(None)),
        }
    }

    /// Persisted counts and flags.
    pub fn store_stats(&self) -> CoreResult<StoreStats> {
        self.ensure_open()?;
        let mut records = std::collections::BTreeMap::new();
        for class in ObjectClass::ALL {
            records.insert(class, self.engine.len(class.name())?);
        }
        Ok(StoreStats {
            records,
            reference_entries: self.engine.len(REFERENCE_MAP)?,
            undo_depth: self.engine.len(UNDO)?,
            redo_depth: self.engine.len(REDO)?,
            needs_rebuild: self.needs_rebuild()?,
            needs_recovery: self.needs_recovery(),
            log_bytes: self.engine.log_size()?,
            cache: self.cache.stats(),
        })
    }

    /// Activity counters since open.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the store directory, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Closes the database.
    ///
    /// Drops the record cache and removes the recovery marker. Calling it
    /// twice is harmless.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.cache.clear();
        if let Some(dir) = &self.dir {
            dir.clear_recovery_marker()?;
        }
        *is_open = false;
        tracing::info!("store closed");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "store did not close cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, EventRef, Family, Note, Person};
    use crate::refmap::Backlink;
    use crate::types::ChangeOp;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn create_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn backlinks(db: &Database, handle: Handle) -> Vec<Backlink> {
        db.find_backlinks(handle)
            .unwrap()
            .collect::<CoreResult<Vec<_>>>()
            .unwrap()
    }

    fn add<T: PrimaryObject>(db: &Database, object: &mut T) -> Handle {
        db.transaction("add", |txn| db.add_object(txn, object)).unwrap()
    }

    #[test]
    fn add_assigns_ids_and_indexes_them() {
        let db = create_db();
        let mut first = Person::new("Anna", "Sund");
        let mut second = Person::new("Per", "Sund");
        db.transaction("two people", |txn| {
            db.add_object(txn, &mut first)?;
            db.add_object(txn, &mut second)
        })
        .unwrap();

        assert_eq!(first.id, "I0000");
        assert_eq!(second.id, "I0001");
        assert_eq!(db.handle_for_id(ObjectClass::Person, "I0001").unwrap(), Some(second.handle));
        assert_eq!(
            db.get_by_id(ObjectClass::Person, "I0000").unwrap(),
            Some(Record::Person(first.clone()))
        );
        assert_eq!(db.get_object::<Person>(first.handle).unwrap(), Some(first));
        assert_eq!(db.count(ObjectClass::Person).unwrap(), 2);
        assert_eq!(db.find_next_id(ObjectClass::Person).unwrap(), "I0002");
    }

    #[test]
    fn scenario_backlinks_follow_add_delete_undo_and_update() {
        let db = create_db();
        let mut a = Person::new("Axel", "Moe");
        add(&db, &mut a);
        let mut f = Family::new();
        f.father_handle = Some(a.handle);
        add(&db, &mut f);

        let expected = vec![Backlink {
            class: ObjectClass::Family,
            handle: f.handle,
        }];
        assert_eq!(backlinks(&db, a.handle), expected);

        db.transaction("remove family", |txn| {
            db.remove_object(txn, ObjectClass::Family, f.handle)
        })
        .unwrap();
        assert!(backlinks(&db, a.handle).is_empty());

        assert!(db.undo().unwrap());
        assert_eq!(backlinks(&db, a.handle), expected);
        assert!(db.has_handle(ObjectClass::Family, f.handle).unwrap());

        f.father_handle = None;
        f.mother_handle = Some(a.handle);
        db.transaction("swap parent", |txn| db.update_object(txn, &f))
            .unwrap();
        assert_eq!(backlinks(&db, a.handle), expected);
        assert!(db.verify_reference_map().unwrap().is_consistent());
    }

    #[test]
    fn undo_then_redo_restores_state() {
        let db = create_db();
        let mut note = Note::new("draft");
        add(&db, &mut note);
        let before = db.get(ObjectClass::Note, note.handle).unwrap();

        note.text = "final".to_string();
        db.transaction("edit", |txn| db.update_object(txn, &note))
            .unwrap();
        let after = db.get(ObjectClass::Note, note.handle).unwrap();

        assert!(db.undo().unwrap());
        assert_eq!(db.get(ObjectClass::Note, note.handle).unwrap(), before);
        assert!(db.redo().unwrap());
        assert_eq!(db.get(ObjectClass::Note, note.handle).unwrap(), after);
        assert!(!db.redo().unwrap());
        assert_eq!(db.undo_history().unwrap()[0].description, "edit");
    }

    #[test]
    fn second_writer_is_busy() {
        let db = create_db();
        let mut txn = db.begin("first").unwrap();
        assert!(db.begin("second").unwrap_err().is_retryable());
        assert!(db
            .rebuild(RebuildOptions::default(), |_| Ok(()))
            .unwrap_err()
            .is_retryable());
        db.abort(&mut txn).unwrap();
        assert!(db.begin("third").is_ok());
    }

    #[test]
    fn closed_transaction_is_rejected() {
        let db = create_db();
        let mut txn = db.begin("once").unwrap();
        db.commit(&mut txn).unwrap();
        let mut note = Note::new("late");
        let err = db.add_object(&mut txn, &mut note).unwrap_err();
        assert!(matches!(err, CoreError::TransactionClosed { .. }));
        assert!(db.commit(&mut txn).unwrap_err().is_programmer_error());
    }

    #[test]
    fn cursor_blocks_conflicting_commit() {
        let db = create_db();
        let mut note = Note::new("one");
        add(&db, &mut note);

        let cursor = db.cursor(ObjectClass::Note).unwrap();
        let mut txn = db.begin("blocked").unwrap();
        let mut other = Note::new("two");
        let err = db.add_object(&mut txn, &mut other).unwrap_err();
        assert!(matches!(err, CoreError::CursorConflict { .. }));

        let records: Vec<_> = cursor.collect::<CoreResult<Vec<_>>>().unwrap();
        assert_eq!(records.len(), 1);
        db.add_object(&mut txn, &mut other).unwrap();
        db.commit(&mut txn).unwrap();
        assert_eq!(db.count(ObjectClass::Note).unwrap(), 2);
    }

    #[test]
    fn open_backlink_scan_blocks_commit_that_touches_reference_map() {
        let db = create_db();
        let mut a = Person::new("Lo", "Ek");
        add(&db, &mut a);

        let scan = db.find_backlinks(a.handle).unwrap();
        let mut f = Family::new();
        f.father_handle = Some(a.handle);
        let mut txn = db.begin("blocked").unwrap();
        db.add_object(&mut txn, &mut f).unwrap();
        let err = db.commit(&mut txn).unwrap_err();
        assert!(matches!(err, CoreError::CursorConflict { table: REFERENCE_MAP }));
        assert!(!db.has_handle(ObjectClass::Family, f.handle).unwrap());

        scan.close();
        add(&db, &mut f);
        assert_eq!(backlinks(&db, a.handle).len(), 1);
    }

    #[test]
    fn batch_requires_rebuild_before_backlinks() {
        let db = create_db();
        let mut a = Person::new("Ida", "Borg");
        let mut f = Family::new();
        f.father_handle = Some(a.handle);

        let mut txn = db.begin_batch("import").unwrap();
        db.add_object(&mut txn, &mut a).unwrap();
        db.add_object(&mut txn, &mut f).unwrap();
        db.commit(&mut txn).unwrap();

        assert!(matches!(
            db.find_backlinks(a.handle).unwrap_err(),
            CoreError::RebuildRequired
        ));
        assert!(!db.can_undo().unwrap());

        let mut reports = Vec::new();
        let stats = db
            .rebuild(RebuildOptions::default(), |p| {
                reports.push(p.class);
                Ok(())
            })
            .unwrap();
        assert_eq!(stats.total_scanned(), 2);
        assert_eq!(reports.len(), ObjectClass::ALL.len());
        assert_eq!(backlinks(&db, a.handle).len(), 1);
    }

    #[test]
    fn subscribers_see_committed_changes_only() {
        let db = create_db();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        db.subscribe(ObjectClass::Event, move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        db.subscribe(ObjectClass::Event, |_| panic!("broken subscriber"));

        let mut event = Event::new("Birth");
        let mut aborted = db.begin("aborted").unwrap();
        db.add_object(&mut aborted, &mut event).unwrap();
        db.abort(&mut aborted).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        add(&db, &mut event);
        assert!(db.undo().unwrap());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].handles(ChangeOp::Add).collect::<Vec<_>>(), vec![event.handle]);
        assert_eq!(seen[1].handles(ChangeOp::Delete).collect::<Vec<_>>(), vec![event.handle]);
        assert_eq!(db.stats().undos, 1);
    }

    #[test]
    fn get_in_txn_sees_pending_changes() {
        let db = create_db();
        let mut person = Person::new("Tor", "Vik");
        let mut txn = db.begin("pending").unwrap();
        db.add_object(&mut txn, &mut person).unwrap();

        assert!(db.get(ObjectClass::Person, person.handle).unwrap().is_none());
        assert!(db
            .get_in_txn(&txn, ObjectClass::Person, person.handle)
            .unwrap()
            .is_some());

        let event = Event::new("Census");
        person.event_ref_list.push(EventRef {
            handle: event.handle,
            role: "Primary".to_string(),
        });
        db.update_object(&mut txn, &person).unwrap();
        assert_eq!(txn.len(), 2);
        db.abort(&mut txn).unwrap();
    }

    #[test]
    fn duplicate_id_fails_whole_commit() {
        let db = create_db();
        let mut first = Note::new("a");
        add(&db, &mut first);

        let mut clash = Note::new("b");
        clash.id = first.id.clone();
        let err = db
            .transaction("clash", |txn| db.add_object(txn, &mut clash))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateId { .. }));
        assert_eq!(db.count(ObjectClass::Note).unwrap(), 1);
        assert_eq!(db.stats().transactions_aborted, 1);
    }

    #[test]
    fn closed_database_rejects_operations() {
        let db = create_db();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.begin("x").unwrap_err(), CoreError::DatabaseClosed));
        assert!(matches!(
            db.get(ObjectClass::Note, Handle::new()).unwrap_err(),
            CoreError::DatabaseClosed
        ));
        db.close().unwrap();
    }

    #[test]
    fn persistent_store_reopens_with_state_and_recovery_flag() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("tree");
        let mut a = Person::new("Siv", "Ask");
        let mut f = Family::new();
        f.father_handle = Some(a.handle);

        {
            let db = Database::open(&path).unwrap();
            add(&db, &mut a);
            add(&db, &mut f);
            assert!(!db.needs_recovery());
            db.close().unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert!(!db.needs_recovery());
        assert_eq!(backlinks(&db, a.handle).len(), 1);
        assert!(db.can_undo().unwrap());
        assert_eq!(db.find_next_id(ObjectClass::Person).unwrap(), "I0001");
        assert!(Database::open(&path).unwrap_err().is_retryable());

        let digest = db.reference_map_digest().unwrap();
        let compacted = db.compact().unwrap();
        assert!(compacted.after <= compacted.before);
        drop(db);

        let db = Database::open(&path).unwrap();
        assert_eq!(db.reference_map_digest().unwrap(), digest);
        assert_eq!(db.count(ObjectClass::Family).unwrap(), 1);
    }

    #[test]
    fn leftover_marker_sets_needs_recovery_until_rebuild() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("crash");
        {
            let db = Database::open(&path).unwrap();
            add(&db, &mut Note::new("kept"));
        }
        // A crashed session leaves the marker behind.
        std::fs::write(path.join("RECOVER"), b"").unwrap();

        let db = Database::open(&path).unwrap();
        assert!(db.needs_recovery());
        assert!(db.store_stats().unwrap().needs_recovery);
        assert_eq!(db.count(ObjectClass::Note).unwrap(), 1);
        db.rebuild(RebuildOptions::default(), |_| Ok(())).unwrap();
        assert!(!db.needs_recovery());
        assert_eq!(db.stats().rebuilds, 1);
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("ro");
        {
            let db = Database::open(&path).unwrap();
            add(&db, &mut Note::new("x"));
        }
        let db = Database::open_with_config(&path, Config::default().read_only(true)).unwrap();
        assert_eq!(db.count(ObjectClass::Note).unwrap(), 1);
        assert!(matches!(
            db.begin("w").unwrap_err(),
            CoreError::InvalidOperation { .. }
        ));
        assert!(db.undo().is_err());
    }

    #[test]
    fn concurrent_readers_never_pin_superseded_records() {
        let db = Database::open_with_backend(
            Config::default().cache_capacity(1),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap();
        let mut note = Note::new("v0");
        let mut other = Note::new("other");
        add(&db, &mut note);
        add(&db, &mut other);
        let (target, filler) = (note.handle, other.handle);
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    db.get(ObjectClass::Note, filler).unwrap();
                    db.get(ObjectClass::Note, target).unwrap();
                }
            });
            for round in 1..=200 {
                note.text = format!("v{round}");
                db.transaction("edit", |txn| db.update_object(txn, &note))
                    .unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        let committed = db.get_raw(ObjectClass::Note, note.handle).unwrap().unwrap();
        assert_eq!(
            db.get(ObjectClass::Note, note.handle).unwrap(),
            Some(Record::decode(ObjectClass::Note, &committed).unwrap())
        );
        assert_eq!(
            db.get_object::<Note>(note.handle).unwrap().unwrap().text,
            "v200"
        );
    }

    #[test]
    fn backlinks_can_be_limited_to_classes() {
        let db = create_db();
        let mut event = Event::new("Marriage");
        add(&db, &mut event);
        let role = EventRef {
            handle: event.handle,
            role: "Family".to_string(),
        };
        let mut person = Person::new("Eva", "Holm");
        person.event_ref_list.push(role.clone());
        let mut family = Family::new();
        family.event_ref_list.push(role);
        add(&db, &mut person);
        add(&db, &mut family);

        let only_families: Vec<Backlink> = db
            .find_backlinks_in(event.handle, &[ObjectClass::Family])
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(
            only_families,
            vec![Backlink {
                class: ObjectClass::Family,
                handle: family.handle,
            }]
        );
        assert_eq!(backlinks(&db, event.handle).len(), 2);
        assert_eq!(
            db.find_backlinks_in(event.handle, &[ObjectClass::Note])
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn surname_index_follows_commit_undo_and_redo() {
        let db = create_db();
        let mut anna = Person::new("Anna", "Berg");
        let mut olof = Person::new("Olof", "Berg");
        add(&db, &mut anna);
        add(&db, &mut olof);
        assert_eq!(db.surnames().unwrap(), vec!["Berg"]);
        assert_eq!(db.people_with_surname("Berg").unwrap().len(), 2);

        olof.primary_name.surname = "Ek".to_string();
        db.transaction("rename", |txn| db.update_object(txn, &olof))
            .unwrap();
        assert_eq!(db.surnames().unwrap(), vec!["Berg", "Ek"]);
        assert_eq!(db.people_with_surname("Ek").unwrap(), vec![olof.handle]);

        assert!(db.undo().unwrap());
        assert_eq!(db.surnames().unwrap(), vec!["Berg"]);
        assert!(db.people_with_surname("Ek").unwrap().is_empty());

        assert!(db.redo().unwrap());
        assert_eq!(db.people_with_surname("Berg").unwrap(), vec![anna.handle]);

        db.transaction("remove", |txn| {
            db.remove_object(txn, ObjectClass::Person, anna.handle)?;
            db.remove_object(txn, ObjectClass::Person, olof.handle)
        })
        .unwrap();
        assert!(db.surnames().unwrap().is_empty());
        assert_eq!(db.gender_counts("Anna").unwrap(), GenderCounts::default());
    }

    #[test]
    fn gender_counts_feed_guesses() {
        let db = create_db();
        for given in ["Lars", "Lars Erik"] {
            let mut person = Person::new(given, "Holm");
            person.gender = Gender::Male;
            add(&db, &mut person);
        }
        assert_eq!(db.gender_counts("Lars").unwrap().male, 2);
        assert_eq!(db.guess_gender("Lars").unwrap(), Gender::Male);
        assert_eq!(db.guess_gender("Stina").unwrap(), Gender::Unknown);
    }

    #[test]
    fn name_groups_are_settings_outside_undo() {
        let db = create_db();
        db.set_name_group("Bergh", Some("Berg")).unwrap();
        assert_eq!(db.name_group("Bergh").unwrap().as_deref(), Some("Berg"));
        assert!(!db.can_undo().unwrap());

        let txn = db.begin("busy").unwrap();
        assert!(db.set_name_group("Ek", Some("Eek")).unwrap_err().is_retryable());
        drop(txn);

        db.set_name_group("Bergh", None).unwrap();
        assert!(db.name_groups().unwrap().is_empty());
    }

    #[test]
    fn default_person_and_bookmarks_persist() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("tree");
        let mut home = Person::new("Nils", "Dahl");
        let mut other = Person::new("Maja", "Dahl");
        {
            let db = Database::open(&path).unwrap();
            add(&db, &mut home);
            add(&db, &mut other);
            assert!(matches!(
                db.set_default_person(Some(Handle::new())).unwrap_err(),
                CoreError::NotFound { .. }
            ));
            db.set_default_person(Some(home.handle)).unwrap();
            db.set_bookmarks(ObjectClass::Person, &[other.handle, home.handle])
                .unwrap();
            db.close().unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.default_person().unwrap(), Some(home.handle));
        assert_eq!(
            db.bookmarks(ObjectClass::Person).unwrap(),
            vec![other.handle, home.handle]
        );
        assert!(db.bookmarks(ObjectClass::Family).unwrap().is_empty());

        db.transaction("remove home", |txn| {
            db.remove_object(txn, ObjectClass::Person, home.handle)
        })
        .unwrap();
        assert_eq!(db.default_person().unwrap(), None);
    }
}
