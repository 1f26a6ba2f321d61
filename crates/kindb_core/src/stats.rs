//! Store statistics.
//!
//! Two kinds of numbers: [`StoreStats`] describes what is persisted right
//! now, [`DatabaseStats`] counts what this handle has done since open.
//!
//! # Usage
//!
//! ```rust
//! use kindb_core::{Database, ObjectClass};
//!
//! let db = Database::open_in_memory().unwrap();
//! let stats = db.store_stats().unwrap();
//! assert_eq!(stats.records[&ObjectClass::Person], 0);
//! assert_eq!(db.stats().transactions_committed, 0);
//! ```

use crate::cache::CacheStats;
use crate::types::ObjectClass;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Activity counters of one open database handle.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    undos: AtomicU64,
    redos: AtomicU64,
    rebuilds: AtomicU64,
    notifications: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_undo(&self) {
        self.undos.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redo(&self) {
        self.redos.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rebuild(&self) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_notifications(&self, events: usize) {
        self.notifications
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            undos: self.undos.load(Ordering::Relaxed),
            redos: self.redos.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`DatabaseStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Transactions committed, batch commits included.
    pub transactions_committed: u64,
    /// Transactions aborted, failed commits included.
    pub transactions_aborted: u64,
    /// Successful undos.
    pub undos: u64,
    /// Successful redos.
    pub redos: u64,
    /// Completed reference map rebuilds.
    pub rebuilds: u64,
    /// Change events published.
    pub notifications: u64,
}

/// What the store holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Live records per class.
    pub records: BTreeMap<ObjectClass, usize>,
    /// Reference map entries.
    pub reference_entries: usize,
    /// Undoable transactions.
    pub undo_depth: usize,
    /// Redoable transactions.
    pub redo_depth: usize,
    /// The persistent rebuild flag.
    pub needs_rebuild: bool,
    /// A recovery marker was found at open.
    pub needs_recovery: bool,
    /// Commit log size in bytes.
    pub log_bytes: u64,
    /// Record cache counters.
    pub cache: CacheStats,
}

impl StoreStats {
    /// Live records across all classes.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.records.values().sum()
    }
}
