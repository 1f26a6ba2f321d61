//! # kindb Core
//!
//! Object store for genealogy data.
//!
//! This crate provides:
//! - A transactional key-value engine with duplicate-key tables over an
//!   append-only commit log
//! - Primary tables for the nine object classes, keyed by handle
//! - A per-class ID index and ID allocation
//! - A reference map answering "who points at this object" in one lookup
//! - Bounded persistent undo and redo
//! - Per-class change notification after commit
//!
//! # Example
//!
//! ```rust
//! use kindb_core::{Database, ObjectClass};
//! use kindb_core::model::Person;
//!
//! let db = Database::open_in_memory().unwrap();
//! let mut person = Person::new("Karin", "Dahl");
//! db.transaction("add person", |txn| db.add_object(txn, &mut person))
//!     .unwrap();
//!
//! assert_eq!(db.count(ObjectClass::Person).unwrap(), 1);
//! assert!(db.undo().unwrap());
//! assert_eq!(db.count(ObjectClass::Person).unwrap(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod cursor;
mod database;
mod dir;
mod error;
mod handle;
mod id_index;
pub mod kv;
pub mod model;
mod names;
mod notify;
mod refmap;
pub mod schema;
mod stats;
mod transaction;
mod types;

pub use cache::{CacheStats, RecordCache};
pub use config::Config;
pub use cursor::RecordCursor;
pub use database::Database;
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use handle::{Handle, ParseHandleError, HANDLE_LEN};
pub use id_index::format_id;
pub use names::GenderCounts;
pub use notify::{ChangeEvent, ChangeSource, Notifier, SubscriberError, SubscriptionId};
pub use refmap::{
    apply_delta, Backlink, Backlinks, CallbackError, DanglingReference, RebuildOptions,
    RebuildProgress, RebuildStats, RefMapEntry, VerifyReport,
};
pub use stats::{DatabaseStats, StatsSnapshot, StoreStats};
pub use transaction::{ChangeRecord, HistoryItem, Transaction, TransactionState};
pub use types::{ChangeOp, ObjectClass, TransactionId};

pub use kindb_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
