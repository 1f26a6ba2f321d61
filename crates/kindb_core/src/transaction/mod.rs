//! Transactions with undo and redo.
//!
//! kindb transactions provide:
//! - **Atomicity**: a commit writes records, ID index, reference map and
//!   history in one engine batch
//! - **Single writer**: a second open transaction fails with `Busy`
//! - **Bounded history**: committed transactions can be undone and redone
//!   up to the configured depth

mod history;
mod manager;
mod state;

pub use history::HistoryItem;
pub(crate) use manager::{CommitOutcome, TransactionManager};
pub use state::{ChangeRecord, Transaction, TransactionState};
