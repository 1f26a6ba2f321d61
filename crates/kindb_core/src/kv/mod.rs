//! Embedded key-value engine with unique and duplicate-key tables.

mod cursor;
mod engine;
mod log;

pub use cursor::{DupCursor, KvCursor};
pub use engine::{
    CompactStats, EngineOptions, KvEngine, KvTxn, RecoveryInfo, TableKind, TableSpec,
};
pub use log::{KvOp, LOG_MAGIC, LOG_VERSION};
