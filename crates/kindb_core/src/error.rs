//! Error types for kindb core.

use crate::handle::Handle;
use crate::types::{ObjectClass, TransactionId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in kindb core operations.
///
/// A failed commit is always reported as "the requested change was not
/// saved" together with the variant below; nothing of the transaction is
/// visible afterwards.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stored payload could not be decoded.
    ///
    /// Scans may skip these and continue.
    #[error("corrupt {class} record {}: {message}", fmt_handle(.handle))]
    CorruptRecord {
        /// Class of the record.
        class: ObjectClass,
        /// Handle of the record, if it could be determined.
        handle: Option<Handle>,
        /// What was wrong with the bytes.
        message: String,
    },

    /// Storage backend failure. Fatal to the current operation only.
    #[error("storage error: {0}")]
    Storage(#[from] kindb_storage::StorageError),

    /// Low-level CBOR error outside of a record payload.
    #[error("codec error: {0}")]
    Codec(#[from] kindb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store or its writer slot is held by someone else. Retryable.
    #[error("store busy: {reason}")]
    Busy {
        /// Who holds the resource.
        reason: String,
    },

    /// An operation was attempted on a committed or aborted transaction.
    #[error("transaction {} is closed", fmt_txn(.txn_id))]
    TransactionClosed {
        /// Id of the transaction, if it committed.
        txn_id: Option<TransactionId>,
    },

    /// A cursor and a write transaction overlap on one table.
    #[error("cursor conflict on table {table}")]
    CursorConflict {
        /// The contended table.
        table: &'static str,
    },

    /// A reference map rebuild was cancelled from its progress callback.
    #[error("reference map rebuild aborted after {processed} records: {reason}")]
    RebuildAborted {
        /// Records processed before the abort.
        processed: u64,
        /// Reason given by the callback.
        reason: String,
    },

    /// The reference map is known to be stale and must be rebuilt.
    #[error("reference map needs a rebuild")]
    RebuildRequired,

    /// An ID is already used by another live object of the same class.
    #[error("{class} id {id} already belongs to {owner}")]
    DuplicateId {
        /// Class of the objects.
        class: ObjectClass,
        /// The contested ID.
        id: String,
        /// Handle currently holding the ID.
        owner: Handle,
    },

    /// A record is missing.
    #[error("{class} {handle} not found")]
    NotFound {
        /// Class searched.
        class: ObjectClass,
        /// Handle searched.
        handle: Handle,
    },

    /// The stored payload differs from the one a change was based on.
    #[error("{class} {handle} changed since it was read")]
    StaleRecord {
        /// Class of the record.
        class: ObjectClass,
        /// Handle of the record.
        handle: Handle,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

fn fmt_handle(handle: &Option<Handle>) -> String {
    handle.map_or_else(|| "<unknown>".to_string(), |h| h.to_string())
}

fn fmt_txn(txn_id: &Option<TransactionId>) -> String {
    txn_id.map_or_else(|| "<uncommitted>".to_string(), |t| t.to_string())
}

impl CoreError {
    /// Creates a corrupt record error.
    pub fn corrupt_record(
        class: ObjectClass,
        handle: Option<Handle>,
        message: impl Into<String>,
    ) -> Self {
        Self::CorruptRecord {
            class,
            handle,
            message: message.into(),
        }
    }

    /// Creates a busy error.
    pub fn busy(reason: impl Into<String>) -> Self {
        Self::Busy {
            reason: reason.into(),
        }
    }

    /// Creates a rebuild aborted error.
    pub fn rebuild_aborted(processed: u64, reason: impl Into<String>) -> Self {
        Self::RebuildAborted {
            processed,
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Returns true if a scan may skip the offending record and continue.
    #[must_use]
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::CorruptRecord { .. })
    }

    /// Returns true if the error reports misuse of the API.
    #[must_use]
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::TransactionClosed { .. } | Self::CursorConflict { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_record_message_names_class_and_handle() {
        let handle = Handle::from_bytes([0xab; 16]);
        let err = CoreError::corrupt_record(ObjectClass::Family, Some(handle), "bad tag");
        let text = err.to_string();
        assert!(text.contains("family"));
        assert!(text.contains(&handle.to_string()));
        assert!(err.is_skippable());

        let err = CoreError::corrupt_record(ObjectClass::Note, None, "empty");
        assert!(err.to_string().contains("<unknown>"));
    }

    #[test]
    fn classification() {
        assert!(CoreError::busy("LOCK held").is_retryable());
        assert!(CoreError::TransactionClosed { txn_id: None }.is_programmer_error());
        assert!(CoreError::CursorConflict { table: "person" }.is_programmer_error());
        assert!(!CoreError::RebuildRequired.is_retryable());
        assert_eq!(
            CoreError::TransactionClosed {
                txn_id: Some(TransactionId::new(7))
            }
            .to_string(),
            "transaction txn:7 is closed"
        );
    }
}
