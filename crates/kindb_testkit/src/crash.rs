//! Crash simulation for kindb.
//!
//! [`CrashableBackend`] wraps any [`StorageBackend`] and fails writes once a
//! byte budget is exhausted, or fails on flush. After a crash it refuses
//! every further mutation, including the truncate a committing engine uses
//! to cut back a failed append, so the torn bytes stay in the log exactly
//! as they would after a power loss.
//!
//! ## Usage
//!
//! ```rust
//! use kindb_storage::InMemoryBackend;
//! use kindb_testkit::crash::CrashableBackend;
//!
//! let shared = InMemoryBackend::new();
//! let backend = CrashableBackend::new(Box::new(shared.clone()));
//! let control = backend.control();
//! control.crash_after(16);
//! // ... hand `backend` to a database, commit, observe the failure,
//! // then reopen over `shared` to check recovery.
//! ```

use kindb_storage::{StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared switches of a [`CrashableBackend`].
///
/// The backend itself usually moves into a database; the control stays with
/// the test.
#[derive(Debug)]
pub struct CrashControl {
    crash_at: AtomicU64,
    written: AtomicU64,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

impl Default for CrashControl {
    fn default() -> Self {
        Self {
            crash_at: AtomicU64::new(u64::MAX),
            written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_flush: AtomicBool::new(false),
        }
    }
}

impl CrashControl {
    /// Crashes once `bytes` more bytes have been appended.
    ///
    /// The write that crosses the budget lands partially.
    pub fn crash_after(&self, bytes: u64) {
        let written = self.written.load(Ordering::SeqCst);
        self.crash_at
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether the next flush crashes.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Disarms every switch and clears the crashed state.
    pub fn reset(&self) {
        self.crash_at.store(u64::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_flush.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Bytes appended through the backend so far.
    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }

    fn dead(&self) -> StorageResult<()> {
        if self.has_crashed() {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "backend has crashed",
            )))
        } else {
            Ok(())
        }
    }
}

/// A storage backend that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: Arc<CrashControl>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            control: Arc::new(CrashControl::default()),
        }
    }

    /// The switches of this backend.
    pub fn control(&self) -> Arc<CrashControl> {
        Arc::clone(&self.control)
    }
}

impl std::fmt::Debug for CrashableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashableBackend")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.control.dead()?;
        let current = self.control.written.load(Ordering::SeqCst);
        let crash_at = self.control.crash_at.load(Ordering::SeqCst);
        let len = data.len() as u64;

        if current.saturating_add(len) > crash_at {
            let partial = crash_at.saturating_sub(current) as usize;
            if partial > 0 {
                self.inner.append(&data[..partial])?;
                self.control
                    .written
                    .fetch_add(partial as u64, Ordering::SeqCst);
            }
            return Err(self.control.crash("write"));
        }

        let offset = self.inner.append(data)?;
        self.control.written.fetch_add(len, Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.control.dead()?;
        if self.control.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.control.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.control.dead()?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.control.dead()?;
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindb_storage::InMemoryBackend;

    #[test]
    fn passes_through_until_armed() {
        let shared = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(shared.clone()));

        let offset = backend.append(b"test data").unwrap();
        backend.flush().unwrap();
        assert_eq!(backend.read_at(offset, 9).unwrap(), b"test data");
        assert_eq!(shared.size().unwrap(), 9);
        assert_eq!(backend.control().bytes_written(), 9);
    }

    #[test]
    fn crash_leaves_partial_write_behind() {
        let shared = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(shared.clone()));
        let control = backend.control();

        backend.append(&[1u8; 5]).unwrap();
        control.crash_after(3);
        assert!(backend.append(&[2u8; 10]).is_err());
        assert!(control.has_crashed());
        assert_eq!(shared.size().unwrap(), 8);

        assert!(backend.truncate(5).is_err());
        assert_eq!(shared.size().unwrap(), 8);
    }

    #[test]
    fn crash_on_flush() {
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        let control = backend.control();
        control.set_fail_on_flush(true);

        assert!(backend.flush().is_err());
        assert!(control.has_crashed());

        control.reset();
        assert!(backend.flush().is_ok());
    }
}
