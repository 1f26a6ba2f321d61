//! Store directory management.
//!
//! This module handles the file system layout of a kindb store:
//!
//! ```text
//! <store>/
//! ├─ LOCK              # Advisory lock, holds "user@host" of the opener
//! ├─ RECOVER           # Present while open; left behind by a crash
//! ├─ kv.log            # Engine commit log
//! └─ kv.log.tmp        # Compaction output before it replaces kv.log
//! ```
//!
//! The LOCK file ensures only one process writes to the store at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const RECOVER_FILE: &str = "RECOVER";
const LOG_FILE: &str = "kv.log";
const COMPACT_FILE: &str = "kv.log.tmp";

/// Holds the lock on a store directory.
///
/// Writers take an exclusive lock; read-only opens take a shared one, so
/// several readers may coexist but never alongside a writer.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    read_only: bool,
    needs_recovery: bool,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns [`CoreError::Busy`])
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool, read_only: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing && !read_only {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_operation(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let mut lock_file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .truncate(false)
            .open(&lock_path)
            .map_err(|err| {
                if read_only && err.kind() == std::io::ErrorKind::NotFound {
                    CoreError::invalid_operation(format!(
                        "not a kindb store: {}",
                        path.display()
                    ))
                } else {
                    err.into()
                }
            })?;

        let locked = if read_only {
            FileExt::try_lock_shared(&lock_file)
        } else {
            FileExt::try_lock_exclusive(&lock_file)
        };
        if locked.is_err() {
            let holder = read_holder(&mut lock_file);
            return Err(CoreError::busy(format!(
                "{} is locked by {holder}",
                path.display()
            )));
        }

        if !read_only {
            lock_file.set_len(0)?;
            lock_file.seek(SeekFrom::Start(0))?;
            lock_file.write_all(lock_holder().as_bytes())?;
            lock_file.sync_all()?;
        }

        let recover_path = path.join(RECOVER_FILE);
        let needs_recovery = recover_path.exists();
        if needs_recovery {
            tracing::warn!(
                path = %path.display(),
                "store was not closed cleanly; a reference map rebuild is recommended"
            );
        }

        let dir = Self {
            path: path.to_path_buf(),
            read_only,
            needs_recovery,
            _lock_file: lock_file,
        };
        if !read_only {
            File::create(&recover_path)?;
            dir.sync_directory()?;
        }
        Ok(dir)
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the commit log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Returns the path compaction writes to.
    #[must_use]
    pub fn compact_path(&self) -> PathBuf {
        self.path.join(COMPACT_FILE)
    }

    /// True if a recovery marker was found at open.
    #[must_use]
    pub fn needs_recovery(&self) -> bool {
        self.needs_recovery
    }

    /// Removes the recovery marker on clean close.
    pub fn clear_recovery_marker(&self) -> CoreResult<()> {
        if self.read_only {
            return Ok(());
        }
        let recover_path = self.path.join(RECOVER_FILE);
        if recover_path.exists() {
            fs::remove_file(&recover_path)?;
            self.sync_directory()?;
        }
        Ok(())
    }

    /// Writes `data` to the compaction file and renames it over the log.
    pub fn replace_log(&self, data: &[u8]) -> CoreResult<PathBuf> {
        let temp_path = self.compact_path();
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        let log_path = self.log_path();
        fs::rename(&temp_path, &log_path)?;
        self.sync_directory()?;
        Ok(log_path)
    }

    /// Syncs the directory so that created, renamed and removed entries are
    /// durable.
    ///
    /// NTFS journals metadata, so this is a no-op on Windows.
    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

fn read_holder(file: &mut File) -> String {
    let mut holder = String::new();
    match file.read_to_string(&mut holder) {
        Ok(_) if !holder.trim().is_empty() => holder.trim().to_string(),
        _ => "another process".to_string(),
    }
}

/// `user@host` of the current process.
fn lock_holder() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_string())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{user}@{host}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory_and_marker() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("tree");

        let dir = StoreDir::open(&path, true, false).unwrap();
        assert!(path.is_dir());
        assert!(path.join(RECOVER_FILE).exists());
        assert!(!dir.needs_recovery());
        assert!(fs::read_to_string(path.join(LOCK_FILE)).unwrap().contains('@'));
    }

    #[test]
    fn open_fails_if_missing_and_no_create() {
        let temp = tempdir().unwrap();
        let result = StoreDir::open(&temp.path().join("nonexistent"), false, false);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("locked");
        let _first = StoreDir::open(&path, true, false).unwrap();

        let err = StoreDir::open(&path, true, false).unwrap_err();
        assert!(err.is_retryable());
        let err = StoreDir::open(&path, false, true).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn clean_close_clears_recovery() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("clean");
        {
            let dir = StoreDir::open(&path, true, false).unwrap();
            dir.clear_recovery_marker().unwrap();
        }
        let dir = StoreDir::open(&path, true, false).unwrap();
        assert!(!dir.needs_recovery());
    }

    #[test]
    fn leftover_marker_requests_recovery() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("crashed");
        drop(StoreDir::open(&path, true, false).unwrap());

        let dir = StoreDir::open(&path, true, false).unwrap();
        assert!(dir.needs_recovery());
    }

    #[test]
    fn replace_log_swaps_contents() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(&temp.path().join("swap"), true, false).unwrap();
        fs::write(dir.log_path(), b"old").unwrap();

        let path = dir.replace_log(b"new contents").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"new contents");
        assert!(!dir.compact_path().exists());
    }

    #[test]
    fn paths_are_correct() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("paths");
        let dir = StoreDir::open(&path, true, false).unwrap();
        assert_eq!(dir.path(), path);
        assert_eq!(dir.log_path(), path.join("kv.log"));
        assert_eq!(dir.compact_path(), path.join("kv.log.tmp"));
    }
}
