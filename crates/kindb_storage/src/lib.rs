//! # kindb storage
//!
//! Byte-level storage backends underneath the kindb key/value engine.
//!
//! A backend is an append-only byte store. It knows nothing about tables,
//! records or log framing; the engine in `kindb_core` owns all of that and
//! only ever appends whole commit batches, reads them back on open, and
//! truncates a torn tail.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral stores and tests; clones share one buffer
//! - [`FileBackend`] - persistent storage through OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use kindb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"batch").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"batch");
//! assert_eq!(backend.read_all().unwrap(), b"batch");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
