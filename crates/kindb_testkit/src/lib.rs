//! # kindb Testkit
//!
//! Test utilities for kindb.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based generators for records and workloads using proptest
//! - A crash-injecting storage backend
//!
//! ## Usage
//!
//! ```rust
//! use kindb_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     let tree = sample_tree(db).unwrap();
//!     assert_eq!(stored_backlinks(db, tree.child).unwrap().len(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
