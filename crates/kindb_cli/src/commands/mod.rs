//! CLI command implementations.

pub mod backlinks;
pub mod compact;
pub mod inspect;
pub mod rebuild;
pub mod verify;

use kindb_core::{Config, Database};
use std::path::Path;
use thiserror::Error;

/// Failures reported by commands beyond store errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// No store at the given path.
    #[error("no kindb store found at {0}")]
    NotAStore(String),

    /// The reference map disagrees with the records.
    #[error("reference map drift: {missing} missing, {unexpected} unexpected entries")]
    Drift {
        /// Entries the records imply but the map lacks.
        missing: usize,
        /// Entries the map holds that no record implies.
        unexpected: usize,
    },
}

/// Opens an existing store for reading only.
pub fn open_read_only(path: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    open(path, Config::default().create_if_missing(false).read_only(true))
}

/// Opens an existing store for writing.
pub fn open_writable(path: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    open(path, Config::default().create_if_missing(false))
}

/// Opens an existing store with `config`.
pub fn open(path: &Path, config: Config) -> Result<Database, Box<dyn std::error::Error>> {
    if !path.join("kv.log").exists() {
        return Err(CliError::NotAStore(path.display().to_string()).into());
    }
    Ok(Database::open_with_config(path, config)?)
}

#[cfg(test)]
pub(crate) mod test_support {
    use kindb_core::model::{Family, Person};
    use kindb_core::{Database, Handle};
    use std::path::Path;

    /// Creates a store holding one person referenced by one family.
    pub fn seed(path: &Path) -> (Handle, Handle) {
        let db = Database::open(path).unwrap();
        let mut person = Person::new("Elsa", "Berg");
        let mut family = Family::new();
        family.mother_handle = Some(person.handle);
        db.transaction("seed", |txn| {
            db.add_object(txn, &mut person)?;
            db.add_object(txn, &mut family)?;
            Ok(())
        })
        .unwrap();
        db.close().unwrap();
        (person.handle, family.handle)
    }
}
