//! Database configuration.

use crate::types::ObjectClass;
use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Reject all write transactions.
    pub read_only: bool,

    /// Maximum number of undoable transactions kept (0 disables undo).
    pub undo_capacity: usize,

    /// Whether to flush the commit log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// How long an engine transaction waits for the engine write lock
    /// before failing with `Busy`.
    pub lock_timeout: Duration,

    /// Records scanned between two rebuild progress callbacks.
    pub progress_interval: u64,

    /// Number of decoded records kept in the record cache (0 disables it).
    pub cache_capacity: usize,

    /// ID templates, indexed by [`ObjectClass::index`].
    pub id_prefixes: [String; 9],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_only: false,
            undo_capacity: 1000,
            sync_on_commit: true,
            lock_timeout: Duration::from_secs(2),
            progress_interval: 100,
            cache_capacity: 1024,
            id_prefixes: ObjectClass::ALL.map(|class| class.default_id_prefix().to_string()),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Opens the store read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the undo history depth.
    #[must_use]
    pub const fn undo_capacity(mut self, capacity: usize) -> Self {
        self.undo_capacity = capacity;
        self
    }

    /// Sets whether to flush the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the engine write lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the rebuild progress cadence. Values below 1 are treated as 1.
    #[must_use]
    pub const fn progress_interval(mut self, records: u64) -> Self {
        self.progress_interval = if records == 0 { 1 } else { records };
        self
    }

    /// Sets the record cache size.
    #[must_use]
    pub const fn cache_capacity(mut self, records: usize) -> Self {
        self.cache_capacity = records;
        self
    }

    /// Sets the ID template for one class, e.g. `"I%04d"`.
    #[must_use]
    pub fn id_prefix(mut self, class: ObjectClass, template: impl Into<String>) -> Self {
        self.id_prefixes[class.index()] = template.into();
        self
    }

    /// Returns the ID template for a class.
    #[must_use]
    pub fn id_prefix_for(&self, class: ObjectClass) -> &str {
        &self.id_prefixes[class.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(!config.read_only);
        assert!(config.sync_on_commit);
        assert_eq!(config.undo_capacity, 1000);
        assert_eq!(config.id_prefix_for(ObjectClass::Media), "O%04d");
        assert_eq!(config.id_prefix_for(ObjectClass::Person), "I%04d");
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .undo_capacity(5)
            .progress_interval(0)
            .id_prefix(ObjectClass::Note, "NOTE-%d");

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.undo_capacity, 5);
        assert_eq!(config.progress_interval, 1);
        assert_eq!(config.id_prefix_for(ObjectClass::Note), "NOTE-%d");
    }
}
