//! Engine cursors.
//!
//! A cursor remembers its last position and looks up the next entry on each
//! step, so it never holds a lock between steps. While it is open the
//! engine refuses to commit writes to its table.

use super::engine::KvEngine;

/// Cursor over all entries of one table, in key order.
///
/// Duplicate-key tables yield one item per key/value pair.
#[derive(Debug)]
pub struct KvCursor<'e> {
    engine: &'e KvEngine,
    table: &'static str,
    position: Option<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
    open: bool,
}

impl<'e> KvCursor<'e> {
    pub(crate) fn new(engine: &'e KvEngine, table: &'static str) -> Self {
        Self {
            engine,
            table,
            position: None,
            exhausted: false,
            open: true,
        }
    }

    /// The table this cursor walks.
    #[must_use]
    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Rewinds to the first entry and returns it.
    pub fn first(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.position = None;
        self.exhausted = false;
        self.next()
    }

    /// Releases the cursor. Dropping it has the same effect.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.engine.release_cursor(self.table);
        }
    }
}

impl Iterator for KvCursor<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted || !self.open {
            return None;
        }
        let after = self
            .position
            .as_ref()
            .map(|(key, value)| (key.as_slice(), value.as_slice()));
        match self.engine.entry_after(self.table, after) {
            Some(entry) => {
                self.position = Some(entry.clone());
                Some(entry)
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}

impl Drop for KvCursor<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Cursor over the values stored under one key of a duplicate-key table.
#[derive(Debug)]
pub struct DupCursor<'e> {
    engine: &'e KvEngine,
    table: &'static str,
    key: Vec<u8>,
    position: Option<Vec<u8>>,
    exhausted: bool,
    open: bool,
}

impl<'e> DupCursor<'e> {
    pub(crate) fn new(engine: &'e KvEngine, table: &'static str, key: Vec<u8>) -> Self {
        Self {
            engine,
            table,
            key,
            position: None,
            exhausted: false,
            open: true,
        }
    }

    /// The key whose values are walked.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Rewinds to the first value and returns it.
    pub fn first(&mut self) -> Option<Vec<u8>> {
        self.position = None;
        self.exhausted = false;
        self.next()
    }

    /// Releases the cursor.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.engine.release_cursor(self.table);
        }
    }
}

impl Iterator for DupCursor<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted || !self.open {
            return None;
        }
        match self
            .engine
            .dup_value_after(self.table, &self.key, self.position.as_deref())
        {
            Some(value) => {
                self.position = Some(value.clone());
                Some(value)
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}

impl Drop for DupCursor<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use crate::kv::{EngineOptions, KvEngine, TableSpec};
    use kindb_storage::InMemoryBackend;

    const TABLES: &[TableSpec] = &[TableSpec::unique("event"), TableSpec::dup_sort("refs")];

    fn engine() -> KvEngine {
        let engine = KvEngine::open(
            Box::new(InMemoryBackend::new()),
            TABLES,
            EngineOptions::default(),
        )
        .unwrap();
        let mut txn = engine.begin_txn().unwrap();
        for key in [b"c", b"a", b"b"] {
            txn.put("event", key, key).unwrap();
        }
        txn.put_dup("refs", b"k1", b"y").unwrap();
        txn.put_dup("refs", b"k1", b"x").unwrap();
        txn.put_dup("refs", b"k2", b"z").unwrap();
        txn.commit().unwrap();
        engine
    }

    #[test]
    fn walks_in_key_order() {
        let engine = engine();
        let keys: Vec<_> = engine.cursor("event").unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(engine.open_cursors("event"), 0);
    }

    #[test]
    fn walks_duplicate_pairs() {
        let engine = engine();
        let pairs: Vec<_> = engine.cursor("refs").unwrap().collect();
        assert_eq!(
            pairs,
            vec![
                (b"k1".to_vec(), b"x".to_vec()),
                (b"k1".to_vec(), b"y".to_vec()),
                (b"k2".to_vec(), b"z".to_vec()),
            ]
        );
        let values: Vec<_> = engine.dup_cursor("refs", b"k1").unwrap().collect();
        assert_eq!(values, vec![b"x".to_vec(), b"y".to_vec()]);
        assert_eq!(engine.dup_cursor("refs", b"none").unwrap().count(), 0);
    }

    #[test]
    fn first_rewinds() {
        let engine = engine();
        let mut cursor = engine.cursor("event").unwrap();
        assert_eq!(cursor.next().map(|(k, _)| k), Some(b"a".to_vec()));
        assert_eq!(cursor.next().map(|(k, _)| k), Some(b"b".to_vec()));
        assert_eq!(cursor.first().map(|(k, _)| k), Some(b"a".to_vec()));
        assert_eq!(engine.open_cursors("event"), 1);
        cursor.close();
        assert_eq!(engine.open_cursors("event"), 0);
    }
}
