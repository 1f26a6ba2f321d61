//! Store-owned cache of decoded records.

use crate::error::CoreResult;
use crate::handle::Handle;
use crate::model::Record;
use crate::types::ObjectClass;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Cache hit/miss counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to decode.
    pub misses: u64,
    /// Records currently held.
    pub len: usize,
}

type Key = (ObjectClass, Handle);

#[derive(Debug)]
struct Inner {
    entries: Option<LruCache<Key, Arc<Record>>>,
    // Bumped by every invalidation; a load that straddles one is not cached.
    generation: u64,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn new(capacity: usize, generation: u64) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
            generation,
            hits: 0,
            misses: 0,
        }
    }
}

/// Bounded map from `(class, handle)` to a decoded record.
///
/// Least recently used entries are evicted first. A capacity of zero disables
/// caching.
#[derive(Debug)]
pub struct RecordCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl RecordCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::new(capacity, 0)),
        }
    }

    /// Returns the cached record, or loads, caches and returns it.
    ///
    /// `loader` returning `Ok(None)` means the record does not exist; that
    /// answer is not cached. A record loaded while an invalidation ran is
    /// returned but not cached, since it may predate the invalidating commit.
    pub fn get_or_load<F>(
        &self,
        class: ObjectClass,
        handle: Handle,
        loader: F,
    ) -> CoreResult<Option<Arc<Record>>>
    where
        F: FnOnce() -> CoreResult<Option<Record>>,
    {
        if let Some(hit) = self.get(class, handle) {
            return Ok(Some(hit));
        }
        let generation = {
            let mut inner = self.inner.lock();
            inner.misses += 1;
            inner.generation
        };
        let Some(record) = loader()? else {
            return Ok(None);
        };
        let record = Arc::new(record);
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            if let Some(entries) = inner.entries.as_mut() {
                entries.put((class, handle), Arc::clone(&record));
            }
        }
        Ok(Some(record))
    }

    /// Returns a cached record and counts a hit.
    pub fn get(&self, class: ObjectClass, handle: Handle) -> Option<Arc<Record>> {
        let mut inner = self.inner.lock();
        let hit = inner
            .entries
            .as_mut()
            .and_then(|entries| entries.get(&(class, handle)).cloned());
        if hit.is_some() {
            inner.hits += 1;
        }
        hit
    }

    /// Stores a record, evicting the least recently used entry when full.
    pub fn insert(&self, class: ObjectClass, handle: Handle, record: Arc<Record>) {
        if let Some(entries) = self.inner.lock().entries.as_mut() {
            entries.put((class, handle), record);
        }
    }

    /// Forgets one record.
    pub fn invalidate(&self, class: ObjectClass, handle: Handle) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        if let Some(entries) = inner.entries.as_mut() {
            entries.pop(&(class, handle));
        }
    }

    /// Forgets everything and resets the counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let generation = inner.generation + 1;
        *inner = Inner::new(self.capacity, generation);
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.as_ref().map_or(0, LruCache::len)
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            len: inner.entries.as_ref().map_or(0, LruCache::len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Note;

    fn note() -> (Handle, Record) {
        let note = Note::new("cached");
        (note.handle, Record::from(note))
    }

    #[test]
    fn loads_once_then_hits() {
        let cache = RecordCache::new(4);
        let (handle, record) = note();
        let mut loads = 0;

        for _ in 0..3 {
            let found = cache
                .get_or_load(ObjectClass::Note, handle, || {
                    loads += 1;
                    Ok(Some(record.clone()))
                })
                .unwrap();
            assert_eq!(found.as_deref(), Some(&record));
        }
        assert_eq!(loads, 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 2,
                misses: 1,
                len: 1
            }
        );
    }

    #[test]
    fn missing_records_are_not_cached() {
        let cache = RecordCache::new(4);
        let found = cache
            .get_or_load(ObjectClass::Note, Handle::new(), || Ok(None))
            .unwrap();
        assert!(found.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = RecordCache::new(2);
        let entries: Vec<_> = (0..3).map(|_| note()).collect();
        for (handle, record) in &entries[..2] {
            cache.insert(ObjectClass::Note, *handle, Arc::new(record.clone()));
        }
        assert!(cache.get(ObjectClass::Note, entries[0].0).is_some());
        let (handle, record) = &entries[2];
        cache.insert(ObjectClass::Note, *handle, Arc::new(record.clone()));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(ObjectClass::Note, entries[1].0).is_none());
        assert!(cache.get(ObjectClass::Note, entries[0].0).is_some());
        assert!(cache.get(ObjectClass::Note, entries[2].0).is_some());
    }

    #[test]
    fn load_racing_an_invalidation_is_not_cached() {
        let cache = RecordCache::new(4);
        let (handle, old) = note();

        let found = cache
            .get_or_load(ObjectClass::Note, handle, || {
                cache.invalidate(ObjectClass::Note, handle);
                Ok(Some(old.clone()))
            })
            .unwrap();
        assert_eq!(found.as_deref(), Some(&old));
        assert!(cache.is_empty());

        let mut loads = 0;
        for _ in 0..2 {
            cache
                .get_or_load(ObjectClass::Note, handle, || {
                    loads += 1;
                    Ok(Some(old.clone()))
                })
                .unwrap();
        }
        assert_eq!(loads, 1);
    }

    #[test]
    fn invalidate_and_zero_capacity() {
        let cache = RecordCache::new(2);
        let (handle, record) = note();
        cache.insert(ObjectClass::Note, handle, Arc::new(record.clone()));
        cache.invalidate(ObjectClass::Note, handle);
        assert!(cache.is_empty());

        let disabled = RecordCache::new(0);
        disabled.insert(ObjectClass::Note, handle, Arc::new(record));
        assert!(disabled.is_empty());
    }
}
