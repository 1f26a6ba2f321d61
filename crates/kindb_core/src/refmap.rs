//! Reference map: the persisted inverse of the reference graph.
//!
//! For every handle `h`, the duplicate-key table holds one entry per live
//! object whose reference fields contain `h`. Entries are a set: an object
//! that references `h` through several fields contributes a single entry,
//! so incremental maintenance and a full rebuild produce identical tables.

use crate::error::{CoreError, CoreResult};
use crate::handle::Handle;
use crate::kv::{DupCursor, KvEngine, KvTxn};
use crate::model::extract_references;
use crate::schema::{
    decode_backlink, decode_handle_key, encode_backlink, set_needs_rebuild, REFERENCE_MAP,
};
use crate::types::ObjectClass;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::time::{Duration, Instant};

/// One inbound edge: `handle` of class `class` references the queried
/// object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Backlink {
    /// Class of the referencing object.
    pub class: ObjectClass,
    /// Handle of the referencing object.
    pub handle: Handle,
}

/// Applies the difference between two reference sets of one object.
///
/// Entries for `old − new` are removed and entries for `new − old` are
/// inserted; references present in both are left alone.
pub fn apply_delta(
    kv: &mut KvTxn<'_>,
    class: ObjectClass,
    handle: Handle,
    old_refs: &BTreeSet<Handle>,
    new_refs: &BTreeSet<Handle>,
) -> CoreResult<()> {
    let value = encode_backlink(class, handle);
    for removed in old_refs.difference(new_refs) {
        kv.delete_dup(REFERENCE_MAP, removed.as_bytes(), &value)?;
    }
    for added in new_refs.difference(old_refs) {
        kv.put_dup(REFERENCE_MAP, added.as_bytes(), &value)?;
    }
    Ok(())
}

/// Lazy sequence of the objects referencing one handle.
///
/// Entries are read one at a time from the committed table, optionally
/// limited to a set of referencing classes. While the
/// sequence is alive, commits that would modify the reference map fail
/// with [`CoreError::CursorConflict`]; drop it or call
/// [`Backlinks::close`] first.
#[derive(Debug)]
pub struct Backlinks<'db> {
    cursor: DupCursor<'db>,
    classes: Option<Vec<ObjectClass>>,
}

impl<'db> Backlinks<'db> {
    pub(crate) fn open(
        engine: &'db KvEngine,
        target: Handle,
        classes: Option<&[ObjectClass]>,
    ) -> CoreResult<Self> {
        Ok(Self {
            cursor: engine.dup_cursor(REFERENCE_MAP, target.as_bytes())?,
            classes: classes.map(<[ObjectClass]>::to_vec),
        })
    }

    /// Releases the underlying cursor.
    pub fn close(self) {
        self.cursor.close();
    }
}

impl Iterator for Backlinks<'_> {
    type Item = CoreResult<Backlink>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let value = self.cursor.next()?;
            match decode_backlink(&value) {
                Ok((class, handle)) => {
                    if self
                        .classes
                        .as_ref()
                        .is_some_and(|classes| !classes.contains(&class))
                    {
                        continue;
                    }
                    return Some(Ok(Backlink { class, handle }));
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Progress report passed to the rebuild callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildProgress {
    /// Class being scanned.
    pub class: ObjectClass,
    /// Records of `class` scanned so far.
    pub processed: u64,
    /// Records of `class` at the start of its scan.
    pub total: u64,
}

/// Error type a progress callback returns to cancel a rebuild.
pub type CallbackError = Box<dyn Error + Send + Sync>;

/// Rebuild tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildOptions {
    /// Log and skip undecodable payloads instead of failing.
    pub skip_corrupt: bool,
}

impl RebuildOptions {
    /// Sets whether corrupt payloads are skipped.
    #[must_use]
    pub const fn skip_corrupt(mut self, value: bool) -> Self {
        self.skip_corrupt = value;
        self
    }
}

/// Outcome of a completed rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildStats {
    /// Records scanned per class.
    pub scanned: BTreeMap<ObjectClass, u64>,
    /// Reference map entries written.
    pub entries: u64,
    /// Corrupt payloads skipped.
    pub skipped: u64,
    /// Wall time of the scan and write.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RebuildStats {
    /// Records scanned across all classes.
    #[must_use]
    pub fn total_scanned(&self) -> u64 {
        self.scanned.values().sum()
    }
}

/// Entry of the reference map as `(referenced, referencing)`.
pub type RefMapEntry = (Handle, Backlink);

/// Scans every class and derives the reference map it implies.
///
/// `progress` is called every `interval` records and once at the end of
/// each class. Undecodable payloads are handed to `on_corrupt`, which
/// either swallows them (returns `Ok`) or aborts the scan.
pub(crate) fn derive_entries<P, C>(
    engine: &KvEngine,
    interval: u64,
    mut progress: P,
    mut on_corrupt: C,
) -> CoreResult<(BTreeSet<RefMapEntry>, BTreeMap<ObjectClass, u64>)>
where
    P: FnMut(&RebuildProgress, u64) -> CoreResult<()>,
    C: FnMut(CoreError) -> CoreResult<()>,
{
    let interval = interval.max(1);
    let mut entries = BTreeSet::new();
    let mut scanned = BTreeMap::new();
    let mut processed_total = 0u64;

    for class in ObjectClass::ALL {
        let total = engine.len(class.name())? as u64;
        let mut processed = 0u64;
        let mut reported = false;

        let cursor = engine.cursor(class.name())?;
        for (key, payload) in cursor {
            processed += 1;
            processed_total += 1;
            let owner = decode_handle_key(&key)?;
            match extract_references(class, &payload) {
                Ok(refs) => {
                    let link = Backlink {
                        class,
                        handle: owner,
                    };
                    entries.extend(refs.handles().into_iter().map(|target| (target, link)));
                }
                Err(err) => on_corrupt(err)?,
            }

            reported = processed % interval == 0;
            if reported {
                progress(
                    &RebuildProgress {
                        class,
                        processed,
                        total,
                    },
                    processed_total,
                )?;
            }
        }

        if !reported {
            progress(
                &RebuildProgress {
                    class,
                    processed,
                    total: total.max(processed),
                },
                processed_total,
            )?;
        }
        scanned.insert(class, processed);
    }

    Ok((entries, scanned))
}

/// Recomputes the reference map from scratch.
///
/// Step one commits a cleared table with the rebuild flag set. Step two
/// scans all classes and commits the derived entries while clearing the
/// flag. An abort in between leaves the table cleared and flagged.
pub(crate) fn rebuild<F>(
    engine: &KvEngine,
    interval: u64,
    options: RebuildOptions,
    mut callback: F,
) -> CoreResult<RebuildStats>
where
    F: FnMut(&RebuildProgress) -> Result<(), CallbackError>,
{
    let started = Instant::now();

    let mut kv = engine.begin_txn()?;
    kv.clear(REFERENCE_MAP)?;
    set_needs_rebuild(&mut kv, true)?;
    kv.commit()?;
    tracing::debug!("reference map cleared for rebuild");

    let mut skipped = 0u64;
    let (entries, scanned) = derive_entries(
        engine,
        interval,
        |progress, processed_total| {
            callback(progress).map_err(|reason| {
                tracing::warn!(processed = processed_total, %reason, "rebuild cancelled");
                CoreError::rebuild_aborted(processed_total, reason.to_string())
            })
        },
        |err| {
            if options.skip_corrupt && err.is_skippable() {
                tracing::warn!(error = %err, "skipping corrupt record during rebuild");
                skipped += 1;
                Ok(())
            } else {
                Err(err)
            }
        },
    )?;

    let mut kv = engine.begin_txn()?;
    for (target, link) in &entries {
        kv.put_dup(
            REFERENCE_MAP,
            target.as_bytes(),
            &encode_backlink(link.class, link.handle),
        )?;
    }
    set_needs_rebuild(&mut kv, false)?;
    kv.commit()?;

    let stats = RebuildStats {
        scanned,
        entries: entries.len() as u64,
        skipped,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        records = stats.total_scanned(),
        entries = stats.entries,
        skipped = stats.skipped,
        "reference map rebuilt"
    );
    Ok(stats)
}

/// Reads the stored reference map.
pub(crate) fn stored_entries(engine: &KvEngine) -> CoreResult<BTreeSet<RefMapEntry>> {
    let mut entries = BTreeSet::new();
    for (key, value) in engine.cursor(REFERENCE_MAP)? {
        let target = decode_handle_key(&key)?;
        let (class, handle) = decode_backlink(&value)?;
        entries.insert((target, Backlink { class, handle }));
    }
    Ok(entries)
}

/// SHA-256 over the stored reference map in key order.
pub(crate) fn digest(engine: &KvEngine) -> CoreResult<[u8; 32]> {
    let mut hasher = Sha256::new();
    for (key, value) in engine.cursor(REFERENCE_MAP)? {
        hasher.update(&key);
        hasher.update(&value);
    }
    Ok(hasher.finalize().into())
}

/// A reference whose target is not a live object of the class its field
/// names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DanglingReference {
    /// The referencing object.
    pub from: Backlink,
    /// Class the reference field points at.
    pub target_class: ObjectClass,
    /// The missing handle.
    pub target: Handle,
}

/// Differences between the stored reference map and the live records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Records scanned.
    pub records: u64,
    /// Entries the live records imply but the table lacks.
    pub missing: Vec<RefMapEntry>,
    /// Entries in the table that no live record implies.
    pub unexpected: Vec<RefMapEntry>,
    /// References to objects that do not exist.
    pub dangling: Vec<DanglingReference>,
    /// Records whose payload could not be read.
    pub corrupt: Vec<(ObjectClass, Handle)>,
    /// The persistent rebuild flag.
    pub needs_rebuild: bool,
}

impl VerifyReport {
    /// True when the stored map equals the derived one.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Cross-checks the stored map against a recomputation without writing.
pub(crate) fn verify(engine: &KvEngine, needs_rebuild: bool) -> CoreResult<VerifyReport> {
    let mut corrupt = Vec::new();
    let mut records = 0u64;
    let mut dangling = Vec::new();

    for class in ObjectClass::ALL {
        for (key, payload) in engine.cursor(class.name())? {
            records += 1;
            let owner = decode_handle_key(&key)?;
            match extract_references(class, &payload) {
                Ok(refs) => {
                    for target in refs.targets {
                        if !engine.contains_key(target.class.name(), target.handle.as_bytes())? {
                            dangling.push(DanglingReference {
                                from: Backlink {
                                    class,
                                    handle: owner,
                                },
                                target_class: target.class,
                                target: target.handle,
                            });
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "corrupt record found during verify");
                    corrupt.push((class, owner));
                }
            }
        }
    }
    dangling.sort_unstable();
    dangling.dedup();

    let (expected, _) = derive_entries(engine, u64::MAX, |_, _| Ok(()), |_| Ok(()))?;
    let actual = stored_entries(engine)?;

    Ok(VerifyReport {
        records,
        missing: expected.difference(&actual).copied().collect(),
        unexpected: actual.difference(&expected).copied().collect(),
        dangling,
        corrupt,
        needs_rebuild,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::EngineOptions;
    use crate::model::{Family, Person, PrimaryObject};
    use crate::schema::table_specs;
    use kindb_storage::InMemoryBackend;

    fn engine() -> KvEngine {
        KvEngine::open(
            Box::new(InMemoryBackend::new()),
            &table_specs(),
            EngineOptions::default(),
        )
        .unwrap()
    }

    fn put_object<T: PrimaryObject>(engine: &KvEngine, object: &T) {
        let mut kv = engine.begin_txn().unwrap();
        kv.put(T::CLASS.name(), object.handle().as_bytes(), &object.encode())
            .unwrap();
        apply_delta(
            &mut kv,
            T::CLASS,
            object.handle(),
            &BTreeSet::new(),
            &object.references(),
        )
        .unwrap();
        kv.commit().unwrap();
    }

    fn backlinks(engine: &KvEngine, target: Handle) -> Vec<Backlink> {
        Backlinks::open(engine, target, None)
            .unwrap()
            .collect::<CoreResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn delta_only_touches_the_difference() {
        let engine = engine();
        let (a, b, c) = (Handle::new(), Handle::new(), Handle::new());
        let owner = Handle::new();

        let mut kv = engine.begin_txn().unwrap();
        apply_delta(&mut kv, ObjectClass::Family, owner, &BTreeSet::new(), &[a, b].into())
            .unwrap();
        kv.commit().unwrap();

        let mut kv = engine.begin_txn().unwrap();
        apply_delta(&mut kv, ObjectClass::Family, owner, &[a, b].into(), &[b, c].into())
            .unwrap();
        kv.commit().unwrap();

        let link = Backlink {
            class: ObjectClass::Family,
            handle: owner,
        };
        assert!(backlinks(&engine, a).is_empty());
        assert_eq!(backlinks(&engine, b), vec![link]);
        assert_eq!(backlinks(&engine, c), vec![link]);
    }

    #[test]
    fn rebuild_matches_incremental_maintenance() {
        let engine = engine();
        let father = Person::new("Olof", "Berg");
        let mut family = Family::new();
        family.father_handle = Some(father.handle);
        family.mother_handle = Some(father.handle);
        put_object(&engine, &father);
        put_object(&engine, &family);

        let before = digest(&engine).unwrap();
        let mut seen = Vec::new();
        let stats = rebuild(&engine, 1, RebuildOptions::default(), |p| {
            seen.push(*p);
            Ok(())
        })
        .unwrap();

        assert_eq!(digest(&engine).unwrap(), before);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_scanned(), 2);
        assert_eq!(seen.len(), 9);
        assert!(seen
            .iter()
            .any(|p| p.class == ObjectClass::Family && p.processed == 1 && p.total == 1));
        assert!(verify(&engine, false).unwrap().is_consistent());
    }

    #[test]
    fn cancelled_rebuild_leaves_map_cleared() {
        let engine = engine();
        let father = Person::new("Olof", "Berg");
        let mut family = Family::new();
        family.father_handle = Some(father.handle);
        put_object(&engine, &family);

        let err = rebuild(&engine, 1, RebuildOptions::default(), |_| {
            Err("operator pressed cancel".into())
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::RebuildAborted { .. }));
        assert_eq!(engine.len(REFERENCE_MAP).unwrap(), 0);
        assert!(engine
            .get(crate::schema::META, crate::schema::META_NEEDS_REBUILD)
            .unwrap()
            .is_some());

        rebuild(&engine, 100, RebuildOptions::default(), |_| Ok(())).unwrap();
        assert_eq!(backlinks(&engine, father.handle).len(), 1);
    }

    #[test]
    fn corrupt_records_abort_or_skip() {
        let engine = engine();
        let mut kv = engine.begin_txn().unwrap();
        kv.put("event", Handle::new().as_bytes(), b"\xff\x00").unwrap();
        kv.commit().unwrap();

        let err = rebuild(&engine, 10, RebuildOptions::default(), |_| Ok(())).unwrap_err();
        assert!(err.is_skippable());

        let stats = rebuild(&engine, 10, RebuildOptions::default().skip_corrupt(true), |_| {
            Ok(())
        })
        .unwrap();
        assert_eq!(stats.skipped, 1);

        let report = verify(&engine, false).unwrap();
        assert_eq!(report.corrupt.len(), 1);
        assert!(report.is_consistent());
    }

    #[test]
    fn verify_reports_drift_and_dangling() {
        let engine = engine();
        let ghost = Handle::new();
        let mut family = Family::new();
        family.father_handle = Some(ghost);
        put_object(&engine, &family);

        let stray = Handle::new();
        let mut kv = engine.begin_txn().unwrap();
        kv.delete_dup(
            REFERENCE_MAP,
            ghost.as_bytes(),
            &encode_backlink(ObjectClass::Family, family.handle),
        )
        .unwrap();
        kv.put_dup(
            REFERENCE_MAP,
            stray.as_bytes(),
            &encode_backlink(ObjectClass::Note, Handle::new()),
        )
        .unwrap();
        kv.commit().unwrap();

        let report = verify(&engine, false).unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].0, ghost);
        assert_eq!(report.unexpected.len(), 1);
        assert_eq!(report.unexpected[0].0, stray);
        assert_eq!(report.dangling.len(), 1);
        assert_eq!(report.dangling[0].target_class, ObjectClass::Person);
    }
}
