//! Database operation benchmarks.
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kindb_bench::{hub_with_referrers, person_with_events, populate};
use kindb_core::model::{Family, Person};
use kindb_core::{Config, Database, InMemoryBackend, ObjectClass, RebuildOptions};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn rng() -> StdRng {
    StdRng::seed_from_u64(0x6b696e)
}

/// Benchmark committing one person per transaction.
fn bench_commit_person(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_person");

    for events in [0, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(events), events, |b, &events| {
            let db = Database::open_in_memory().unwrap();
            let mut rng = rng();
            b.iter(|| {
                let mut person = person_with_events(&mut rng, events);
                db.transaction("person", |txn| db.add_object(txn, black_box(&mut person)))
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark durable commits to a store directory.
fn bench_commit_on_disk(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_on_disk");
    group.sample_size(20);

    for sync in [false, true] {
        let name = if sync { "sync" } else { "no_sync" };
        group.bench_function(name, |b| {
            let dir = tempfile::tempdir().unwrap();
            let config = Config::default().sync_on_commit(sync);
            let db = Database::open_with_config(&dir.path().join("bench"), config).unwrap();
            let mut rng = rng();
            b.iter(|| {
                let mut person = person_with_events(&mut rng, 2);
                db.transaction("person", |txn| db.add_object(txn, &mut person))
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark commits that move a reference, exercising reference map deltas.
fn bench_update_family(c: &mut Criterion) {
    c.bench_function("update_family_swap_parent", |b| {
        let db = Database::open_in_memory().unwrap();
        let mut a = Person::new("A", "A");
        let mut f = Family::new();
        f.father_handle = Some(a.handle);
        db.transaction("seed", |txn| {
            db.add_object(txn, &mut a)?;
            db.add_object(txn, &mut f)
        })
        .unwrap();

        b.iter(|| {
            std::mem::swap(&mut f.father_handle, &mut f.mother_handle);
            db.transaction("swap", |txn| db.update_object(txn, black_box(&f)))
                .unwrap();
        });
    });
}

/// Benchmark backlink lookups against hubs of growing fan-in.
fn bench_find_backlinks(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_backlinks");

    for referrers in [1, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*referrers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(referrers),
            referrers,
            |b, &referrers| {
                let db = Database::open_in_memory().unwrap();
                let hub = hub_with_referrers(&db, referrers).unwrap();
                b.iter(|| {
                    let count = db.find_backlinks(black_box(hub)).unwrap().count();
                    black_box(count);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark a full reference map rebuild.
fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    group.sample_size(10);

    for families in [100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(families),
            families,
            |b, &families| {
                let db = Database::open_in_memory().unwrap();
                populate(&db, &mut rng(), families).unwrap();
                let records = db.store_stats().unwrap().total_records();
                b.iter(|| {
                    let stats = db.rebuild(RebuildOptions::default(), |_| Ok(())).unwrap();
                    assert_eq!(stats.total_scanned() as usize, records);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark an undo followed by a redo.
fn bench_undo_redo(c: &mut Criterion) {
    c.bench_function("undo_redo_family", |b| {
        let db = Database::open_in_memory().unwrap();
        populate(&db, &mut rng(), 10).unwrap();
        b.iter(|| {
            assert!(db.undo().unwrap());
            assert!(db.redo().unwrap());
        });
    });
}

/// Benchmark scanning every person.
fn bench_cursor_scan(c: &mut Criterion) {
    let db = Database::open_in_memory().unwrap();
    populate(&db, &mut rng(), 500).unwrap();
    let people = db.count(ObjectClass::Person).unwrap();

    let mut group = c.benchmark_group("cursor_scan");
    group.throughput(Throughput::Elements(people as u64));
    group.bench_function("person", |b| {
        b.iter(|| {
            let n = db
                .cursor(ObjectClass::Person)
                .unwrap()
                .filter(Result::is_ok)
                .count();
            assert_eq!(n, people);
        });
    });
    group.finish();
}

/// Benchmark replaying the commit log at open.
fn bench_open_replay(c: &mut Criterion) {
    let log = InMemoryBackend::new();
    {
        let db = Database::open_with_backend(Config::default(), Box::new(log.clone())).unwrap();
        populate(&db, &mut rng(), 500).unwrap();
    }

    c.bench_function("open_replay_500_families", |b| {
        b.iter(|| {
            let db =
                Database::open_with_backend(Config::default(), Box::new(log.detached())).unwrap();
            black_box(db.recovery_info());
        });
    });
}

criterion_group!(
    benches,
    bench_commit_person,
    bench_commit_on_disk,
    bench_update_family,
    bench_find_backlinks,
    bench_rebuild,
    bench_undo_redo,
    bench_cursor_scan,
    bench_open_replay,
);
criterion_main!(benches);
