//! Rebuild and recover command implementations.

use super::{open, open_writable};
use kindb_core::{Config, Database, RebuildOptions, RebuildProgress, RebuildStats};
use std::path::Path;

/// Runs the rebuild command.
pub fn run(path: &Path, skip_corrupt: bool, interval: u64) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default()
        .create_if_missing(false)
        .progress_interval(interval);
    let db = open(path, config)?;
    let stats = rebuild(&db, skip_corrupt, print_progress)?;
    print_stats(&stats);
    db.close()?;
    Ok(())
}

/// Runs the recover command: rebuilds only if the store asks for it.
pub fn recover(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_writable(path)?;
    if !db.needs_recovery() && !db.needs_rebuild()? {
        println!("Store at {:?} was closed cleanly; nothing to do", path);
        db.close()?;
        return Ok(());
    }
    println!("Recovering store at {:?}", path);
    let stats = rebuild(&db, true, print_progress)?;
    print_stats(&stats);
    db.close()?;
    Ok(())
}

/// Rebuilds the reference map, forwarding progress to `report`.
pub fn rebuild<F>(
    db: &Database,
    skip_corrupt: bool,
    mut report: F,
) -> Result<RebuildStats, Box<dyn std::error::Error>>
where
    F: FnMut(&RebuildProgress),
{
    let options = RebuildOptions::default().skip_corrupt(skip_corrupt);
    Ok(db.rebuild(options, |progress| {
        report(progress);
        Ok(())
    })?)
}

fn print_progress(progress: &RebuildProgress) {
    println!(
        "  {:<12} {:>8} / {}",
        progress.class.name(),
        progress.processed,
        progress.total
    );
}

fn print_stats(stats: &RebuildStats) {
    println!();
    println!("✓ Rebuilt reference map");
    println!("  Records scanned: {}", stats.total_scanned());
    println!("  Entries written: {}", stats.entries);
    if stats.skipped > 0 {
        println!("  Corrupt records skipped: {}", stats.skipped);
    }
    println!("  Elapsed: {:.2?}", stats.elapsed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seed;
    use tempfile::tempdir;

    #[test]
    fn rebuild_reports_every_class() {
        let temp = tempdir().unwrap();
        seed(temp.path());

        let db = open_writable(temp.path()).unwrap();
        let mut seen = Vec::new();
        let stats = rebuild(&db, false, |p| seen.push(p.class)).unwrap();
        assert_eq!(stats.total_scanned(), 2);
        assert_eq!(stats.entries, 1);
        assert_eq!(seen.len(), kindb_core::ObjectClass::ALL.len());
    }

    #[test]
    fn recover_clears_leftover_marker() {
        let temp = tempdir().unwrap();
        seed(temp.path());
        std::fs::write(temp.path().join("RECOVER"), b"").unwrap();

        recover(temp.path()).unwrap();
        let db = open_writable(temp.path()).unwrap();
        assert!(!db.needs_recovery());
    }
}
