//! Compact command implementation.

use super::open_writable;
use kindb_core::kv::CompactStats;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting commit log at {:?}", path);
    let stats = compact(path)?;

    println!("  Size before: {} bytes", stats.before);
    println!("  Size after:  {} bytes", stats.after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        stats.before.saturating_sub(stats.after),
        if stats.before > 0 {
            (stats.before.saturating_sub(stats.after) as f64 / stats.before as f64) * 100.0
        } else {
            0.0
        }
    );
    Ok(())
}

/// Rewrites the log of the store at `path`.
pub fn compact(path: &Path) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let db = open_writable(path)?;
    let stats = db.compact()?;
    db.close()?;
    Ok(stats)
}
