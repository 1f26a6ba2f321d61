//! Inspect command implementation.

use super::open_read_only;
use crate::Format;
use kindb_core::{HistoryItem, StoreStats};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Persisted counts and flags.
    pub stats: StoreStats,
    /// Undoable transactions, newest first.
    pub history: Vec<HistoryItem>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

/// Collects the inspection result.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let db = open_read_only(path)?;
    let stats = db.store_stats()?;
    let history = db.undo_history()?;
    db.close()?;
    Ok(InspectResult {
        path: path.display().to_string(),
        stats,
        history,
    })
}

fn print_text_output(result: &InspectResult) {
    let stats = &result.stats;
    println!("kindb Store Inspection");
    println!("======================");
    println!();
    println!("Path: {}", result.path);
    println!("Log:  {}", format_size(stats.log_bytes));
    println!();
    println!("Records:");
    for (class, count) in &stats.records {
        println!("  {:<12} {}", class.name(), count);
    }
    println!("  {:<12} {}", "total", stats.total_records());
    println!();
    println!("Reference map entries: {}", stats.reference_entries);
    println!("Undo depth:            {}", stats.undo_depth);
    println!("Redo depth:            {}", stats.redo_depth);
    println!();
    println!("Flags:");
    println!("  needs rebuild:  {}", stats.needs_rebuild);
    println!("  needs recovery: {}", stats.needs_recovery);

    if !result.history.is_empty() {
        println!();
        println!("History (newest first):");
        for item in &result.history {
            println!(
                "  {} {:>4} change(s)  {}",
                item.txn_id, item.changes, item.description
            );
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seed;
    use kindb_core::ObjectClass;
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_counts_and_history() {
        let temp = tempdir().unwrap();
        seed(temp.path());

        let result = inspect(temp.path()).unwrap();
        assert_eq!(result.stats.records[&ObjectClass::Person], 1);
        assert_eq!(result.stats.records[&ObjectClass::Family], 1);
        assert_eq!(result.stats.reference_entries, 1);
        assert_eq!(result.history.len(), 1);
        assert_eq!(result.history[0].description, "seed");
        assert!(!result.stats.needs_recovery);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stats"]["undo_depth"], 1);
    }

    #[test]
    fn inspect_rejects_missing_store() {
        let temp = tempdir().unwrap();
        assert!(inspect(&temp.path().join("absent")).is_err());
    }
}
