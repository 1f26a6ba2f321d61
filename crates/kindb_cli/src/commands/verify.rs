//! Verify command implementation.

use super::{open_read_only, CliError};
use crate::Format;
use kindb_core::VerifyReport;
use std::path::Path;

/// Runs the verify command.
///
/// Fails with [`CliError::Drift`] if the stored reference map differs from
/// the one the records imply.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let report = verify(path)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_report(path, &report),
    }
    check(&report)?;
    Ok(())
}

/// Cross-checks the reference map of the store at `path`.
pub fn verify(path: &Path) -> Result<VerifyReport, Box<dyn std::error::Error>> {
    let db = open_read_only(path)?;
    let report = db.verify_reference_map()?;
    db.close()?;
    Ok(report)
}

fn check(report: &VerifyReport) -> Result<(), CliError> {
    if report.is_consistent() {
        Ok(())
    } else {
        Err(CliError::Drift {
            missing: report.missing.len(),
            unexpected: report.unexpected.len(),
        })
    }
}

fn print_report(path: &Path, report: &VerifyReport) {
    println!("Verifying store at {:?}", path);
    println!();
    println!("  Records checked: {}", report.records);
    println!("  Missing entries: {}", report.missing.len());
    println!("  Extra entries:   {}", report.unexpected.len());
    println!("  Dangling refs:   {}", report.dangling.len());
    println!("  Corrupt records: {}", report.corrupt.len());

    for (target, link) in report.missing.iter().take(20) {
        println!("    missing: {} <- {} {}", target, link.class, link.handle);
    }
    for (target, link) in report.unexpected.iter().take(20) {
        println!("    extra:   {} <- {} {}", target, link.class, link.handle);
    }
    for dangling in report.dangling.iter().take(20) {
        println!(
            "    dangling: {} {} -> {} {}",
            dangling.from.class, dangling.from.handle, dangling.target_class, dangling.target
        );
    }
    for (class, handle) in report.corrupt.iter().take(20) {
        println!("    corrupt: {} {}", class, handle);
    }
    if report.needs_rebuild {
        println!();
        println!("  The reference map is flagged for rebuild.");
    }

    println!();
    if report.is_consistent() {
        println!("✓ Reference map verification passed");
    } else {
        println!("✗ Reference map verification failed; run `kindb rebuild`");
    }
}
