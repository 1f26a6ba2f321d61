//! Backlinks command implementation.

use super::open_read_only;
use kindb_core::{Backlink, Handle, ObjectClass};
use std::path::Path;

/// Runs the backlinks command.
///
/// An empty `classes` lists referencing objects of every class.
pub fn run(
    path: &Path,
    handle: &str,
    classes: &[ObjectClass],
) -> Result<(), Box<dyn std::error::Error>> {
    let target: Handle = handle.parse()?;
    let links = backlinks(path, target, classes)?;
    if links.is_empty() {
        println!("Nothing references {}", target);
    }
    for link in &links {
        println!("{:<12} {}", link.class.name(), link.handle);
    }
    Ok(())
}

/// Reads the backlinks of `target`, limited to `classes` unless empty.
pub fn backlinks(
    path: &Path,
    target: Handle,
    classes: &[ObjectClass],
) -> Result<Vec<Backlink>, Box<dyn std::error::Error>> {
    let db = open_read_only(path)?;
    let found = if classes.is_empty() {
        db.find_backlinks(target)?
    } else {
        db.find_backlinks_in(target, classes)?
    };
    let links = found.collect::<Result<Vec<_>, _>>()?;
    db.close()?;
    Ok(links)
}
