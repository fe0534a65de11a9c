// src/cache.rs

//! Cache cleanup
//!
//! `starpack clean` sweeps the archive/manifest cache under the install
//! root and stray starpack artifacts left in the system temp directory.

use crate::config::layout;
use crate::error::Result;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Remove regular files in `dir` whose name ends with one of `suffixes`;
/// an empty suffix list removes every regular file.
fn sweep_dir(dir: &Path, suffixes: &[&str]) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let matches = suffixes.is_empty() || suffixes.iter().any(|s| name.ends_with(s));
        if matches {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Could not remove {}: {}", path.display(), e);
            } else {
                println!("Removed: {}", path.display());
            }
        }
    }
}

/// Clean the package cache and temp-dir leftovers
pub fn clean(install_root: &Path) -> Result<()> {
    println!("Cleaning up Starpack cache...");

    sweep_dir(&std::env::temp_dir(), &[".starpack", ".sig", ".yaml"]);
    sweep_dir(&layout::cache_dir(install_root), &[]);

    println!("Cache cleanup completed.");
    Ok(())
}
