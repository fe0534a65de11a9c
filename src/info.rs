// src/info.rs

//! Package information lookup
//!
//! `starpack info <pkg>` prints the installed DB record when the package
//! is present locally, and otherwise searches the configured repository
//! manifests.

use crate::config::{self, layout, RepoConfig};
use crate::db::InstalledDb;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::install::load_package_sources;
use std::path::Path;

/// Print what we know about a package, preferring local state
pub fn show(package: &str, install_root: &Path) -> Result<()> {
    let db = InstalledDb::for_root(install_root);
    if let Some(record) = db.record_text(package)? {
        println!("Installed package:");
        print!("{}", record);
        return Ok(());
    }

    let repos = RepoConfig::load_required(config::REPOS_CONF)?;
    let downloader = Downloader::new()?;
    let sources = load_package_sources(&repos, &layout::cache_dir(install_root), &downloader)?;

    let Some((repo_url, entry)) = sources.get(package) else {
        return Err(Error::NotFound(format!(
            "{} (not installed and not in any repository)",
            package
        )));
    };

    println!("Repository package ({}):", repo_url);
    println!("Name: {}", entry.name);
    println!("Version: {}", entry.version);
    if !entry.description.is_empty() {
        println!("Description: {}", entry.description);
    }
    if !entry.file_name.is_empty() {
        println!("Archive: {}", entry.file_name);
    }
    if !entry.dependencies.is_empty() {
        println!("Dependencies:");
        for dep in &entry.dependencies {
            println!("  {}", dep);
        }
    }
    if !entry.files.is_empty() {
        println!("Files:");
        for file in &entry.files {
            println!("  /{}", file.trim_start_matches('/'));
        }
    }
    Ok(())
}
