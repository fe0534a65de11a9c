// src/db.rs

//! Line-oriented installed-package database
//!
//! The database is an ordered sequence of textual records in a single file
//! at `<root>/var/lib/starpack/installed.db`. A record starts with a
//! `<name> /` header line and ends with a line of exactly forty dashes:
//!
//! ```text
//! demo /
//! Version: 1.0.0
//! Description: An example
//! Update-time: 2024-03-01T12:00:00Z
//! Files:
//! /usr/bin/demo
//! Dependencies:
//! zlib
//! ----------------------------------------
//! ```
//!
//! Install appends, remove splices the record out through a tempfile
//! rename, update patches the `Version:` and `Update-time:` lines in place.
//! The file has a single writer per process.

use crate::error::{Error, Result};
use crate::manifest::{canonical_name, ManifestEntry};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Record terminator: exactly forty dashes
pub const RECORD_TERMINATOR: &str = "----------------------------------------";

/// Handle over one installed.db file
#[derive(Debug, Clone)]
pub struct InstalledDb {
    path: PathBuf,
}

impl InstalledDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The conventional database location under an install root
    pub fn for_root(root: &Path) -> Self {
        Self::new(crate::config::layout::db_path(root))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the database directory and an empty file when absent
    pub fn ensure_exists(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !self.path.exists() {
            info!("Creating empty database file: {}", self.path.display());
            fs::File::create(&self.path)?;
        }
        Ok(())
    }

    fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .map_err(|e| Error::Database(format!("cannot read {}: {}", self.path.display(), e)))
    }

    fn header_for(name: &str) -> String {
        format!("{} /", name)
    }

    /// True when a record for `name` exists. A missing database file means
    /// nothing is installed.
    pub fn is_installed(&self, name: &str) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let header = Self::header_for(name);
        Ok(self.read()?.lines().any(|line| line.starts_with(&header)))
    }

    /// Iterate the lines of the named record (header excluded, terminator
    /// excluded), calling `visit` for each until it returns false.
    fn scan_record<F>(&self, name: &str, mut visit: F) -> Result<bool>
    where
        F: FnMut(&str) -> bool,
    {
        if !self.path.exists() {
            return Ok(false);
        }
        let content = self.read()?;
        let header = Self::header_for(name);
        let mut inside = false;
        for line in content.lines() {
            if !inside {
                if line.starts_with(&header) {
                    inside = true;
                }
            } else {
                if line == RECORD_TERMINATOR {
                    return Ok(true);
                }
                if !visit(line) {
                    return Ok(true);
                }
            }
        }
        Ok(inside)
    }

    fn field_of(&self, name: &str, keys: &[&str]) -> Result<Option<String>> {
        let mut value = None;
        self.scan_record(name, |line| {
            for key in keys {
                if let Some(rest) = line.strip_prefix(key) {
                    value = Some(rest.trim().to_string());
                    return false;
                }
            }
            true
        })?;
        Ok(value)
    }

    /// Installed version of `name`, if recorded
    pub fn version_of(&self, name: &str) -> Result<Option<String>> {
        self.field_of(name, &["Version:"])
    }

    /// Recorded update time; both `Update-time:` and the legacy
    /// `Build-date:` spelling are accepted.
    pub fn update_time_of(&self, name: &str) -> Result<Option<String>> {
        self.field_of(name, &["Update-time:", "Build-date:"])
    }

    /// Absolute paths owned by the named package
    pub fn files_of(&self, name: &str) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut in_files = false;
        self.scan_record(name, |line| {
            if line == "Files:" {
                in_files = true;
            } else if line == "Dependencies:" {
                in_files = false;
            } else if in_files && line.starts_with('/') {
                files.push(line.to_string());
            }
            true
        })?;
        Ok(files)
    }

    /// Declared dependencies of the named package
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<String>> {
        let mut deps = Vec::new();
        let mut in_deps = false;
        self.scan_record(name, |line| {
            if line == "Dependencies:" {
                in_deps = true;
            } else if in_deps {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    deps.push(trimmed.to_string());
                }
            }
            true
        })?;
        Ok(deps)
    }

    /// Every installed package name, in record order
    pub fn installed_names(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = self.read()?;
        let mut names = Vec::new();
        for line in content.lines() {
            if let Some(name) = line.strip_suffix(" /") {
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Packages whose dependency list contains `name`
    pub fn reverse_dependencies(&self, name: &str) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = self.read()?;
        let mut result = Vec::new();
        let mut current: Option<String> = None;
        let mut in_deps = false;

        for line in content.lines() {
            if let Some(pkg) = line.strip_suffix(" /") {
                current = Some(pkg.to_string());
                in_deps = false;
            } else if line == RECORD_TERMINATOR {
                current = None;
                in_deps = false;
            } else if line == "Dependencies:" && current.is_some() {
                in_deps = true;
            } else if in_deps && line.trim() == name {
                if let Some(pkg) = &current {
                    if !result.contains(pkg) {
                        result.push(pkg.clone());
                    }
                }
            }
        }
        Ok(result)
    }

    /// Installed packages that no other record (excluding `excluding`)
    /// lists as a dependency.
    pub fn orphans(&self, excluding: &str) -> Result<Vec<String>> {
        let names = self.installed_names()?;
        let mut required: HashSet<String> = HashSet::new();
        for pkg in &names {
            if pkg == excluding {
                continue;
            }
            for dep in self.dependencies_of(pkg)? {
                required.insert(dep);
            }
        }

        // BTreeSet keeps the output deterministic
        let orphaned: BTreeSet<String> = names
            .into_iter()
            .filter(|pkg| pkg != excluding && !required.contains(pkg.as_str()))
            .collect();
        Ok(orphaned.into_iter().collect())
    }

    /// Append a record assembled from the manifest entry. Field order is
    /// fixed; file paths are forced absolute.
    pub fn append_record(&self, name: &str, entry: &ManifestEntry) -> Result<()> {
        self.ensure_exists()?;
        let name = canonical_name(name);

        let mut block = String::new();
        block.push_str(&format!("{} /\n", name));
        block.push_str(&format!("Version: {}\n", entry.version));
        if !entry.description.is_empty() {
            block.push_str(&format!("Description: {}\n", entry.description));
        }
        if let Some(size) = &entry.size {
            block.push_str(&format!("Size: {}\n", size));
        }
        if let Some(arch) = &entry.arch {
            block.push_str(&format!("Architecture: {}\n", arch));
        }
        if let Some(update_time) = &entry.update_time {
            block.push_str(&format!("Update-time: {}\n", update_time));
        } else if let Some(build_date) = &entry.build_date {
            block.push_str(&format!("Build-date: {}\n", build_date));
        }

        block.push_str("Files:\n");
        for file in &entry.files {
            if file.is_empty() {
                continue;
            }
            if file.starts_with('/') {
                block.push_str(&format!("{}\n", file));
            } else {
                block.push_str(&format!("/{}\n", file));
            }
        }

        block.push_str("Dependencies:\n");
        for dep in &entry.dependencies {
            if !dep.is_empty() {
                block.push_str(&format!("{}\n", dep));
            }
        }
        block.push_str(RECORD_TERMINATOR);
        block.push('\n');

        let mut file = fs::OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(block.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Remove the named record by copying every other line to a tempfile
    /// and renaming it over the database. The tempfile is removed when the
    /// rename fails.
    pub fn splice_record(&self, name: &str) -> Result<()> {
        let content = self.read()?;
        let parent = self
            .path
            .parent()
            .ok_or_else(|| Error::Database("database has no parent directory".into()))?;

        let mut temp = NamedTempFile::new_in(parent)
            .map_err(|e| Error::Database(format!("cannot create tempfile: {}", e)))?;

        let header = Self::header_for(name);
        let mut skipping = false;
        for line in content.lines() {
            if !skipping && line == header {
                skipping = true;
                continue;
            }
            if skipping {
                if line == RECORD_TERMINATOR {
                    skipping = false;
                }
                continue;
            }
            writeln!(temp, "{}", line)?;
        }
        temp.flush()?;

        temp.persist(&self.path).map_err(|e| {
            // persist removes the tempfile itself on error
            Error::Database(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e.error
            ))
        })?;
        info!("Database updated (removed entry for {})", name);
        Ok(())
    }

    /// Patch only the `Version:` and `Update-time:` lines inside the named
    /// record's span. A record missing either line is left untouched.
    pub fn update_version_and_time(
        &self,
        name: &str,
        new_version: &str,
        new_time: &str,
    ) -> Result<()> {
        let content = self.read()?;
        let header = Self::header_for(name);

        let mut out = String::with_capacity(content.len());
        let mut inside = false;
        let mut version_patched = false;
        let mut time_patched = false;

        for line in content.lines() {
            if !inside && line.starts_with(&header) {
                inside = true;
                out.push_str(line);
            } else if inside {
                if line.starts_with("Version:") {
                    out.push_str(&format!("Version: {}", new_version));
                    version_patched = true;
                } else if line.starts_with("Update-time:") {
                    out.push_str(&format!("Update-time: {}", new_time));
                    time_patched = true;
                } else {
                    out.push_str(line);
                }
                if line == RECORD_TERMINATOR {
                    inside = false;
                }
            } else {
                out.push_str(line);
            }
            out.push('\n');
        }

        if !version_patched || !time_patched {
            warn!(
                "Record for {} is missing Version/Update-time; not updated",
                name
            );
            return Ok(());
        }

        let mut file = fs::File::create(&self.path)?;
        file.write_all(out.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// The raw record text for `name` including header and terminator
    pub fn record_text(&self, name: &str) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = self.read()?;
        let header = Self::header_for(name);
        let mut inside = false;
        let mut record = String::new();
        for line in content.lines() {
            if !inside && line.starts_with(&header) {
                inside = true;
            }
            if inside {
                record.push_str(line);
                record.push('\n');
                if line == RECORD_TERMINATOR {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }
}
