// src/update.rs

//! Package updates
//!
//! For every requested package the updater queries each repository
//! manifest and keeps the best candidate, ordered by version and then by
//! update time. Candidates that beat the installed state are downloaded,
//! verified, extracted into a staging directory under the system temp dir,
//! and moved into place file by file; afterwards the DB record's version
//! and update time are patched and files the new version no longer ships
//! are swept away.

use crate::archive;
use crate::config::{self, RepoConfig};
use crate::db::InstalledDb;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::hooks::{self, Phase};
use crate::install::confirm_packages;
use crate::manifest::{load_metadata, ManifestEntry, RepoIndex};
use crate::remove::is_critical_package;
use crate::verify;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Compare two `DD/MM/YYYY` date strings: -1, 0, or 1. A pair that does
/// not parse compares as equal, so a bad date never decides an update by
/// itself.
pub fn compare_dates(a: &str, b: &str) -> i32 {
    let parse = |s: &str| NaiveDate::parse_from_str(s, "%d/%m/%Y").ok();
    match (parse(a), parse(b)) {
        (Some(da), Some(db)) => {
            if da > db {
                1
            } else if da < db {
                -1
            } else {
                0
            }
        }
        _ => {
            warn!("Could not parse date '{}' or '{}' as DD/MM/YYYY", a, b);
            0
        }
    }
}

/// The best available build of one package across all repositories
#[derive(Debug, Clone)]
struct UpdateCandidate {
    name: String,
    version: String,
    update_time: Option<String>,
    file_url: String,
    metadata: ManifestEntry,
}

fn better_candidate(current: Option<&UpdateCandidate>, version: &str, update_time: &Option<String>) -> bool {
    let Some(best) = current else {
        return true;
    };
    match crate::version::compare_versions(version, &best.version) {
        1 => true,
        0 => match (update_time, &best.update_time) {
            (Some(_), None) => true,
            (Some(new), Some(old)) => compare_dates(new, old) > 0,
            _ => false,
        },
        _ => false,
    }
}

/// Decide whether the installed state already covers the candidate
fn is_up_to_date(
    installed_version: Option<&str>,
    installed_time: Option<&str>,
    candidate: &UpdateCandidate,
) -> bool {
    let Some(installed_version) = installed_version else {
        return false;
    };
    match crate::version::compare_versions(installed_version, &candidate.version) {
        1 => true,
        0 => match (&candidate.update_time, installed_time) {
            (None, _) => true,
            (Some(cand_time), Some(inst_time)) => compare_dates(inst_time, cand_time) >= 0,
            (Some(_), None) => false,
        },
        _ => false,
    }
}

/// Move everything under `staging` into `install_root`, creating parent
/// directories and replacing existing destinations. Rename first, copy
/// when the temp dir lives on a different filesystem.
fn apply_staged_files(staging: &Path, install_root: &Path) -> Result<()> {
    for item in WalkDir::new(staging) {
        let item = item.map_err(|e| Error::Io(e.into()))?;
        let Ok(relative) = item.path().strip_prefix(staging) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let dest = install_root.join(relative);

        if item.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if fs::symlink_metadata(&dest).is_ok() {
            if dest.is_dir() && !dest.is_symlink() {
                fs::remove_dir_all(&dest)?;
            } else {
                fs::remove_file(&dest)?;
            }
        }
        if fs::rename(item.path(), &dest).is_err() {
            fs::copy(item.path(), &dest)?;
            fs::remove_file(item.path())?;
        }
    }
    Ok(())
}

/// Remove files the previous version installed that the new file list no
/// longer contains. Directories are removed only when empty.
fn remove_obsolete_files(package: &str, install_root: &Path, db: &InstalledDb, new_files: &[String]) {
    let old_files = match db.files_of(package) {
        Ok(files) => files,
        Err(e) => {
            warn!("Could not read old file list for {}: {}", package, e);
            return;
        }
    };

    let new_set: HashSet<String> = new_files
        .iter()
        .map(|f| f.trim_start_matches('/').trim_end_matches('/').to_string())
        .filter(|f| !f.is_empty())
        .collect();

    for old in old_files {
        let relative = old.trim_start_matches('/');
        if relative.is_empty() || new_set.contains(relative) {
            continue;
        }
        let path = install_root.join(relative);
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };

        let result = if meta.is_dir() {
            match fs::read_dir(&path).map(|mut d| d.next().is_none()) {
                Ok(true) => fs::remove_dir(&path).map(|_| {
                    println!("Removed obsolete empty directory: {}", path.display());
                }),
                _ => Ok(()),
            }
        } else {
            fs::remove_file(&path).map(|_| {
                println!("Removed obsolete file: {}", path.display());
            })
        };
        if let Err(e) = result {
            warn!("Error removing obsolete item {}: {}", path.display(), e);
        }
    }
}

/// Fetch every repository manifest fresh, returning (base url, index)
fn fetch_repo_indexes(repos: &RepoConfig, downloader: &Downloader) -> Result<Vec<(String, RepoIndex)>> {
    let scratch = TempDir::new()?;
    let mut indexes = Vec::new();

    for (i, repo_url) in repos.repositories.iter().enumerate() {
        let index_url = format!("{}repo.db.yaml", repo_url);
        let local = scratch.path().join(format!("repo-{}.yaml", i));
        println!("    Checking repo: {}", index_url);
        if let Err(e) = downloader.fetch(&index_url, &local) {
            warn!("Could not download {}: {}", index_url, e);
            continue;
        }
        match RepoIndex::load(&local) {
            Ok(index) => indexes.push((repo_url.clone(), index)),
            Err(e) => warn!("Failed to parse {}: {}", index_url, e),
        }
    }
    Ok(indexes)
}

/// Update the requested packages under `install_root`
pub fn update_packages(requested: &[String], install_root: &Path, confirm: bool) -> Result<()> {
    let db = InstalledDb::for_root(install_root);

    println!("[1/4] Loading repository configuration...");
    let repos = RepoConfig::load_required(config::REPOS_CONF)?;
    println!("Found {} repository URL(s).", repos.repositories.len());

    println!("[2/4] Checking repositories for updates...");
    let downloader = Downloader::new()?;
    let indexes = fetch_repo_indexes(&repos, &downloader)?;

    let mut candidates: Vec<UpdateCandidate> = Vec::new();
    for name in requested {
        println!(" -> Checking updates for: {}", name);
        let mut best: Option<UpdateCandidate> = None;

        for (repo_url, index) in &indexes {
            for entry in &index.packages {
                if entry.name != *name || entry.file_name.is_empty() {
                    continue;
                }
                if better_candidate(best.as_ref(), &entry.version, &entry.update_time) {
                    best = Some(UpdateCandidate {
                        name: name.clone(),
                        version: entry.version.clone(),
                        update_time: entry.update_time.clone(),
                        file_url: format!("{}{}", repo_url, entry.file_name),
                        metadata: entry.clone(),
                    });
                }
            }
        }

        let Some(candidate) = best else {
            println!("Info: '{}' not found in any repository.", name);
            continue;
        };

        let installed_version = db.version_of(name)?;
        let installed_time = db.update_time_of(name)?;
        if is_up_to_date(
            installed_version.as_deref(),
            installed_time.as_deref(),
            &candidate,
        ) {
            println!("Info: '{}' is already up-to-date.", name);
            continue;
        }

        println!(
            "Info: update found for '{}' (installed: {}, available: {})",
            name,
            installed_version.as_deref().unwrap_or("none"),
            candidate.version
        );
        candidates.push(candidate);
    }

    if candidates.is_empty() {
        println!("All specified packages are up-to-date or not found.");
        return Ok(());
    }

    println!("[3/4] Confirming updates...");
    if candidates.iter().any(|c| is_critical_package(&c.name)) {
        println!("WARNING: at least one critical package is about to be updated!");
    }
    let display: Vec<String> = candidates
        .iter()
        .map(|c| format!("{} ({})", c.name, c.version))
        .collect();
    if confirm && !confirm_packages("The following packages will be updated:", &display) {
        println!("Update canceled.");
        return Ok(());
    }

    println!("[4/4] Applying updates...");
    let total = candidates.len();
    for (i, candidate) in candidates.iter().enumerate() {
        println!(
            "\n({}/{}) Updating: {} to {}{}",
            i + 1,
            total,
            candidate.name,
            candidate.version,
            candidate
                .update_time
                .as_deref()
                .map(|t| format!(" (update time: {})", t))
                .unwrap_or_default()
        );

        let work_dir = std::env::temp_dir().join(format!("starpack_update_{}", candidate.name));
        let _ = fs::remove_dir_all(&work_dir);
        fs::create_dir_all(&work_dir)?;

        let result = apply_one_update(candidate, &work_dir, install_root, &db, &downloader);
        let _ = fs::remove_dir_all(&work_dir);
        result?;

        println!("Package updated successfully: {}", candidate.name);
        if is_critical_package(&candidate.name) {
            println!(
                "NOTICE: '{}' is critical. A reboot is recommended.",
                candidate.name
            );
        }
    }

    println!("\n--- Update process finished. ---");
    Ok(())
}

fn apply_one_update(
    candidate: &UpdateCandidate,
    work_dir: &Path,
    install_root: &Path,
    db: &InstalledDb,
    downloader: &Downloader,
) -> Result<()> {
    let package_path = work_dir.join(format!("{}.starpack", candidate.name));
    let sig_path = PathBuf::from(format!("{}.sig", package_path.display()));

    println!("  Downloading package...");
    downloader.fetch(&candidate.file_url, &package_path)?;
    println!("  Downloading signature...");
    downloader.fetch(&format!("{}.sig", candidate.file_url), &sig_path)?;

    println!("  Verifying signature...");
    verify::verify_signature(&package_path, &sig_path, install_root)?;

    // The archive's own metadata.yaml is authoritative; the repository
    // entry is only the fallback.
    let meta_dir = work_dir.join("meta");
    let metadata = if archive::extract_entry(&package_path, "metadata.yaml", &meta_dir)? {
        match load_metadata(&meta_dir.join("metadata.yaml")) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Could not parse embedded metadata.yaml ({}); using repo metadata", e);
                candidate.metadata.clone()
            }
        }
    } else {
        warn!("No metadata.yaml in archive; using repo metadata");
        candidate.metadata.clone()
    };

    if metadata.files.is_empty() {
        return Err(Error::Dependency(format!(
            "invalid metadata for '{}': empty file list",
            candidate.name
        )));
    }

    let changed: Vec<String> = metadata
        .files
        .iter()
        .map(|f| f.trim_start_matches('/').to_string())
        .filter(|f| !f.is_empty())
        .collect();

    println!("  Running PreUpdate hooks...");
    let pre = hooks::run_hooks(
        Phase::PreUpdate,
        "Update",
        &changed,
        install_root,
        Some(candidate.name.as_str()),
    )?;
    if pre > 0 {
        println!("    ({} PreUpdate hooks executed)", pre);
    }

    println!("  Extracting updated files...");
    let staging = work_dir.join("staging");
    let update_dirs = metadata.update_dirs.clone().unwrap_or_default();
    archive::extract_subtree_within(
        &package_path,
        "files/",
        &staging,
        metadata.strip_components,
        &update_dirs,
    )?;

    println!("  Applying file updates...");
    apply_staged_files(&staging, install_root)?;

    println!("  Updating installation database...");
    db.update_version_and_time(
        &candidate.name,
        &candidate.version,
        candidate.update_time.as_deref().unwrap_or_default(),
    )?;

    if metadata.update_dirs.is_none() {
        println!("  Removing obsolete files...");
        remove_obsolete_files(&candidate.name, install_root, db, &metadata.files);
    }

    println!("  Running PostUpdate hooks...");
    let post = hooks::run_hooks(
        Phase::PostUpdate,
        "Update",
        &changed,
        install_root,
        Some(candidate.name.as_str()),
    )?;
    if post > 0 {
        println!("    ({} PostUpdate hooks executed)", post);
    }

    info!("Updated {} to {}", candidate.name, candidate.version);
    Ok(())
}
