// src/install.rs

//! Package installation
//!
//! The install transaction walks a fixed sequence: load the repository
//! list, fetch and parse every manifest, close and order the dependency
//! set, confirm with the user, download archives and signatures into the
//! cache, verify them, then apply package by package. PostInstall hooks
//! are deferred until every package is on disk.

use crate::archive;
use crate::config::{self, layout, RepoConfig};
use crate::db::InstalledDb;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::hooks::{self, Phase};
use crate::manifest::{cached_manifest_name, PackageSources, RepoIndex};
use crate::resolver;
use crate::verify;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Simple one-line progress bar, reused by the apply loop
pub(crate) fn print_progress(current: usize, total: usize) {
    if total == 0 {
        return;
    }
    let fraction = (current as f64 / total as f64).min(1.0);
    const WIDTH: usize = 50;
    let filled = (WIDTH as f64 * fraction) as usize;

    print!("\rProgress: [");
    for i in 0..WIDTH {
        if i < filled {
            print!("=");
        } else if i == filled {
            print!(">");
        } else {
            print!(" ");
        }
    }
    print!("] {:.0}% ({}/{})", fraction * 100.0, current, total);
    let _ = io::stdout().flush();
    if current == total {
        println!();
    }
}

/// Prompt for a Y/n confirmation on the package list
pub(crate) fn confirm_packages(prompt: &str, packages: &[String]) -> bool {
    if packages.is_empty() {
        return true;
    }
    println!("\n{}", prompt);
    println!("  {}", packages.join(" "));
    print!("Proceed? [Y/n]: ");
    let _ = io::stdout().flush();

    let mut response = String::new();
    if io::stdin().lock().read_line(&mut response).is_err() {
        return false;
    }
    let response = response.trim().to_lowercase();
    response.is_empty() || response == "y" || response == "yes"
}

/// Copy a directory tree, overwriting existing files
fn copy_tree(src: &Path, dst: &Path) {
    if !src.is_dir() {
        return;
    }
    for item in WalkDir::new(src).into_iter().flatten() {
        let Ok(relative) = item.path().strip_prefix(src) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(relative);
        let result = if item.file_type().is_dir() {
            fs::create_dir_all(&target)
        } else {
            target
                .parent()
                .map(fs::create_dir_all)
                .unwrap_or(Ok(()))
                .and_then(|_| fs::copy(item.path(), &target).map(|_| ()))
        };
        if let Err(e) = result {
            warn!(
                "Could not copy {} to {}: {}",
                item.path().display(),
                target.display(),
                e
            );
        }
    }
}

/// After extraction, seed `/root` and every first-level home directory
/// from `<root>/etc/skel` when it exists.
fn populate_skel(install_root: &Path) {
    let skel = install_root.join("etc/skel");
    if !skel.is_dir() {
        return;
    }

    copy_tree(&skel, &install_root.join("root"));

    let home = install_root.join("home");
    if home.is_dir() {
        if let Ok(entries) = fs::read_dir(&home) {
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    copy_tree(&skel, &entry.path());
                }
            }
        }
    }
}

/// Pull the archive's `hooks/` sub-tree into the per-package hooks
/// directory. A package without hooks is not an error.
fn install_package_hooks(
    archive_path: &Path,
    strip: u32,
    install_root: &Path,
    package: &str,
) -> Result<()> {
    let scratch = TempDir::new()?;
    archive::extract_subtree(archive_path, "hooks/", scratch.path(), strip)?;

    let dest_dir = layout::hooks_dir(install_root).join(package);
    let mut found = false;

    if let Ok(entries) = fs::read_dir(scratch.path()) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "hook") {
                if !found {
                    fs::create_dir_all(&dest_dir)?;
                    found = true;
                }
                let dest = dest_dir.join(entry.file_name());
                if let Err(e) = fs::copy(&path, &dest) {
                    warn!("Could not install hook {}: {}", dest.display(), e);
                } else {
                    info!("Installed hook: {}", dest.display());
                }
            }
        }
    }
    Ok(())
}

/// Fetch every configured repository's manifest into the cache and merge
/// them with first-wins precedence. A repository whose manifest cannot be
/// fetched or parsed is disabled for this transaction with a warning.
pub fn load_package_sources(
    repos: &RepoConfig,
    cache_dir: &Path,
    downloader: &Downloader,
) -> Result<PackageSources> {
    fs::create_dir_all(cache_dir)?;

    let mut jobs: Vec<(String, PathBuf)> = Vec::new();
    for repo_url in &repos.repositories {
        let local = cache_dir.join(cached_manifest_name(repo_url));
        // Manifests are refreshed on every transaction
        let _ = fs::remove_file(&local);
        jobs.push((format!("{}repo.db.yaml", repo_url), local));
    }

    if !downloader.fetch_many(&jobs) {
        warn!("One or more repository manifests could not be downloaded");
    }

    let mut sources = PackageSources::new();
    for (repo_url, (_, local)) in repos.repositories.iter().zip(jobs.iter()) {
        if !local.exists() {
            warn!("Skipping repository {} (manifest unavailable)", repo_url);
            continue;
        }
        match RepoIndex::load(local) {
            Ok(index) => {
                let count = sources.ingest(repo_url, index);
                println!(" -> Loaded {} package definitions from {}", count, repo_url);
            }
            Err(e) => {
                warn!("Skipping repository {} (manifest parse error: {})", repo_url, e);
            }
        }
    }
    Ok(sources)
}

/// Install the requested packages and their dependencies into
/// `install_root`.
pub fn install_packages(requested: &[String], install_root: &Path, confirm: bool) -> Result<()> {
    println!("--- Starpack Installation ---");
    println!("Target directory: {}", install_root.display());

    let db = InstalledDb::for_root(install_root);
    db.ensure_exists()?;

    println!("[1/8] Loading repository configuration...");
    let repos = RepoConfig::load_required(config::REPOS_CONF)?;
    println!("Found {} repository URL(s).", repos.repositories.len());

    println!("[2/8] Downloading repository databases...");
    let cache_dir = layout::cache_dir(install_root);
    let downloader = Downloader::new()?;

    println!("[3/8] Loading repository databases...");
    let sources = load_package_sources(&repos, &cache_dir, &downloader)?;
    if sources.is_empty() {
        return Err(Error::Config(
            "no packages found in any repository database".into(),
        ));
    }

    println!("[4/8] Resolving dependencies...");
    let plan = resolver::plan_installation(requested, &sources, &db)?;
    if plan.is_empty() {
        println!("All requested packages and dependencies are already installed.");
        return Ok(());
    }
    println!("Packages to install (in order): {}", plan.join(", "));

    if confirm && !confirm_packages("The following packages will be installed:", &plan) {
        println!("Aborting installation.");
        return Ok(());
    }

    println!("[5/8] Downloading package files and signatures...");
    let mut jobs: Vec<(String, PathBuf)> = Vec::new();
    for name in &plan {
        let (repo_url, entry) = sources
            .get(name)
            .ok_or_else(|| Error::NotFound(name.clone()))?;
        if entry.file_name.is_empty() {
            return Err(Error::Dependency(format!(
                "missing file_name in metadata for '{}'",
                name
            )));
        }
        let file_url = format!("{}{}", repo_url, entry.file_name);
        let local = cache_dir.join(&entry.file_name);
        jobs.push((file_url.clone(), local.clone()));
        jobs.push((
            format!("{}.sig", file_url),
            PathBuf::from(format!("{}.sig", local.display())),
        ));
    }
    if !downloader.fetch_many(&jobs) {
        return Err(Error::Download(
            "one or more package or signature downloads failed".into(),
        ));
    }

    println!("[6/8] Verifying package signatures...");
    for name in &plan {
        let (_, entry) = sources.get(name).expect("planned package has a source");
        let package_path = cache_dir.join(&entry.file_name);
        let sig_path = PathBuf::from(format!("{}.sig", package_path.display()));
        print!(" -> Verifying {}...", name);
        let _ = io::stdout().flush();
        verify::verify_signature(&package_path, &sig_path, install_root)?;
        println!(" OK");
    }

    println!("[7/8] Installing packages...");
    let total = plan.len();
    let mut post_install: Vec<(String, Vec<String>)> = Vec::new();

    for (i, name) in plan.iter().enumerate() {
        println!("\n({}/{}) Installing {}...", i + 1, total, name);
        if db.is_installed(name)? {
            println!("   Skipping already installed package: {}", name);
            print_progress(i + 1, total);
            continue;
        }

        let (_, entry) = sources.get(name).expect("planned package has a source");
        let package_path = cache_dir.join(&entry.file_name);

        println!(" -> Running PreInstall hooks...");
        hooks::run_hooks(Phase::PreInstall, "Install", &[], install_root, Some(name.as_str()))?;

        println!(" -> Extracting package files...");
        archive::extract_subtree(
            &package_path,
            "files/",
            install_root,
            entry.strip_components,
        )?;

        populate_skel(install_root);

        println!(" -> Installing hooks...");
        install_package_hooks(&package_path, entry.strip_components, install_root, name)?;

        let affected: Vec<String> = entry
            .files
            .iter()
            .map(|f| f.trim_start_matches('/').to_string())
            .filter(|f| !f.is_empty())
            .collect();

        println!(" -> Updating installation database...");
        db.append_record(name, entry)?;

        post_install.push((name.clone(), affected));
        println!(" -> Finished installing {}", name);
        print_progress(i + 1, total);
    }

    println!("\n[7.5/8] Running PostInstall hooks...");
    for (name, affected) in &post_install {
        let executed =
            hooks::run_hooks(Phase::PostInstall, "Install", affected, install_root, Some(name.as_str()))?;
        if executed > 0 {
            println!(
                " -> Finished PostInstall hooks for {}: {} hook(s) executed",
                name, executed
            );
        }
    }

    println!("[8/8] Installation process finished.");
    println!("--- Installation Complete ---");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_overwrites() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/file"), "new").unwrap();
        fs::create_dir_all(dst.path().join("sub")).unwrap();
        fs::write(dst.path().join("sub/file"), "old").unwrap();

        copy_tree(src.path(), dst.path());
        assert_eq!(
            fs::read_to_string(dst.path().join("sub/file")).unwrap(),
            "new"
        );
    }

    #[test]
    fn test_populate_skel_seeds_root_and_homes() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("etc/skel")).unwrap();
        fs::write(root.path().join("etc/skel/.profile"), "export X=1\n").unwrap();
        fs::create_dir_all(root.path().join("home/alice")).unwrap();
        fs::create_dir_all(root.path().join("home/bob")).unwrap();

        populate_skel(root.path());

        assert!(root.path().join("root/.profile").is_file());
        assert!(root.path().join("home/alice/.profile").is_file());
        assert!(root.path().join("home/bob/.profile").is_file());
    }

    #[test]
    fn test_populate_skel_without_skel_is_noop() {
        let root = TempDir::new().unwrap();
        populate_skel(root.path());
        assert!(!root.path().join("root").exists());
    }
}
