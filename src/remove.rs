// src/remove.rs

//! Package removal
//!
//! Removal is queue-driven: the requested names are processed breadth
//! first, and packages that become orphaned along the way are appended to
//! the queue. Critical system packages are refused outright, and so is
//! `starpack` itself. Unless forced, a package still required by an
//! installed reverse dependency is left alone.

use crate::db::InstalledDb;
use crate::error::{Error, Result};
use crate::hooks::{self, Phase};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Packages whose removal would leave the system unbootable or unusable
const CRITICAL_PACKAGES: &[&str] = &[
    "glibc",
    "linux",
    "coreutils",
    "bash",
    "systemd",
    "util-linux",
    "linux-zen",
    "linux-api-headers",
    "dracut",
    "linux-zen-headers",
    "sh",
];

/// Cautionary messages shown when someone tries to remove a critical
/// package; `{pkg}` is substituted with the package name.
const CRITICAL_MESSAGES: &[&str] = &[
    "Hey! Psst! Look up what removing {pkg} will do to your system.",
    "This is NOT the French language pack. ({pkg})",
    "Are you sure you're not trying to uninstall the operating system? ({pkg})",
    "Removing {pkg} will end your computing career.",
    "{pkg} is holding your system together... barely.",
    "Whoever told you to remove {pkg} hates you with a passion.",
    "Don't do it! Seriously, just don't. ({pkg})",
    "{pkg}? Really?",
    "How about we don't delete {pkg}? Hm?",
];

const SELF_REMOVAL_MESSAGE: &str =
    "Removing me? That's like tearing out the very soul of your system. \
     I can't believe you'd do something like this!";

pub fn is_critical_package(name: &str) -> bool {
    CRITICAL_PACKAGES.contains(&name)
}

/// Picks refusal messages from a shuffled pool, remembering the last five
/// picks so short sessions do not repeat themselves.
struct MessagePool {
    messages: Vec<&'static str>,
    history: VecDeque<usize>,
}

impl MessagePool {
    const HISTORY: usize = 5;

    fn new() -> Self {
        let mut messages: Vec<&'static str> = CRITICAL_MESSAGES.to_vec();
        messages.shuffle(&mut rand::thread_rng());
        Self {
            messages,
            history: VecDeque::new(),
        }
    }

    fn pick(&mut self, package: &str) -> String {
        if package == "starpack" {
            return SELF_REMOVAL_MESSAGE.to_string();
        }

        let mut rng = rand::thread_rng();
        let candidates: Vec<usize> = (0..self.messages.len())
            .filter(|i| !self.history.contains(i))
            .collect();
        let index = if candidates.is_empty() {
            rng.gen_range(0..self.messages.len())
        } else {
            candidates[rng.gen_range(0..candidates.len())]
        };

        self.history.push_back(index);
        if self.history.len() > Self::HISTORY {
            self.history.pop_front();
        }

        self.messages[index].replace("{pkg}", package)
    }
}

/// Delete the files owned by a package. Paths containing `..` are refused.
/// The first pass runs in descending path-length order so deep entries go
/// first; a second ascending pass sweeps directories that just became
/// empty.
pub fn remove_files(files: &[String], install_root: &Path) {
    let mut sorted: Vec<&String> = files.iter().collect();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()));

    for file in &sorted {
        if file.contains("..") {
            warn!("Skipping potentially unsafe path: {}", file);
            continue;
        }
        let relative = file.trim_start_matches('/');
        if relative.is_empty() {
            continue;
        }
        let abs = install_root.join(relative);

        let meta = match fs::symlink_metadata(&abs) {
            Ok(meta) => meta,
            Err(_) => {
                warn!("File listed in DB not found, cannot remove: {}", abs.display());
                continue;
            }
        };

        if meta.is_dir() {
            match fs::read_dir(&abs).map(|mut d| d.next().is_none()) {
                Ok(true) => {
                    if let Err(e) = fs::remove_dir(&abs) {
                        warn!("Error removing directory {}: {}", abs.display(), e);
                    } else {
                        println!("Removed directory: {}", abs.display());
                    }
                }
                _ => {
                    println!(
                        "Skipping non-empty directory (may contain other files): {}",
                        abs.display()
                    );
                }
            }
        } else if let Err(e) = fs::remove_file(&abs) {
            warn!("Error removing {}: {}", abs.display(), e);
        } else {
            println!("Removed: {}", abs.display());
        }
    }

    // Second pass: parents first appear now that children are gone
    sorted.sort_by(|a, b| a.len().cmp(&b.len()));
    for file in &sorted {
        if file.contains("..") {
            continue;
        }
        let relative = file.trim_start_matches('/');
        if relative.is_empty() {
            continue;
        }
        let abs = install_root.join(relative);
        if let Ok(meta) = fs::symlink_metadata(&abs) {
            if meta.is_dir() {
                if let Ok(true) = fs::read_dir(&abs).map(|mut d| d.next().is_none()) {
                    if fs::remove_dir(&abs).is_ok() {
                        println!("Removed now-empty directory: {}", abs.display());
                    }
                }
            }
        }
    }
}

/// Remove the requested packages from `install_root`. Returns an error
/// when any explicitly requested package could not be removed.
pub fn remove_packages(
    requested: &[String],
    db: &InstalledDb,
    force: bool,
    install_root: &Path,
) -> Result<()> {
    let mut messages = MessagePool::new();
    let mut queue: VecDeque<String> = requested.iter().cloned().collect();
    let mut processed: HashSet<String> = HashSet::new();
    let mut removed: Vec<String> = Vec::new();
    let mut failed_requests: Vec<String> = Vec::new();

    while let Some(current) = queue.pop_front() {
        if !processed.insert(current.clone()) {
            continue;
        }
        let explicitly_requested = requested.contains(&current);

        println!("--- Processing removal for: {} ---", current);

        if current == "starpack" {
            eprintln!("Warning: {}", messages.pick(&current));
            eprintln!("Skipping removal of 'starpack'.");
            if explicitly_requested {
                failed_requests.push(current);
            }
            continue;
        }
        if is_critical_package(&current) {
            eprintln!(
                "Error: attempted to remove critical package '{}'\n{}",
                current,
                messages.pick(&current)
            );
            if explicitly_requested {
                failed_requests.push(current);
            }
            continue;
        }

        if !db.is_installed(&current)? {
            if explicitly_requested {
                eprintln!("Error: package '{}' is not installed.", current);
                failed_requests.push(current);
            }
            continue;
        }

        // Reverse dependencies block removal unless they are themselves on
        // the way out (queued, processed, or part of the request).
        if !force {
            let blocking: Vec<String> = db
                .reverse_dependencies(&current)?
                .into_iter()
                .filter(|rd| {
                    !requested.contains(rd)
                        && !processed.contains(rd)
                        && !queue.contains(rd)
                })
                .collect();

            if !blocking.is_empty() {
                eprintln!(
                    "Error: cannot remove '{}' because it is required by:",
                    current
                );
                for b in &blocking {
                    eprintln!("  - {}", b);
                }
                eprintln!(
                    "Removal of '{}' skipped. Use --force to override.",
                    current
                );
                if explicitly_requested {
                    failed_requests.push(current);
                }
                continue;
            }
        }

        let files = db.files_of(&current)?;
        let affected: Vec<String> = files
            .iter()
            .map(|f| f.trim_start_matches('/').to_string())
            .filter(|f| !f.is_empty())
            .collect();

        println!("Running PreRemove hooks for {}...", current);
        hooks::run_hooks(Phase::PreRemove, "Remove", &affected, install_root, Some(current.as_str()))?;

        println!("Removing files for package: {}...", current);
        remove_files(&files, install_root);

        db.splice_record(&current)?;
        removed.push(current.clone());

        println!("Running PostRemove hooks for {}...", current);
        hooks::run_hooks(Phase::PostRemove, "Remove", &affected, install_root, Some(current.as_str()))?;

        // Every package nothing depends on any more joins the queue
        for orphan in db.orphans(&current)? {
            if !processed.contains(&orphan) && !queue.contains(&orphan) {
                println!("  - Adding '{}' to removal queue.", orphan);
                queue.push_back(orphan);
            }
        }
    }

    if removed.is_empty() && !requested.is_empty() {
        println!("No packages were removed.");
    } else if !removed.is_empty() {
        println!("--- Removal Summary ---");
        println!("Successfully removed:");
        for pkg in &removed {
            println!("  - {}", pkg);
        }
        println!("-----------------------");
    }

    if !failed_requests.is_empty() {
        return Err(Error::Dependency(format!(
            "could not remove: {}",
            failed_requests.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use tempfile::TempDir;

    fn entry(name: &str, files: &[&str], deps: &[&str]) -> ManifestEntry {
        ManifestEntry {
            name: name.to_string(),
            version: "1.0".to_string(),
            files: files.iter().map(|s| s.to_string()).collect(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn scratch() -> (TempDir, InstalledDb) {
        let root = TempDir::new().unwrap();
        let db = InstalledDb::for_root(root.path());
        db.ensure_exists().unwrap();
        (root, db)
    }

    #[test]
    fn test_critical_names() {
        assert!(is_critical_package("glibc"));
        assert!(is_critical_package("bash"));
        assert!(!is_critical_package("leftpad"));
    }

    #[test]
    fn test_message_pool_substitutes_and_avoids_repeats() {
        let mut pool = MessagePool::new();
        let mut seen = Vec::new();
        for _ in 0..4 {
            let msg = pool.pick("glibc");
            assert!(msg.contains("glibc"));
            assert!(!msg.contains("{pkg}"));
            assert!(!seen.contains(&msg));
            seen.push(msg);
        }
        assert_eq!(pool.pick("starpack"), SELF_REMOVAL_MESSAGE);
    }

    #[test]
    fn test_remove_files_skips_parent_escapes() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("usr/bin")).unwrap();
        fs::write(root.path().join("usr/bin/demo"), "bin").unwrap();
        let outside = root.path().join("outside.txt");
        fs::write(&outside, "keep me").unwrap();

        remove_files(
            &[
                "/usr/bin/demo".to_string(),
                "/usr/bin/../../../outside.txt".to_string(),
            ],
            &root.path().join("inner"),
        );

        assert!(outside.exists());
    }

    #[test]
    fn test_remove_files_sweeps_emptied_directories() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("usr/share/demo")).unwrap();
        fs::write(root.path().join("usr/share/demo/data"), "x").unwrap();

        remove_files(
            &[
                "/usr/share/demo".to_string(),
                "/usr/share/demo/data".to_string(),
            ],
            root.path(),
        );

        assert!(!root.path().join("usr/share/demo").exists());
    }

    #[test]
    fn test_remove_files_keeps_shared_directories() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("usr/share")).unwrap();
        fs::write(root.path().join("usr/share/other"), "other pkg").unwrap();
        fs::write(root.path().join("usr/share/mine"), "mine").unwrap();

        remove_files(
            &["/usr/share".to_string(), "/usr/share/mine".to_string()],
            root.path(),
        );

        assert!(root.path().join("usr/share/other").exists());
        assert!(!root.path().join("usr/share/mine").exists());
    }

    #[test]
    fn test_blocked_by_reverse_dependency() {
        let (root, db) = scratch();
        db.append_record("foo", &entry("foo", &[], &[])).unwrap();
        db.append_record("baz", &entry("baz", &[], &["foo"])).unwrap();

        let result = remove_packages(&["foo".to_string()], &db, false, root.path());
        assert!(result.is_err());
        assert!(db.is_installed("foo").unwrap());
        assert!(db.is_installed("baz").unwrap());
    }

    #[test]
    fn test_force_overrides_reverse_dependency() {
        let (root, db) = scratch();
        db.append_record("foo", &entry("foo", &[], &[])).unwrap();
        db.append_record("baz", &entry("baz", &[], &["foo"])).unwrap();

        remove_packages(&["foo".to_string()], &db, true, root.path()).unwrap();
        assert!(!db.is_installed("foo").unwrap());
        // With foo gone, baz is an orphan and the sweep takes it too
        assert!(!db.is_installed("baz").unwrap());
    }

    #[test]
    fn test_removing_both_ends_of_an_edge() {
        let (root, db) = scratch();
        db.append_record("foo", &entry("foo", &[], &[])).unwrap();
        db.append_record("baz", &entry("baz", &[], &["foo"])).unwrap();

        remove_packages(
            &["baz".to_string(), "foo".to_string()],
            &db,
            false,
            root.path(),
        )
        .unwrap();
        assert!(!db.is_installed("foo").unwrap());
        assert!(!db.is_installed("baz").unwrap());
    }

    #[test]
    fn test_orphaned_dependency_is_swept() {
        let (root, db) = scratch();
        db.append_record("libonly", &entry("libonly", &[], &[])).unwrap();
        db.append_record("app", &entry("app", &[], &["libonly"])).unwrap();

        remove_packages(&["app".to_string()], &db, false, root.path()).unwrap();
        assert!(!db.is_installed("app").unwrap());
        assert!(!db.is_installed("libonly").unwrap());
    }

    #[test]
    fn test_orphan_sweep_is_system_wide() {
        let (root, db) = scratch();
        db.append_record("libonly", &entry("libonly", &[], &[])).unwrap();
        db.append_record("app", &entry("app", &[], &["libonly"])).unwrap();
        // Installed alongside, not a dependency of app, required by nothing
        db.append_record("standalone", &entry("standalone", &[], &[]))
            .unwrap();

        remove_packages(&["app".to_string()], &db, false, root.path()).unwrap();

        assert!(!db.is_installed("app").unwrap());
        assert!(!db.is_installed("libonly").unwrap());
        // The sweep covers every orphan on the system, not just app's deps
        assert!(!db.is_installed("standalone").unwrap());
    }

    #[test]
    fn test_orphan_sweep_stops_at_critical_packages() {
        let (root, db) = scratch();
        db.append_record("libshared", &entry("libshared", &[], &[])).unwrap();
        db.append_record("bash", &entry("bash", &[], &["libshared"])).unwrap();
        db.append_record("app", &entry("app", &[], &["libshared"])).unwrap();

        remove_packages(&["app".to_string()], &db, false, root.path()).unwrap();

        assert!(!db.is_installed("app").unwrap());
        // bash is orphaned and enqueued, but the critical check refuses it,
        // which keeps libshared required
        assert!(db.is_installed("bash").unwrap());
        assert!(db.is_installed("libshared").unwrap());
    }

    #[test]
    fn test_critical_package_is_refused() {
        let (root, db) = scratch();
        db.append_record("glibc", &entry("glibc", &[], &[])).unwrap();

        let result = remove_packages(&["glibc".to_string()], &db, false, root.path());
        assert!(result.is_err());
        assert!(db.is_installed("glibc").unwrap());
    }

    #[test]
    fn test_starpack_itself_is_refused_even_with_force() {
        let (root, db) = scratch();
        db.append_record("starpack", &entry("starpack", &[], &[])).unwrap();

        let result = remove_packages(&["starpack".to_string()], &db, true, root.path());
        assert!(result.is_err());
        assert!(db.is_installed("starpack").unwrap());
    }

    #[test]
    fn test_not_installed_is_an_error_only_when_requested() {
        let (root, db) = scratch();
        let result = remove_packages(&["ghost".to_string()], &db, false, root.path());
        assert!(result.is_err());
    }
}
