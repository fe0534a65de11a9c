// src/indexer.rs

//! Repository index generation
//!
//! `repo index <dir>` scans a directory of `.starpack` archives and writes
//! a `repo.db.yaml` manifest describing each one; `repo add-missing <dir>`
//! only processes archives the existing manifest does not know yet.
//! Archives are handled in parallel, one worker per archive, with console
//! output serialized so lines do not interleave.

use crate::archive;
use crate::error::{Error, Result};
use crate::manifest::{canonical_name, load_metadata, ManifestEntry, RepoIndex};
use chrono::{DateTime, Local};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::warn;
use walkdir::WalkDir;

/// Count how many leading path components all entries share
fn common_prefix_components(paths: &[String]) -> usize {
    let mut iter = paths.iter();
    let Some(first) = iter.next() else {
        return 0;
    };

    let split = |p: &str| -> Vec<String> {
        p.split('/')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut common = split(first);
    for path in iter {
        let components = split(path);
        let mut keep = 0;
        for (a, b) in common.iter().zip(components.iter()) {
            if a != b {
                break;
            }
            keep += 1;
        }
        common.truncate(keep);
        if common.is_empty() {
            break;
        }
    }
    common.len()
}

/// The build tool wraps package contents under `<name>/files/...`, so a
/// single shared component means both levels should be stripped.
fn strip_components_for(archive_path: &Path) -> Result<u32> {
    let paths = archive::list_entry_paths(archive_path)?;
    let count = common_prefix_components(&paths);
    Ok(if count == 1 { 2 } else { count as u32 })
}

/// Archive mtime rendered in the date format the updater compares
fn archive_update_time(archive_path: &Path) -> Option<String> {
    let modified = fs::metadata(archive_path).ok()?.modified().ok()?;
    let local: DateTime<Local> = modified.into();
    Some(local.format("%d/%m/%Y").to_string())
}

/// Inspect one archive and assemble its manifest entry
fn index_archive(archive_path: &Path) -> Result<ManifestEntry> {
    let scratch = TempDir::new()
        .map_err(|e| Error::Archive(format!("cannot create scratch directory: {}", e)))?;

    if !archive::extract_entry(archive_path, "metadata.yaml", scratch.path())? {
        return Err(Error::Archive(format!(
            "no metadata.yaml in {}",
            archive_path.display()
        )));
    }
    let mut entry = load_metadata(&scratch.path().join("metadata.yaml"))?;

    entry.name = canonical_name(&entry.name).to_string();
    for dep in entry.dependencies.iter_mut() {
        *dep = canonical_name(dep).to_string();
    }

    entry.file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::Archive(format!("bad archive path: {}", archive_path.display())))?;

    entry.strip_components = strip_components_for(archive_path)?;
    if entry.update_time.is_none() {
        entry.update_time = archive_update_time(archive_path);
    }

    // Enumerate what the files/ sub-tree actually contains; regular files
    // and symlinks both count, directories do not.
    let files_dir = scratch.path().join("files");
    archive::extract_subtree(archive_path, "files/", &files_dir, 0)?;

    let mut files = Vec::new();
    if files_dir.is_dir() {
        for item in WalkDir::new(&files_dir).into_iter().flatten() {
            let file_type = item.file_type();
            if file_type.is_file() || file_type.is_symlink() {
                if let Ok(relative) = item.path().strip_prefix(&files_dir) {
                    files.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }
    files.sort();
    entry.files = files;

    Ok(entry)
}

fn starpack_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archives: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::Archive(format!("cannot read {}: {}", dir.display(), e)))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|e| e == "starpack"))
        .collect();
    archives.sort();
    Ok(archives)
}

fn index_archives(archives: &[PathBuf]) -> Vec<ManifestEntry> {
    let console = Mutex::new(());

    let mut entries: Vec<ManifestEntry> = archives
        .par_iter()
        .filter_map(|path| {
            {
                let _guard = console.lock().unwrap();
                println!("Processing package: {}", path.display());
            }
            match index_archive(path) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    let _guard = console.lock().unwrap();
                    eprintln!("Skipping {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect();

    // Parallel collection order is unstable; sort for a reproducible index
    entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    entries
}

/// Build `<dir>/repo.db.yaml` from every archive in `dir`
pub fn build_index(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(Error::Config(format!(
            "not a directory: {}",
            dir.display()
        )));
    }

    let archives = starpack_archives(dir)?;
    let index = RepoIndex {
        packages: index_archives(&archives),
    };

    let db_path = dir.join("repo.db.yaml");
    index.save(&db_path)?;
    println!("Repository database created at: {}", db_path.display());
    Ok(())
}

/// Add archives missing from an existing `<dir>/repo.db.yaml`
pub fn augment_index(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(Error::Config(format!(
            "not a directory: {}",
            dir.display()
        )));
    }

    let db_path = dir.join("repo.db.yaml");
    let mut index = if db_path.exists() {
        RepoIndex::load(&db_path).unwrap_or_else(|e| {
            warn!("Could not load existing index ({}); starting fresh", e);
            RepoIndex::default()
        })
    } else {
        RepoIndex::default()
    };

    let known: HashSet<String> = index
        .packages
        .iter()
        .map(|p| p.file_name.clone())
        .collect();

    let missing: Vec<PathBuf> = starpack_archives(dir)?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .map(|n| !known.contains(&n.to_string_lossy().to_string()))
                .unwrap_or(false)
        })
        .collect();

    index.packages.extend(index_archives(&missing));
    index.save(&db_path)?;
    println!("Repository database updated at: {}", db_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn make_archive(dir: &Path, file_name: &str, metadata: &str, files: &[(&str, &str)]) {
        let file = fs::File::create(dir.join(file_name)).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut add = |path: &str, data: &str| {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, path, data.as_bytes()).unwrap();
        };

        add("metadata.yaml", metadata);
        for (path, data) in files {
            add(path, data);
        }
        builder
            .into_inner()
            .unwrap()
            .finish()
            .unwrap()
            .flush()
            .unwrap();
    }

    #[test]
    fn test_common_prefix_components() {
        assert_eq!(
            common_prefix_components(&[
                "foo/bar/file".to_string(),
                "foo/bar/docs".to_string()
            ]),
            2
        );
        assert_eq!(
            common_prefix_components(&["foo/a".to_string(), "bar/a".to_string()]),
            0
        );
        assert_eq!(common_prefix_components(&[]), 0);
        assert_eq!(common_prefix_components(&["solo/x".to_string()]), 2);
    }

    #[test]
    fn test_strip_heuristic() {
        let dir = TempDir::new().unwrap();

        // Top-level metadata.yaml means no shared prefix at all
        make_archive(
            dir.path(),
            "flat.starpack",
            "name: flat\nversion: 1.0\n",
            &[("files/usr/bin/demo", "bin")],
        );
        assert_eq!(
            strip_components_for(&dir.path().join("flat.starpack")).unwrap(),
            0
        );

        // Everything wrapped under one component promotes the strip to 2
        let file = fs::File::create(dir.path().join("wrapped.starpack")).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in [
            ("demo/metadata.yaml", "name: demo\nversion: 1.0\n"),
            ("demo/files/usr/bin/demo", "bin"),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, path, data.as_bytes()).unwrap();
        }
        builder
            .into_inner()
            .unwrap()
            .finish()
            .unwrap()
            .flush()
            .unwrap();
        assert_eq!(
            strip_components_for(&dir.path().join("wrapped.starpack")).unwrap(),
            2
        );
    }

    #[test]
    fn test_build_index() {
        let dir = TempDir::new().unwrap();
        make_archive(
            dir.path(),
            "demo.starpack",
            "name: demo\nversion: 1.2.0\ndescription: Example\ndependencies:\n  - zlib/runtime\n",
            &[
                ("files/usr/bin/demo", "binary"),
                ("files/etc/demo.conf", "config"),
            ],
        );

        build_index(dir.path()).unwrap();

        let index = RepoIndex::load(&dir.path().join("repo.db.yaml")).unwrap();
        assert_eq!(index.packages.len(), 1);
        let entry = &index.packages[0];
        assert_eq!(entry.name, "demo");
        assert_eq!(entry.file_name, "demo.starpack");
        assert_eq!(entry.dependencies, vec!["zlib"]);
        assert_eq!(
            entry.files,
            vec!["etc/demo.conf".to_string(), "usr/bin/demo".to_string()]
        );
        assert!(entry.update_time.is_some());
    }

    #[test]
    fn test_index_twice_is_stable() {
        let dir = TempDir::new().unwrap();
        make_archive(
            dir.path(),
            "a.starpack",
            "name: a\nversion: 1.0\n",
            &[("files/usr/share/a", "x")],
        );
        make_archive(
            dir.path(),
            "b.starpack",
            "name: b\nversion: 2.0\n",
            &[("files/usr/share/b", "y")],
        );

        build_index(dir.path()).unwrap();
        let first = RepoIndex::load(&dir.path().join("repo.db.yaml")).unwrap();
        build_index(dir.path()).unwrap();
        let second = RepoIndex::load(&dir.path().join("repo.db.yaml")).unwrap();

        assert_eq!(first.packages.len(), second.packages.len());
        for (a, b) in first.packages.iter().zip(second.packages.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.version, b.version);
            assert_eq!(a.file_name, b.file_name);
            assert_eq!(a.files, b.files);
            assert_eq!(a.strip_components, b.strip_components);
        }
    }

    #[test]
    fn test_augment_only_adds_missing() {
        let dir = TempDir::new().unwrap();
        make_archive(
            dir.path(),
            "a.starpack",
            "name: a\nversion: 1.0\n",
            &[("files/a", "x")],
        );
        build_index(dir.path()).unwrap();

        // Tamper with the indexed version so re-processing would be visible
        let db_path = dir.path().join("repo.db.yaml");
        let mut index = RepoIndex::load(&db_path).unwrap();
        index.packages[0].version = "tampered".to_string();
        index.save(&db_path).unwrap();

        make_archive(
            dir.path(),
            "b.starpack",
            "name: b\nversion: 2.0\n",
            &[("files/b", "y")],
        );
        augment_index(dir.path()).unwrap();

        let index = RepoIndex::load(&db_path).unwrap();
        assert_eq!(index.packages.len(), 2);
        let a = index.packages.iter().find(|p| p.name == "a").unwrap();
        // a was not re-indexed
        assert_eq!(a.version, "tampered");
        assert!(index.packages.iter().any(|p| p.name == "b"));
    }

    #[test]
    fn test_archive_without_metadata_is_skipped() {
        let dir = TempDir::new().unwrap();
        let file = fs::File::create(dir.path().join("broken.starpack")).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(1);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, "files/x", &b"x"[..]).unwrap();
        builder
            .into_inner()
            .unwrap()
            .finish()
            .unwrap()
            .flush()
            .unwrap();

        build_index(dir.path()).unwrap();
        let index = RepoIndex::load(&dir.path().join("repo.db.yaml")).unwrap();
        assert!(index.packages.is_empty());
    }
}
