// src/manifest.rs

//! Repository manifests and package metadata
//!
//! Every repository serves a `repo.db.yaml` at its base URL describing the
//! packages it carries. The same entry schema doubles as the parsed form of
//! an archive's embedded `metadata.yaml`. When several repositories declare
//! the same package name, the first repository in configured order wins.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// One package entry in a repository manifest or `metadata.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Archive filename relative to the repository base URL
    #[serde(default)]
    pub file_name: String,
    /// Dependency names, optionally with trailing version constraints
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Archive-relative paths installed by the package
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub strip_components: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
    /// Sub-path allowlist for partial updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_dirs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_date: Option<String>,
}

/// A repository manifest: `{ packages: [ ... ] }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoIndex {
    #[serde(default)]
    pub packages: Vec<ManifestEntry>,
}

impl RepoIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let index: RepoIndex = serde_yaml::from_reader(file)?;
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_yaml::to_writer(file, self)?;
        Ok(())
    }
}

/// Parse an archive's `metadata.yaml` (a single bare entry, no wrapper)
pub fn load_metadata(path: &Path) -> Result<ManifestEntry> {
    let file = File::open(path)?;
    let entry: ManifestEntry = serde_yaml::from_reader(file)?;
    Ok(entry)
}

/// Canonical package name: everything from the first `/` or `\` onward is
/// a qualifier and is stripped.
pub fn canonical_name(name: &str) -> &str {
    match name.find(['/', '\\']) {
        Some(pos) => &name[..pos],
        None => name,
    }
}

/// Local cache filename for a repository's manifest; slashes and colons in
/// the URL are flattened so every repository gets a distinct file.
pub fn cached_manifest_name(repo_url: &str) -> String {
    let sanitized: String = repo_url
        .chars()
        .map(|c| if c == '/' || c == ':' { '_' } else { c })
        .collect();
    format!("{}repo.db.yaml", sanitized)
}

/// The merged view over every configured repository, with first-wins name
/// precedence.
#[derive(Debug, Default)]
pub struct PackageSources {
    entries: HashMap<String, (String, ManifestEntry)>,
}

impl PackageSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one repository's manifest. Entries whose canonical name is
    /// already known are ignored; returns how many entries were accepted.
    pub fn ingest(&mut self, repo_url: &str, index: RepoIndex) -> usize {
        let mut accepted = 0;
        for mut entry in index.packages {
            let name = canonical_name(&entry.name).to_string();
            if name.is_empty() || self.entries.contains_key(&name) {
                continue;
            }
            entry.name = name.clone();
            self.entries.insert(name, (repo_url.to_string(), entry));
            accepted += 1;
        }
        debug!("Loaded {} package definitions from {}", accepted, repo_url);
        accepted
    }

    /// Look up a package by canonical name, returning its repository base
    /// URL and manifest entry.
    pub fn get(&self, name: &str) -> Option<&(String, ManifestEntry)> {
        self.entries.get(canonical_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(canonical_name(name))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate all known entries in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &(String, ManifestEntry))> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str, version: &str) -> ManifestEntry {
        ManifestEntry {
            name: name.to_string(),
            version: version.to_string(),
            file_name: format!("{}.starpack", name),
            ..Default::default()
        }
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("foo"), "foo");
        assert_eq!(canonical_name("foo/devel"), "foo");
        assert_eq!(canonical_name("foo\\win"), "foo");
        assert_eq!(canonical_name("foo/a/b"), "foo");
    }

    #[test]
    fn test_first_repository_wins() {
        let mut sources = PackageSources::new();
        let first = RepoIndex {
            packages: vec![entry("demo", "1.0")],
        };
        let second = RepoIndex {
            packages: vec![entry("demo", "9.9"), entry("other", "1.0")],
        };

        assert_eq!(sources.ingest("https://first.example/", first), 1);
        assert_eq!(sources.ingest("https://second.example/", second), 1);

        let (repo, e) = sources.get("demo").unwrap();
        assert_eq!(repo, "https://first.example/");
        assert_eq!(e.version, "1.0");
        assert!(sources.contains("other"));
    }

    #[test]
    fn test_qualified_names_collapse() {
        let mut sources = PackageSources::new();
        let index = RepoIndex {
            packages: vec![entry("demo/extras", "1.0")],
        };
        sources.ingest("https://repo.example/", index);
        assert!(sources.contains("demo"));
        assert!(sources.contains("demo/anything"));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.db.yaml");

        let mut e = entry("demo", "1.2.3");
        e.dependencies = vec!["zlib >= 1.2".to_string()];
        e.files = vec!["usr/bin/demo".to_string()];
        e.strip_components = 2;
        e.update_time = Some("01/03/2024".to_string());

        let index = RepoIndex { packages: vec![e] };
        index.save(&path).unwrap();

        let loaded = RepoIndex::load(&path).unwrap();
        assert_eq!(loaded.packages.len(), 1);
        let p = &loaded.packages[0];
        assert_eq!(p.name, "demo");
        assert_eq!(p.version, "1.2.3");
        assert_eq!(p.strip_components, 2);
        assert_eq!(p.dependencies, vec!["zlib >= 1.2"]);
        assert_eq!(p.update_time.as_deref(), Some("01/03/2024"));
        assert!(p.update_dirs.is_none());
    }

    #[test]
    fn test_metadata_without_file_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.yaml");
        std::fs::write(
            &path,
            "name: demo\nversion: 1.0.0\ndescription: Example\nfiles:\n  - usr/bin/demo\n",
        )
        .unwrap();

        let meta = load_metadata(&path).unwrap();
        assert_eq!(meta.name, "demo");
        assert!(meta.file_name.is_empty());
        assert_eq!(meta.files, vec!["usr/bin/demo"]);
    }

    #[test]
    fn test_cached_manifest_name() {
        assert_eq!(
            cached_manifest_name("https://repo.example.com/core/"),
            "https___repo.example.com_core_repo.db.yaml"
        );
    }
}
