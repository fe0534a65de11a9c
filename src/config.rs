// src/config.rs

//! Repository configuration
//!
//! `/etc/starpack/repos.conf` is a bare line list of repository base URLs.
//! Lines starting with `#` and blank lines are ignored. URLs are normalized
//! to carry a trailing `/` so that file names can be appended directly.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Default location of the repository list on the host
pub const REPOS_CONF: &str = "/etc/starpack/repos.conf";

/// An ordered list of repository base URLs. Order matters: the first
/// repository that declares a package name wins.
#[derive(Debug, Clone, Default)]
pub struct RepoConfig {
    pub repositories: Vec<String>,
}

/// Append a trailing slash when missing so `url + file_name` is valid
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

impl RepoConfig {
    /// Load the repository list from a config file. Missing file is a
    /// configuration error; the caller decides whether that is fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut repositories = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let url = normalize_url(line);
            if !repositories.contains(&url) {
                repositories.push(url);
            }
        }

        Ok(Self { repositories })
    }

    /// Load and reject an empty repository list
    pub fn load_required(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::load(&path)?;
        if config.repositories.is_empty() {
            return Err(Error::Config(format!(
                "no repository URLs configured in {}",
                path.as_ref().display()
            )));
        }
        Ok(config)
    }

    /// Write the repository list back out, with a short header comment
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        writeln!(file, "# Starpack repository configuration")?;
        writeln!(file, "# One base URL per line, checked in order.")?;
        writeln!(file)?;
        for repo in &self.repositories {
            writeln!(file, "{}", repo)?;
        }
        file.flush()?;
        Ok(())
    }

    /// Add a repository URL, refusing duplicates
    pub fn add_repository(&mut self, url: &str) -> Result<()> {
        let url = normalize_url(url);
        if self.repositories.contains(&url) {
            return Err(Error::Config(format!("repository already exists: {}", url)));
        }
        info!("Adding repository: {}", url);
        self.repositories.push(url);
        Ok(())
    }

    /// Remove a repository URL
    pub fn remove_repository(&mut self, url: &str) -> Result<()> {
        let url = normalize_url(url);
        let before = self.repositories.len();
        self.repositories.retain(|r| r != &url);
        if self.repositories.len() == before {
            return Err(Error::Config(format!("repository not found: {}", url)));
        }
        info!("Removed repository: {}", url);
        Ok(())
    }

    /// Print the configured repositories
    pub fn print(&self) {
        println!("Configured repositories:");
        for repo in &self.repositories {
            println!("  - {}", repo);
        }
    }
}

/// Path helpers for the on-disk layout under an install root
pub mod layout {
    use std::path::{Path, PathBuf};

    pub fn db_path(root: &Path) -> PathBuf {
        root.join("var/lib/starpack/installed.db")
    }

    pub fn cache_dir(root: &Path) -> PathBuf {
        root.join("var/lib/starpack/cache")
    }

    pub fn keys_dir(root: &Path) -> PathBuf {
        root.join("etc/starpack/keys")
    }

    pub fn keyring_path(root: &Path) -> PathBuf {
        keys_dir(root).join("starpack.gpg")
    }

    pub fn hooks_dir(root: &Path) -> PathBuf {
        root.join("etc/starpack/hooks")
    }

    /// Host-side universal hooks, shared by every install root
    pub fn universal_hooks_dir() -> PathBuf {
        PathBuf::from("/etc/starpack.d/universal-hooks")
    }
}
