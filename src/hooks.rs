// src/hooks.rs

//! Declarative hook engine
//!
//! Hooks are small INI-like `.hook` files with three sections:
//!
//! ```text
//! [Hook]
//! Name = rebuild-font-cache
//! Description = Refresh fontconfig caches
//!
//! [When]
//! Phase = PostInstall
//! Operation = Install
//! Paths = usr/share/fonts*
//!
//! [Exec]
//! Command = fc-cache -f
//! ```
//!
//! Universal hooks live on the host under `/etc/starpack.d/universal-hooks/`
//! and shadow package hooks with the same filename. Package hooks are
//! extracted into `<root>/etc/starpack/hooks/<pkg>/` at install time.
//! Matched hooks run in ascending source-path order, either directly
//! through the host shell or chrooted into the install root; the choice is
//! made once per run by comparing canonicalized roots.

use crate::chroot;
use crate::config::layout;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tracing::{info, warn};

/// Lifecycle phase a hook binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreInstall,
    PostInstall,
    PreUpdate,
    PostUpdate,
    PreRemove,
    PostRemove,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreInstall => "PreInstall",
            Phase::PostInstall => "PostInstall",
            Phase::PreUpdate => "PreUpdate",
            Phase::PostUpdate => "PostUpdate",
            Phase::PreRemove => "PreRemove",
            Phase::PostRemove => "PostRemove",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PreInstall" => Ok(Phase::PreInstall),
            "PostInstall" => Ok(Phase::PostInstall),
            "PreUpdate" => Ok(Phase::PreUpdate),
            "PostUpdate" => Ok(Phase::PostUpdate),
            "PreRemove" => Ok(Phase::PreRemove),
            "PostRemove" => Ok(Phase::PostRemove),
            other => Err(format!("unknown phase: {}", other)),
        }
    }
}

/// A parsed .hook file
#[derive(Debug, Clone, Default)]
pub struct HookFile {
    pub source_path: PathBuf,
    pub name: String,
    pub description: String,
    pub phase: Option<Phase>,
    pub operations: Vec<String>,
    pub paths: Vec<String>,
    pub negations: Vec<String>,
    pub command: String,
    pub needs_paths: bool,
}

/// Parse one .hook file. Malformed lines produce warnings and are skipped;
/// only an unreadable file is an error.
pub fn parse_hook_file(path: &Path) -> Result<HookFile> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Hook(format!("cannot open hook file {}: {}", path.display(), e)))?;

    let mut hook = HookFile {
        source_path: path.to_path_buf(),
        ..Default::default()
    };
    let mut section = String::new();

    for (line_num, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_string();
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            warn!(
                "Invalid line (missing '=') in {}:{}: {}",
                path.display(),
                line_num + 1,
                line
            );
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            warn!("Empty key in {}:{}", path.display(), line_num + 1);
            continue;
        }

        match (section.as_str(), key) {
            ("Hook", "Name") => hook.name = value.to_string(),
            ("Hook", "Description") => hook.description = value.to_string(),
            ("When", "Phase") => match value.parse::<Phase>() {
                Ok(phase) => hook.phase = Some(phase),
                Err(e) => warn!("{}: {}", path.display(), e),
            },
            ("When", "Operation") => hook.operations.push(value.to_string()),
            ("When", "Paths") => hook.paths.push(value.to_string()),
            ("When", "Negation") => hook.negations.push(value.to_string()),
            ("Exec", "Command") => hook.command = value.to_string(),
            ("Exec", "NeedsPaths") => {
                let lower = value.to_lowercase();
                hook.needs_paths = lower == "yes" || lower == "true";
            }
            _ => warn!(
                "Unknown key '{}' in [{}] section of {}:{}",
                key,
                section,
                path.display(),
                line_num + 1
            ),
        }
    }

    if hook.phase.is_none() {
        warn!(
            "Hook file {} is missing the mandatory 'Phase' field",
            path.display()
        );
    }
    if hook.command.is_empty() {
        warn!(
            "Hook file {} is missing the mandatory 'Command' field",
            path.display()
        );
    }

    Ok(hook)
}

/// Deliberately restricted wildcard matching:
/// `*` matches anything, `*X*` contains, `*X` ends-with, `X*` starts-with,
/// anything else is literal. Patterns outside this subset warn and fall
/// back to a literal comparison.
pub fn match_wildcard(pattern: &str, s: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let stars = pattern.matches('*').count();
    match stars {
        0 => pattern == s,
        1 if pattern.starts_with('*') => s.ends_with(&pattern[1..]),
        1 if pattern.ends_with('*') => s.starts_with(&pattern[..pattern.len() - 1]),
        2 if pattern.starts_with('*') && pattern.ends_with('*') && pattern.len() > 1 => {
            s.contains(&pattern[1..pattern.len() - 1])
        }
        _ => {
            warn!(
                "Wildcard pattern '{}' is too complex for basic matching; treating as literal",
                pattern
            );
            pattern == s
        }
    }
}

/// Operation/path filtering for an already phase-matched hook
fn hook_matches(hook: &HookFile, operation: &str, affected_paths: &[String]) -> bool {
    if !hook.operations.is_empty() && !hook.operations.iter().any(|op| op == operation) {
        return false;
    }

    if !hook.paths.is_empty() {
        let matched = hook
            .paths
            .iter()
            .any(|pattern| affected_paths.iter().any(|p| match_wildcard(pattern, p)));
        if !matched {
            return false;
        }
    }

    for pattern in &hook.negations {
        if affected_paths.iter().any(|p| match_wildcard(pattern, p)) {
            return false;
        }
    }

    true
}

/// Gather candidate .hook files. Universal hooks come first and claim
/// their filename, so a package hook with the same name is shadowed.
fn discover_hook_files(universal_dir: &Path, package_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut files = Vec::new();

    let mut collect = |dir: &Path| {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "hook") {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if seen.insert(filename) {
                    files.push(path);
                }
            }
        }
    };

    collect(universal_dir);
    if let Some(dir) = package_dir {
        collect(dir);
    }
    files
}

fn use_chroot_for(install_root: &Path) -> bool {
    let canonical_root = fs::canonicalize("/").unwrap_or_else(|_| PathBuf::from("/"));
    let canonical_install = fs::canonicalize(install_root)
        .unwrap_or_else(|_| install_root.to_path_buf());
    canonical_install != canonical_root
}

/// Discover, filter, order, and execute hooks for one phase/operation.
/// Returns the number of hooks actually executed; the first failing hook
/// aborts the rest of the phase.
pub fn run_hooks(
    phase: Phase,
    operation: &str,
    affected_paths: &[String],
    install_root: &Path,
    package: Option<&str>,
) -> Result<usize> {
    let package_dir = package
        .filter(|p| !p.is_empty())
        .map(|p| layout::hooks_dir(install_root).join(p));

    let candidates = discover_hook_files(&layout::universal_hooks_dir(), package_dir.as_deref());

    let mut matching: Vec<HookFile> = Vec::new();
    for path in candidates {
        let hook = match parse_hook_file(&path) {
            Ok(hook) => hook,
            Err(e) => {
                warn!("Skipping hook {}: {}", path.display(), e);
                continue;
            }
        };
        if hook.phase != Some(phase) {
            continue;
        }
        if hook_matches(&hook, operation, affected_paths) {
            matching.push(hook);
        }
    }

    if matching.is_empty() {
        return Ok(0);
    }

    info!(
        "Running {} hooks for {} operation ({} matched)",
        phase,
        operation,
        matching.len()
    );
    matching.sort_by(|a, b| a.source_path.cmp(&b.source_path));

    let use_chroot = use_chroot_for(install_root);
    let mut executed = 0;

    for hook in &matching {
        if hook.command.is_empty() {
            warn!(
                "Empty command in hook {}; skipping",
                hook.source_path.display()
            );
            continue;
        }
        if hook.needs_paths {
            warn!(
                "Hook {} sets NeedsPaths but path passing is not supported; running without",
                hook.source_path.display()
            );
        }

        executed += 1;
        info!(
            "Executing hook {}: {}",
            executed,
            hook.source_path.display()
        );

        if use_chroot {
            if !install_root.join("bin/sh").exists() {
                return Err(Error::Hook(format!(
                    "/bin/sh not found inside chroot {}",
                    install_root.display()
                )));
            }
            let args = vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                hook.command.clone(),
            ];
            let ok = chroot::exec_in_chroot(install_root, "/bin/sh", &args, "/")?;
            if !ok {
                return Err(Error::Hook(format!(
                    "hook '{}' failed in chroot",
                    hook.name
                )));
            }
        } else {
            let status = Command::new("/bin/sh")
                .arg("-c")
                .arg(&hook.command)
                .status()
                .map_err(|e| Error::Hook(format!("failed to spawn shell: {}", e)))?;
            if !status.success() {
                return Err(Error::Hook(format!(
                    "hook '{}' failed with status {}",
                    hook.name, status
                )));
            }
        }
    }

    Ok(executed)
}
