// src/archive.rs

//! Archive reading and extraction for `.starpack` containers
//!
//! A `.starpack` file is a tar archive compressed with gzip, xz or zstd,
//! holding `metadata.yaml`, a `files/` sub-tree and optionally a `hooks/`
//! sub-tree. The compression is sniffed from magic bytes so any of the
//! common filters works.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, warn};
use xz2::read::XzDecoder;

/// Compression filter detected from the archive's leading bytes
enum CompressionFormat {
    Gzip,
    Xz,
    Zstd,
    None,
}

fn sniff_compression(path: &Path) -> Result<CompressionFormat> {
    let mut file = File::open(path)
        .map_err(|e| Error::Archive(format!("cannot open {}: {}", path.display(), e)))?;
    let mut magic = [0u8; 6];
    let n = file.read(&mut magic)?;

    if n >= 2 && magic[0..2] == [0x1f, 0x8b] {
        Ok(CompressionFormat::Gzip)
    } else if n >= 6 && magic[0..6] == [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00] {
        Ok(CompressionFormat::Xz)
    } else if n >= 4 && magic[0..4] == [0x28, 0xb5, 0x2f, 0xfd] {
        Ok(CompressionFormat::Zstd)
    } else {
        Ok(CompressionFormat::None)
    }
}

/// Open an archive with the right decoder stacked under the tar reader
pub fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
    let format = sniff_compression(path)?;
    let file = File::open(path)
        .map_err(|e| Error::Archive(format!("cannot open {}: {}", path.display(), e)))?;

    let reader: Box<dyn Read> = match format {
        CompressionFormat::Gzip => Box::new(GzDecoder::new(file)),
        CompressionFormat::Xz => Box::new(XzDecoder::new(file)),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(file)
                .map_err(|e| Error::Archive(format!("zstd decoder: {}", e)))?;
            Box::new(decoder)
        }
        CompressionFormat::None => Box::new(file),
    };

    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    if nix::unistd::geteuid().is_root() {
        archive.set_preserve_ownerships(true);
    }
    Ok(archive)
}

/// List every entry pathname in the archive, in archive order
pub fn list_entry_paths(path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(path)?;
    let mut paths = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| Error::Archive(format!("read entries: {}", e)))?
    {
        let entry = entry.map_err(|e| Error::Archive(format!("read entry: {}", e)))?;
        let p = entry
            .path()
            .map_err(|e| Error::Archive(format!("entry path: {}", e)))?;
        let p = p.to_string_lossy().to_string();
        if !p.is_empty() {
            paths.push(p);
        }
    }
    Ok(paths)
}

/// Drop the section prefix from an entry path; returns None when the entry
/// is outside the section. A leading `/` or `\` left over after the prefix
/// is also dropped.
fn strip_section_prefix<'a>(entry_path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(entry_path);
    }
    let rest = entry_path.strip_prefix(prefix)?;
    Some(rest.trim_start_matches(['/', '\\']))
}

/// Strip `count` leading path components, skipping `.` and empty segments.
/// Returns None when nothing is left.
fn strip_components(path: &str, count: u32) -> Option<PathBuf> {
    let mut stripped = 0;
    let mut result = PathBuf::new();
    for part in path.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        if stripped < count {
            stripped += 1;
        } else {
            result.push(part);
        }
    }
    if result.as_os_str().is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Apply the prefix-strip + component-strip + destination-join transform
/// used for both entry paths and hardlink targets.
fn transform_entry_path(
    entry_path: &str,
    prefix: &str,
    strip: u32,
    dest_dir: &Path,
) -> Option<PathBuf> {
    let rest = strip_section_prefix(entry_path, prefix)?;
    if rest.is_empty() {
        return None;
    }
    let relative = strip_components(rest, strip)?;
    Some(dest_dir.join(relative))
}

/// If the on-disk filetype disagrees with the incoming entry (directory vs
/// not), remove the existing path, directories recursively. Matching types
/// are overwritten by the extractor itself.
fn resolve_type_conflict(dest: &Path, entry_is_dir: bool) -> bool {
    let existing = match fs::symlink_metadata(dest) {
        Ok(meta) => meta,
        Err(_) => return true,
    };
    if existing.is_dir() == entry_is_dir {
        return true;
    }
    warn!(
        "Path type conflict for {}; removing existing entry",
        dest.display()
    );
    let removed = if existing.is_dir() {
        fs::remove_dir_all(dest)
    } else {
        fs::remove_file(dest)
    };
    if let Err(e) = removed {
        warn!("Failed to remove conflicting entry {}: {}", dest.display(), e);
        return false;
    }
    true
}

/// Extract every entry under `section_prefix` into `dest_dir`, stripping
/// `strip` leading path components after the prefix. With `allow_dirs`
/// non-empty, only post-strip paths inside one of those sub-directories are
/// written (partial updates). Per-entry failures are warnings; the call
/// fails only when the archive itself cannot be read to its end.
pub fn extract_subtree_within(
    archive_path: &Path,
    section_prefix: &str,
    dest_dir: &Path,
    strip: u32,
    allow_dirs: &[String],
) -> Result<()> {
    let mut archive = open_archive(archive_path)?;
    fs::create_dir_all(dest_dir)?;

    for entry in archive
        .entries()
        .map_err(|e| Error::Archive(format!("read {}: {}", archive_path.display(), e)))?
    {
        let mut entry = entry
            .map_err(|e| Error::Archive(format!("read {}: {}", archive_path.display(), e)))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::Archive(format!("entry path: {}", e)))?
            .to_string_lossy()
            .to_string();

        let dest = match transform_entry_path(&entry_path, section_prefix, strip, dest_dir) {
            Some(dest) => dest,
            None => continue,
        };

        if !allow_dirs.is_empty() {
            let relative = dest.strip_prefix(dest_dir).unwrap_or(&dest);
            let allowed = allow_dirs.iter().any(|dir| {
                let dir = dir.trim_matches('/');
                relative.starts_with(dir)
            });
            if !allowed {
                continue;
            }
        }

        if let Some(parent) = dest.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Failed to create directory {}: {}", parent.display(), e);
            }
        }

        let entry_type = entry.header().entry_type();
        if !resolve_type_conflict(&dest, entry_type == EntryType::Directory) {
            continue;
        }

        let outcome = match entry_type {
            EntryType::Link => {
                // Rewrite the hardlink target with the same transform so the
                // extracted tree is self-consistent.
                let target = entry
                    .link_name()
                    .ok()
                    .flatten()
                    .map(|t| t.to_string_lossy().to_string());
                match target.and_then(|t| {
                    transform_entry_path(&t, section_prefix, strip, dest_dir)
                }) {
                    Some(link_target) => {
                        let _ = fs::remove_file(&dest);
                        fs::hard_link(&link_target, &dest)
                    }
                    None => {
                        warn!(
                            "Hardlink target outside section for {}; skipping",
                            dest.display()
                        );
                        continue;
                    }
                }
            }
            _ => {
                if entry_type == EntryType::Symlink {
                    let _ = fs::remove_file(&dest);
                }
                entry.unpack(&dest).map(|_| ())
            }
        };

        if let Err(e) = outcome {
            warn!("Failed to extract {}: {}", dest.display(), e);
        } else {
            debug!("Extracted {}", dest.display());
        }
    }

    Ok(())
}

/// Extract every entry under `section_prefix` into `dest_dir`
pub fn extract_subtree(
    archive_path: &Path,
    section_prefix: &str,
    dest_dir: &Path,
    strip: u32,
) -> Result<()> {
    extract_subtree_within(archive_path, section_prefix, dest_dir, strip, &[])
}

/// Extract a single named entry (`name` or `./name`) into
/// `dest_dir/<basename>`. Returns false when the entry is absent.
pub fn extract_entry(archive_path: &Path, entry_name: &str, dest_dir: &Path) -> Result<bool> {
    let mut archive = open_archive(archive_path)?;
    fs::create_dir_all(dest_dir)?;
    let dotted = format!("./{}", entry_name);

    for entry in archive
        .entries()
        .map_err(|e| Error::Archive(format!("read {}: {}", archive_path.display(), e)))?
    {
        let mut entry = entry
            .map_err(|e| Error::Archive(format!("read {}: {}", archive_path.display(), e)))?;
        let path = entry
            .path()
            .map_err(|e| Error::Archive(format!("entry path: {}", e)))?
            .to_string_lossy()
            .to_string();

        if path == entry_name || path == dotted {
            let file_name = Path::new(entry_name)
                .file_name()
                .ok_or_else(|| Error::Archive(format!("bad entry name: {}", entry_name)))?;
            let out_path = dest_dir.join(file_name);
            let mut out = File::create(&out_path)?;
            io::copy(&mut entry, &mut out)?;
            return Ok(true);
        }
    }
    Ok(false)
}
