// src/verify.rs

//! Detached GPG signature verification
//!
//! Packages are signed with a detached `.sig` beside the archive. We run
//! the external `gpg` against the local keyring at
//! `<root>/etc/starpack/keys/starpack.gpg`, reading its machine status
//! stream. A NO_PUBKEY result triggers a one-shot recovery: the key is
//! fetched as `keys/<keyid>.asc` from each configured repository in order,
//! imported, and the verification is retried exactly once. Bad, expired or
//! revoked signatures are permanent failures.

use crate::config::{self, RepoConfig};
use crate::download::Downloader;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// Parsed outcome of one gpg --verify invocation
#[derive(Debug, Default)]
struct VerifyStatus {
    good: bool,
    bad: bool,
    expired_sig: bool,
    expired_key: bool,
    revoked_key: bool,
    missing_key: Option<String>,
    exit_ok: bool,
}

fn run_gpg_verify(keyring: &Path, sig_path: &Path, package_path: &Path) -> Result<VerifyStatus> {
    let output = Command::new("gpg")
        .args(["--batch", "--no-tty", "--status-fd", "1", "--no-default-keyring"])
        .arg("--keyring")
        .arg(keyring)
        .arg("--verify")
        .arg(sig_path)
        .arg(package_path)
        .stderr(Stdio::null())
        .output()
        .map_err(|e| Error::Signature(format!("failed to run gpg: {}", e)))?;

    let mut status = parse_status(&String::from_utf8_lossy(&output.stdout));
    status.exit_ok = output.status.success();
    Ok(status)
}

fn parse_status(stdout: &str) -> VerifyStatus {
    let mut status = VerifyStatus::default();
    for line in stdout.lines() {
        let Some(rest) = line.strip_prefix("[GNUPG:] ") else {
            continue;
        };
        if rest.starts_with("GOODSIG") {
            status.good = true;
        } else if rest.starts_with("BADSIG") {
            status.bad = true;
        } else if rest.starts_with("EXPKEYSIG") {
            status.expired_key = true;
        } else if rest.starts_with("EXPSIG") {
            status.expired_sig = true;
        } else if rest.starts_with("REVKEYSIG") {
            status.revoked_key = true;
        } else if let Some(args) = rest.strip_prefix("NO_PUBKEY") {
            status.missing_key = args.split_whitespace().next().map(str::to_string);
        }
    }
    status
}

fn import_key(keyring: &Path, key_file: &Path) -> Result<()> {
    let status = Command::new("gpg")
        .args(["--batch", "--no-tty", "--no-default-keyring"])
        .arg("--keyring")
        .arg(keyring)
        .arg("--import")
        .arg(key_file)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| Error::Signature(format!("failed to run gpg --import: {}", e)))?;

    if !status.success() {
        return Err(Error::Signature(format!(
            "key import failed (gpg exit: {})",
            status
        )));
    }
    Ok(())
}

/// Fetch a missing public key from the configured repositories, trying each
/// base URL in order. Returns the downloaded key file path.
fn recover_key(key_id: &str, cache_dir: &Path) -> Result<PathBuf> {
    let repos = RepoConfig::load_required(config::REPOS_CONF).map_err(|e| {
        Error::Signature(format!(
            "no repositories available to search for key {}: {}",
            key_id, e
        ))
    })?;

    let downloader = Downloader::new()?;
    let temp_path = cache_dir.join(format!("{}.asc", key_id));
    // A stale partial download would make fetch() a silent no-op
    let _ = fs::remove_file(&temp_path);

    for repo_url in &repos.repositories {
        let key_url = format!("{}keys/{}.asc", repo_url, key_id);
        info!("Attempting key download: {}", key_url);
        match downloader.fetch(&key_url, &temp_path) {
            Ok(()) => return Ok(temp_path),
            Err(_) => {
                let _ = fs::remove_file(&temp_path);
            }
        }
    }

    Err(Error::Signature(format!(
        "failed to download key {} from any repository",
        key_id
    )))
}

/// Verify `package_path` against the detached signature at `sig_path`,
/// using the keyring under `install_root`.
pub fn verify_signature(package_path: &Path, sig_path: &Path, install_root: &Path) -> Result<()> {
    if !sig_path.exists() {
        return Err(Error::Signature(format!(
            "missing signature file: {}",
            sig_path.display()
        )));
    }
    if !package_path.exists() {
        return Err(Error::Signature(format!(
            "missing package file: {}",
            package_path.display()
        )));
    }

    let keys_dir = config::layout::keys_dir(install_root);
    let keyring = config::layout::keyring_path(install_root);
    let cache_dir = config::layout::cache_dir(install_root);
    fs::create_dir_all(&keys_dir)?;
    fs::create_dir_all(&cache_dir)?;
    if !keyring.exists() {
        fs::File::create(&keyring)?;
    }

    let status = run_gpg_verify(&keyring, sig_path, package_path)?;

    if status.good && status.exit_ok {
        return Ok(());
    }
    if status.bad {
        return Err(Error::Signature("BAD signature".into()));
    }
    if status.expired_sig {
        return Err(Error::Signature("signature has expired".into()));
    }
    if status.expired_key {
        return Err(Error::Signature("signing key has expired".into()));
    }
    if status.revoked_key {
        return Err(Error::Signature("signing key is revoked".into()));
    }

    if let Some(key_id) = status.missing_key {
        warn!("Missing public key: {}", key_id);
        let key_file = recover_key(&key_id, &cache_dir)?;

        info!("Importing key: {}", key_id);
        let import_result = import_key(&keyring, &key_file);
        let _ = fs::remove_file(&key_file);
        import_result?;

        info!("Key imported, re-verifying signature");
        let retry = run_gpg_verify(&keyring, sig_path, package_path)?;
        if retry.good && retry.exit_ok {
            return Ok(());
        }
        return Err(Error::Signature(format!(
            "verification still fails after importing key {}",
            key_id
        )));
    }

    Err(Error::Signature("verification failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_signature_file_fails() {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("pkg.starpack");
        fs::write(&package, "data").unwrap();
        let sig = dir.path().join("pkg.starpack.sig");

        let result = verify_signature(&package, &sig, dir.path());
        assert!(matches!(result, Err(Error::Signature(_))));
    }

    #[test]
    fn test_missing_package_file_fails() {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("pkg.starpack");
        let sig = dir.path().join("pkg.starpack.sig");
        fs::write(&sig, "sig").unwrap();

        let result = verify_signature(&package, &sig, dir.path());
        assert!(matches!(result, Err(Error::Signature(_))));
    }

    #[test]
    fn test_status_stream_goodsig() {
        let status = parse_status(
            "[GNUPG:] NEWSIG\n[GNUPG:] GOODSIG ABCD1234 Packager <p@example.com>\n",
        );
        assert!(status.good);
        assert!(!status.bad);
        assert!(status.missing_key.is_none());
    }

    #[test]
    fn test_status_stream_missing_key() {
        let status = parse_status("[GNUPG:] ERRSIG x\n[GNUPG:] NO_PUBKEY ABCD1234EF567890\n");
        assert_eq!(status.missing_key.as_deref(), Some("ABCD1234EF567890"));
        assert!(!status.good);
    }

    #[test]
    fn test_status_stream_permanent_failures() {
        assert!(parse_status("[GNUPG:] BADSIG K U\n").bad);
        assert!(parse_status("[GNUPG:] EXPSIG K U\n").expired_sig);
        assert!(parse_status("[GNUPG:] EXPKEYSIG K U\n").expired_key);
        assert!(parse_status("[GNUPG:] REVKEYSIG K U\n").revoked_key);
        // EXPKEYSIG must not be mistaken for EXPSIG
        assert!(!parse_status("[GNUPG:] EXPKEYSIG K U\n").expired_sig);
    }
}
