// src/download.rs

//! Blocking and bounded-parallel file downloads
//!
//! Single transfers block the caller; batches run on a pool of at most ten
//! worker threads sharing one HTTP client. A destination that already
//! exists is a skipped success, so archive and signature caches are reused
//! across transactions. Partial files never survive a failed transfer.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection establishment timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Whole-transfer timeout; the only exit for a stuck transfer
const TOTAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on concurrent transfers in a batch
const MAX_CONCURRENT: usize = 10;

/// HTTP client wrapper shared by single and batched fetches
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .user_agent(concat!("starpack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Download(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Download one file. A pre-existing destination is success without any
    /// network traffic. On failure the partial file is removed.
    pub fn fetch(&self, url: &str, path: &Path) -> Result<()> {
        if path.exists() {
            debug!("Already cached: {}", path.display());
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!("Downloading {} -> {}", url, path.display());
        match self.transfer(url, path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(path);
                Err(e)
            }
        }
    }

    fn transfer(&self, url: &str, path: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()?
            .error_for_status()
            .map_err(|e| Error::Download(format!("{}: {}", url, e)))?;

        let mut file = File::create(path)?;
        io::copy(&mut response, &mut file)?;
        file.flush()?;
        Ok(())
    }

    /// Download a batch of (url, destination) jobs with bounded concurrency.
    /// Jobs whose destination exists are skipped. A failed job removes its
    /// partial file and marks the batch failed, but the remaining jobs keep
    /// going. Returns true iff every job succeeded or was skipped.
    pub fn fetch_many(&self, jobs: &[(String, PathBuf)]) -> bool {
        // Each destination is owned by exactly one job
        let mut seen = HashSet::new();
        let jobs: Vec<&(String, PathBuf)> = jobs
            .iter()
            .filter(|(_, path)| seen.insert(path.clone()))
            .collect();

        if jobs.is_empty() {
            return true;
        }

        let next = AtomicUsize::new(0);
        let done = AtomicUsize::new(0);
        let all_ok = AtomicBool::new(true);
        let console = Mutex::new(());
        let total = jobs.len();
        let workers = total.min(MAX_CONCURRENT);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    if idx >= total {
                        break;
                    }
                    let (url, path) = jobs[idx];

                    if let Err(e) = self.fetch(url, path) {
                        all_ok.store(false, Ordering::SeqCst);
                        let _guard = console.lock().unwrap();
                        eprintln!("\rDownload failed: {} ({})", url, e);
                    }

                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    let _guard = console.lock().unwrap();
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    print!("\rFetching [{}/{}] {:<40}", finished, total, name);
                    let _ = io::stdout().flush();
                });
            }
        });

        // Clear the reusable progress line
        print!("\r{:60}\r", "");
        let _ = io::stdout().flush();

        if !all_ok.load(Ordering::SeqCst) {
            warn!("One or more downloads in the batch failed");
        }
        all_ok.load(Ordering::SeqCst)
    }
}
