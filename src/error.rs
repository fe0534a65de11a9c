// src/error.rs

use thiserror::Error;

/// Core error types for Starpack
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// YAML parse/serialize errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Repository configuration problems (missing repos.conf, no URLs)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Download failures that are not plain transport errors
    #[error("Download failed: {0}")]
    Download(String),

    /// Signature verification failures
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Dependency resolution failures
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Installed database failures
    #[error("Database error: {0}")]
    Database(String),

    /// Archive read/extract failures
    #[error("Archive error: {0}")]
    Archive(String),

    /// Hook execution failures
    #[error("Hook failed: {0}")]
    Hook(String),

    /// Chroot setup/execution failures
    #[error("Chroot error: {0}")]
    Chroot(String),

    /// Package not found locally or in any repository
    #[error("Package not found: {0}")]
    NotFound(String),
}

/// Result type alias using Starpack's Error type
pub type Result<T> = std::result::Result<T, Error>;
