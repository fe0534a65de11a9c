// src/lib.rs

//! Starpack Package Manager
//!
//! Package manager for `.starpack` archives with a line-oriented installed
//! database, GPG-verified downloads, and declarative hooks.
//!
//! # Architecture
//!
//! - Flat-file state: the installed DB is an ordered text file of records
//! - Repositories: ordered base URLs, first repository wins on name clashes
//! - Hooks: INI-like `.hook` files run around every state change, directly
//!   or inside a chroot of the install root
//! - Archives: tar with gzip/xz/zstd compression, `files/` and `hooks/`
//!   sub-trees plus an embedded `metadata.yaml`

pub mod archive;
pub mod cache;
pub mod chroot;
pub mod config;
pub mod db;
pub mod download;
mod error;
pub mod hooks;
pub mod indexer;
pub mod info;
pub mod install;
pub mod manifest;
pub mod remove;
pub mod resolver;
pub mod update;
pub mod verify;
pub mod version;

pub use error::{Error, Result};
