//! # coldvault
//!
//! Encrypted, chunked file backups to AWS Glacier cold storage.
//!
//! ## Overview
//!
//! coldvault packages a set of files into one compressed stream, encrypts it
//! with a passphrase-derived key and uploads it in checksummed parts, all
//! concurrently and without staging the archive on disk. Every backup is
//! recorded in a local SQLite catalog so archives can be listed, inspected,
//! retrieved and expired later.
//!
//! ## Features
//!
//! - **Streaming pipeline**: packaging, encryption and upload run as
//!   concurrent stages connected by backpressured in-memory pipes
//! - **Integrity hashing**: per-part tree hashes and an aggregate checksum
//!   over the whole archive
//! - **Abort on failure**: a failed upload never leaves a multipart session
//!   open on the service
//! - **Idempotent retrieval**: a restarted restore reuses the pending
//!   retrieval job instead of queueing a duplicate
//! - **Local catalog**: per-file metadata of every backup, searchable
//!   without touching the vault
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use coldvault::cloud::client::{GlacierVaultService, VaultConfig};
//! use coldvault::models::BackupRequest;
//! use coldvault::pipeline::run_backup;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = Arc::new(GlacierVaultService::new(&VaultConfig::default())?);
//! let request = BackupRequest {
//!     roots: vec!["/home/me/photos".into()],
//!     exclude_patterns: vec![r".*\.tmp".to_string()],
//!     include_patterns: Vec::new(),
//!     vault: "photos".to_string(),
//!     description: "july batch".to_string(),
//!     passphrase: "correct horse".to_string(),
//!     part_size: 1024 * 1024,
//! };
//! let result = run_backup(service, &request, |event| {
//!     println!("packaged {}", event.archive_path);
//!     Ok(())
//! })
//! .await;
//! println!("stored archive {:?}", result.outcome.archive_id);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cli;
pub mod cloud;
pub mod commands;
pub mod constants;
pub mod crypto;
pub mod db;
pub mod models;
pub mod pipeline;

#[cfg(test)]
pub mod test_utils;
