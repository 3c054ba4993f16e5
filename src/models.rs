//! Core data models shared between the pipeline, the cloud protocol and the
//! catalog.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Input to one backup run. Built once by the CLI layer and read-only for
/// the duration of the run.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Files or directories to package, in the order given
    pub roots: Vec<PathBuf>,
    /// Regular expressions for files to exclude
    pub exclude_patterns: Vec<String>,
    /// Regular expressions that override an exclusion
    pub include_patterns: Vec<String>,
    /// Name of the target vault
    pub vault: String,
    /// Human description stored with the archive
    pub description: String,
    /// Passphrase the package stream is encrypted with
    pub passphrase: String,
    /// Size of each upload part (except the last) in bytes
    pub part_size: usize,
}

/// Metadata for one file written into the package stream.
///
/// Emitted by the packager after the file is fully written and drained into
/// the catalog by the pipeline coordinator. Events arrive in archive order.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentEvent {
    /// Path of the entry inside the package
    pub archive_path: String,
    /// Original filesystem path
    pub real_path: PathBuf,
    /// Uncompressed length in bytes
    pub length: u64,
    /// Filesystem modification time, when available
    pub modified: Option<DateTime<Utc>>,
}

/// Result record of a completed multipart upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOutcome {
    /// Identifier of the stored archive
    pub archive_id: Option<String>,
    /// Aggregate tree hash reported by the service
    pub checksum: Option<String>,
    /// Storage location (URI path) of the archive
    pub location: Option<String>,
    /// Total bytes transmitted
    pub total_size: u64,
    /// Part size the upload used, in bytes
    pub part_size: usize,
    /// Description the archive was stored with
    pub description: String,
}

/// Aggregated result of one backup run.
///
/// The upload id is kept even when the run failed so the operator can
/// reconcile a dangling multipart upload; the outcome stays zeroed when the
/// upload never completed.
#[derive(Debug)]
pub struct BackupResult {
    pub vault: String,
    pub upload_id: Option<String>,
    pub outcome: UploadOutcome,
    pub error: Option<anyhow::Error>,
}
