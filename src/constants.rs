//! Global constants for the coldvault application.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Pipeline constants
/// Capacity of the bounded content-event queue between the packager and the
/// catalog sink. A full queue blocks the packager (intentional backpressure).
pub const CONTENT_EVENT_QUEUE_CAPACITY: usize = 50;

/// Buffer size of the in-memory pipes connecting pipeline stages (64KB)
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

// Cipher constants
/// Chunk size for streaming encryption/decryption (64KB)
pub const CIPHER_CHUNK_SIZE: usize = 64 * 1024;

/// Length of the random IV written ahead of the ciphertext (one AES block)
pub const CIPHER_IV_LEN: usize = 16;

// Glacier constants
/// Account id placeholder meaning "the account of the credentials in use"
pub const GLACIER_ACCOUNT_ID: &str = "-";

/// Default multipart upload part size in MiB
pub const DEFAULT_PART_SIZE_MIB: u64 = 1;

/// Largest part size Glacier accepts, in MiB (4 GiB)
pub const MAX_PART_SIZE_MIB: u64 = 4096;

/// Job type submitted when requesting an archive retrieval
pub const ARCHIVE_RETRIEVAL_JOB_TYPE: &str = "archive-retrieval";

/// Job action reported by the service for archive-retrieval jobs
pub const ARCHIVE_RETRIEVAL_ACTION: &str = "ArchiveRetrieval";

/// Default interval between retrieval job status polls (30 minutes)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1800;

// Catalog constants
/// Directory under $HOME holding the default catalog database
pub const DEFAULT_DATABASE_DIR: &str = ".coldvault";

/// File name of the default catalog database
pub const DEFAULT_DATABASE_FILE: &str = "catalog.db";
