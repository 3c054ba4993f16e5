use chrono::{DateTime, Utc};

/// One backup run as recorded in the catalog. Created when the run starts
/// and updated once with the outcome when it ends.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub vault: String,
    pub description: String,
    /// Multipart session id, kept even for failed runs
    pub upload_id: Option<String>,
    /// Archive id assigned by the service; unset when the upload never
    /// completed
    pub archive_id: Option<String>,
    pub location: Option<String>,
    pub checksum: Option<String>,
    /// Transmitted archive size in bytes
    pub length: u64,
    /// Error message of a failed run
    pub error: Option<String>,
    /// Plaintext passphrase, present only when the user opted into storing
    /// it at create time
    pub passphrase: Option<String>,
}

impl BackupRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.archive_id.is_some()
    }
}

/// One file stored inside a backup's package.
#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub id: i64,
    pub backup_id: i64,
    pub archive_path: String,
    pub real_path: String,
    pub length: u64,
    pub modified: Option<DateTime<Utc>>,
}
