//! Remote vault protocol: the service trait, the Glacier-backed client, the
//! chunked upload state machine and the retrieval job state machine.

pub mod client;
pub mod retrieval;
pub mod upload;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Byte stream handle for a completed retrieval job's output. Dropped as
/// soon as the copy into the destination finishes.
pub type JobOutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Record returned by the service when a multipart upload completes.
#[derive(Debug, Clone, Default)]
pub struct ArchiveReceipt {
    pub archive_id: Option<String>,
    pub checksum: Option<String>,
    pub location: Option<String>,
}

/// One remote retrieval job as reported by the service.
#[derive(Debug, Clone)]
pub struct RetrievalJob {
    pub job_id: String,
    /// Job kind as reported by the service, e.g. "ArchiveRetrieval"
    pub action: Option<String>,
    /// Archive the job retrieves, when it is an archive retrieval
    pub archive_id: Option<String>,
    pub completed: bool,
}

/// The remote archival service, reduced to the operations the pipeline
/// drives. The production implementation talks to AWS Glacier; tests swap
/// in an in-memory fake.
#[async_trait]
pub trait VaultService: Send + Sync {
    /// Start a multipart upload and return its session identifier.
    async fn initiate_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: usize,
    ) -> Result<String>;

    /// Transmit one part. `range` is the inclusive byte range of the part
    /// within the archive ("bytes a-b/*"); `checksum` is the hex tree hash
    /// of the body. Returns the checksum the service recorded for the part.
    async fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: &str,
        checksum: &str,
        body: Vec<u8>,
    ) -> Result<String>;

    /// Finalize a multipart upload with the aggregate tree hash and total
    /// archive size.
    async fn complete_upload(
        &self,
        vault: &str,
        upload_id: &str,
        checksum: &str,
        total_size: u64,
    ) -> Result<ArchiveReceipt>;

    /// Cancel a multipart upload.
    async fn abort_upload(&self, vault: &str, upload_id: &str) -> Result<()>;

    /// Request retrieval of an archive at the given service tier and return
    /// the job identifier.
    async fn initiate_retrieval_job(
        &self,
        vault: &str,
        archive_id: &str,
        tier: &str,
    ) -> Result<String>;

    /// List the jobs currently known for a vault.
    async fn list_jobs(&self, vault: &str) -> Result<Vec<RetrievalJob>>;

    /// Query the current state of one job.
    async fn describe_job(&self, vault: &str, job_id: &str) -> Result<RetrievalJob>;

    /// Open the output stream of a completed job.
    async fn job_output(&self, vault: &str, job_id: &str) -> Result<JobOutputStream>;

    /// Permanently delete an archive from a vault.
    async fn delete_archive(&self, vault: &str, archive_id: &str) -> Result<()>;
}
