//! Archive retrieval: discover or initiate a retrieval job, poll until the
//! service reports it ready, then stream the output to a local destination.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use tokio::io::AsyncWrite;

use crate::cloud::VaultService;
use crate::constants::ARCHIVE_RETRIEVAL_ACTION;

/// Drives one archive retrieval against a vault.
pub struct RetrievalSession {
    service: Arc<dyn VaultService>,
    vault: String,
    poll_interval: Duration,
}

impl RetrievalSession {
    pub fn new(service: Arc<dyn VaultService>, vault: &str, poll_interval: Duration) -> Self {
        RetrievalSession {
            service,
            vault: vault.to_string(),
            poll_interval,
        }
    }

    /// Retrieve one archive into `dest` and return the number of bytes
    /// downloaded. Blocks for the whole polling duration, which for cold
    /// storage is typically hours.
    pub async fn retrieve<W>(&self, archive_id: &str, tier: &str, dest: W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let job_id = self.acquire_job(archive_id, tier).await?;
        self.wait_until_ready(&job_id).await?;
        self.download(&job_id, dest).await
    }

    /// Reuse a pending retrieval job for the archive when one exists,
    /// otherwise initiate a new one. Reuse keeps a crashed and restarted
    /// retrieval from queueing a duplicate job.
    pub async fn acquire_job(&self, archive_id: &str, tier: &str) -> Result<String> {
        let jobs = self
            .service
            .list_jobs(&self.vault)
            .await
            .context("could not list the vault's retrieval jobs")?;

        if let Some(job) = jobs.iter().find(|job| {
            job.action.as_deref() == Some(ARCHIVE_RETRIEVAL_ACTION)
                && job.archive_id.as_deref() == Some(archive_id)
        }) {
            info!("Reusing pending retrieval job '{}'", job.job_id);
            return Ok(job.job_id.clone());
        }

        let job_id = self
            .service
            .initiate_retrieval_job(&self.vault, archive_id, tier)
            .await
            .context("could not initiate the retrieval job")?;
        info!("Initiated retrieval job '{}' at tier '{}'", job_id, tier);
        Ok(job_id)
    }

    /// Poll the job at the configured interval until the service reports it
    /// completed. There is no retry ceiling; only a failing status query
    /// ends the wait early.
    pub async fn wait_until_ready(&self, job_id: &str) -> Result<()> {
        loop {
            let job = self
                .service
                .describe_job(&self.vault, job_id)
                .await
                .context("could not query the retrieval job status")?;
            if job.completed {
                info!("Retrieval job '{}' is ready", job_id);
                return Ok(());
            }
            info!(
                "Retrieval job '{}' is not ready yet, polling again in {}s",
                job_id,
                self.poll_interval.as_secs()
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Stream the completed job's output into `dest`.
    pub async fn download<W>(&self, job_id: &str, mut dest: W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut body = self
            .service
            .job_output(&self.vault, job_id)
            .await
            .context("could not open the retrieval job output")?;
        let copied = tokio::io::copy(&mut body, &mut dest)
            .await
            .context("could not download the retrieval job output")?;
        info!("Downloaded {} bytes from job '{}'", copied, job_id);
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::RetrievalJob;
    use crate::test_utils::FakeVaultService;
    use std::io::Cursor;

    fn session(fake: &Arc<FakeVaultService>) -> RetrievalSession {
        RetrievalSession::new(fake.clone(), "vault", Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_acquire_initiates_when_no_job_pending() {
        let fake = FakeVaultService::new();
        let job_id = session(&fake).acquire_job("archive-1", "Standard").await.unwrap();

        let state = fake.state.lock().unwrap();
        assert_eq!(state.retrieval_requests.len(), 1);
        assert_eq!(state.retrieval_requests[0].archive_id, "archive-1");
        assert_eq!(state.retrieval_requests[0].tier, "Standard");
        assert_eq!(state.jobs[0].job_id, job_id);
    }

    #[tokio::test]
    async fn test_acquire_is_idempotent() {
        let fake = FakeVaultService::new();
        let s = session(&fake);

        let first = s.acquire_job("archive-1", "Standard").await.unwrap();
        let second = s.acquire_job("archive-1", "Standard").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fake.state.lock().unwrap().retrieval_requests.len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_ignores_jobs_for_other_archives() {
        let fake = FakeVaultService::new();
        fake.state.lock().unwrap().jobs.push(RetrievalJob {
            job_id: "job-other".to_string(),
            action: Some(ARCHIVE_RETRIEVAL_ACTION.to_string()),
            archive_id: Some("archive-other".to_string()),
            completed: false,
        });

        let job_id = session(&fake).acquire_job("archive-1", "Bulk").await.unwrap();

        assert_ne!(job_id, "job-other");
        assert_eq!(fake.state.lock().unwrap().retrieval_requests.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_polls_until_completed() {
        let fake = FakeVaultService::new();
        let s = session(&fake);
        let job_id = s.acquire_job("archive-1", "Standard").await.unwrap();
        fake.state.lock().unwrap().polls_until_ready = 3;

        s.wait_until_ready(&job_id).await.unwrap();

        assert_eq!(fake.state.lock().unwrap().describe_calls, 4);
    }

    #[tokio::test]
    async fn test_download_copies_job_output() {
        let fake = FakeVaultService::new();
        fake.state.lock().unwrap().job_output = b"archive bytes".to_vec();
        let s = session(&fake);
        let job_id = s.acquire_job("archive-1", "Standard").await.unwrap();

        let mut dest = Cursor::new(Vec::new());
        let copied = s.download(&job_id, &mut dest).await.unwrap();

        assert_eq!(copied, 13);
        assert_eq!(dest.into_inner(), b"archive bytes");
    }
}
