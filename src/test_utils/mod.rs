//! In-memory vault service fake for unit tests. Records every call and can
//! be told to fail at specific points of the upload protocol.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::cloud::{ArchiveReceipt, JobOutputStream, RetrievalJob, VaultService};
use crate::constants::ARCHIVE_RETRIEVAL_ACTION;

#[derive(Debug, Clone)]
pub struct InitiatedUpload {
    pub upload_id: String,
    pub vault: String,
    pub description: String,
    pub part_size: usize,
}

#[derive(Debug, Clone)]
pub struct UploadedPart {
    pub upload_id: String,
    pub range: String,
    pub checksum: String,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub upload_id: String,
    pub checksum: String,
    pub total_size: u64,
}

#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub vault: String,
    pub archive_id: String,
    pub tier: String,
}

#[derive(Debug, Default)]
pub struct FakeVaultState {
    pub initiated: Vec<InitiatedUpload>,
    pub parts: Vec<UploadedPart>,
    pub completed: Vec<CompletedUpload>,
    pub aborted: Vec<String>,
    pub deleted: Vec<(String, String)>,

    /// Refuse the initiate call
    pub fail_initiate: bool,
    /// Refuse the n-th part (1-based)
    pub fail_part: Option<usize>,
    /// Panic on the n-th part (1-based)
    pub panic_part: Option<usize>,
    /// Refuse the completion call
    pub fail_complete: bool,

    pub jobs: Vec<RetrievalJob>,
    pub retrieval_requests: Vec<RetrievalRequest>,
    /// Number of status polls to answer "not ready" before completing
    pub polls_until_ready: usize,
    pub describe_calls: usize,
    pub job_output: Vec<u8>,
}

pub struct FakeVaultService {
    pub state: Mutex<FakeVaultState>,
}

impl FakeVaultService {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeVaultService {
            state: Mutex::new(FakeVaultState::default()),
        })
    }
}

#[async_trait]
impl VaultService for FakeVaultService {
    async fn initiate_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: usize,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_initiate {
            bail!("initiate refused");
        }
        let upload_id = format!("upload-{}", state.initiated.len() + 1);
        state.initiated.push(InitiatedUpload {
            upload_id: upload_id.clone(),
            vault: vault.to_string(),
            description: description.to_string(),
            part_size,
        });
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _vault: &str,
        upload_id: &str,
        range: &str,
        checksum: &str,
        body: Vec<u8>,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_part == Some(state.parts.len() + 1) {
            bail!("part transmission refused");
        }
        if state.panic_part == Some(state.parts.len() + 1) {
            // the lock must not be poisoned, later calls still need it
            drop(state);
            panic!("injected part fault");
        }
        state.parts.push(UploadedPart {
            upload_id: upload_id.to_string(),
            range: range.to_string(),
            checksum: checksum.to_string(),
            length: body.len(),
        });
        Ok(checksum.to_string())
    }

    async fn complete_upload(
        &self,
        vault: &str,
        upload_id: &str,
        checksum: &str,
        total_size: u64,
    ) -> Result<ArchiveReceipt> {
        let mut state = self.state.lock().unwrap();
        if state.fail_complete {
            bail!("completion refused");
        }
        state.completed.push(CompletedUpload {
            upload_id: upload_id.to_string(),
            checksum: checksum.to_string(),
            total_size,
        });
        let archive_id = format!("archive-{}", state.completed.len());
        Ok(ArchiveReceipt {
            archive_id: Some(archive_id.clone()),
            checksum: Some(checksum.to_string()),
            location: Some(format!("/vaults/{}/archives/{}", vault, archive_id)),
        })
    }

    async fn abort_upload(&self, _vault: &str, upload_id: &str) -> Result<()> {
        self.state.lock().unwrap().aborted.push(upload_id.to_string());
        Ok(())
    }

    async fn initiate_retrieval_job(
        &self,
        vault: &str,
        archive_id: &str,
        tier: &str,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let job_id = format!("job-{}", state.retrieval_requests.len() + 1);
        state.retrieval_requests.push(RetrievalRequest {
            vault: vault.to_string(),
            archive_id: archive_id.to_string(),
            tier: tier.to_string(),
        });
        state.jobs.push(RetrievalJob {
            job_id: job_id.clone(),
            action: Some(ARCHIVE_RETRIEVAL_ACTION.to_string()),
            archive_id: Some(archive_id.to_string()),
            completed: false,
        });
        Ok(job_id)
    }

    async fn list_jobs(&self, _vault: &str) -> Result<Vec<RetrievalJob>> {
        Ok(self.state.lock().unwrap().jobs.clone())
    }

    async fn describe_job(&self, _vault: &str, job_id: &str) -> Result<RetrievalJob> {
        let mut state = self.state.lock().unwrap();
        state.describe_calls += 1;
        let completed = if state.polls_until_ready > 0 {
            state.polls_until_ready -= 1;
            false
        } else {
            true
        };
        let job = state
            .jobs
            .iter()
            .find(|job| job.job_id == job_id)
            .cloned();
        match job {
            Some(mut job) => {
                job.completed = completed;
                Ok(job)
            }
            None => bail!("no such job: {}", job_id),
        }
    }

    async fn job_output(&self, _vault: &str, _job_id: &str) -> Result<JobOutputStream> {
        let output = self.state.lock().unwrap().job_output.clone();
        Ok(Box::new(Cursor::new(output)))
    }

    async fn delete_archive(&self, vault: &str, archive_id: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .deleted
            .push((vault.to_string(), archive_id.to_string()));
        Ok(())
    }
}
