//! Glacier-backed implementation of the vault service.

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusoto_core::{HttpClient, Region};
use rusoto_credential::ProfileProvider;
use rusoto_glacier::{
    AbortMultipartUploadInput, CompleteMultipartUploadInput, DeleteArchiveInput, DescribeJobInput,
    GetJobOutputInput, Glacier, GlacierClient, InitiateJobInput, InitiateMultipartUploadInput,
    JobParameters, ListJobsInput, UploadMultipartPartInput,
};

use crate::cloud::{ArchiveReceipt, JobOutputStream, RetrievalJob, VaultService};
use crate::constants::{ARCHIVE_RETRIEVAL_JOB_TYPE, GLACIER_ACCOUNT_ID};

/// Connection settings for the Glacier client. Always passed in explicitly;
/// nothing here is read from process-wide mutable state.
#[derive(Debug, Clone, Default)]
pub struct VaultConfig {
    /// AWS region name, e.g. "eu-west-1"; the SDK default chain applies
    /// when unset
    pub region: Option<String>,
    /// Named credentials profile; the SDK default chain applies when unset
    pub profile: Option<String>,
}

/// Vault service talking to AWS Glacier.
pub struct GlacierVaultService {
    client: GlacierClient,
}

impl GlacierVaultService {
    pub fn new(config: &VaultConfig) -> Result<Self> {
        let region = match &config.region {
            Some(name) => Region::from_str(name)
                .with_context(|| format!("'{}' is not a known region", name))?,
            None => Region::default(),
        };

        let client = match &config.profile {
            Some(profile) => {
                let mut provider =
                    ProfileProvider::new().context("could not locate the credentials file")?;
                provider.set_profile(profile.as_str());
                let dispatcher =
                    HttpClient::new().context("could not create the HTTP client")?;
                GlacierClient::new_with(dispatcher, provider, region)
            }
            None => GlacierClient::new(region),
        };

        Ok(GlacierVaultService { client })
    }
}

#[async_trait]
impl VaultService for GlacierVaultService {
    async fn initiate_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: usize,
    ) -> Result<String> {
        let output = self
            .client
            .initiate_multipart_upload(InitiateMultipartUploadInput {
                account_id: GLACIER_ACCOUNT_ID.to_string(),
                archive_description: Some(description.to_string()),
                part_size: Some(part_size.to_string()),
                vault_name: vault.to_string(),
            })
            .await
            .context("InitiateMultipartUpload failed")?;

        output
            .upload_id
            .ok_or_else(|| anyhow!("the service did not return an upload id"))
    }

    async fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: &str,
        checksum: &str,
        body: Vec<u8>,
    ) -> Result<String> {
        let output = self
            .client
            .upload_multipart_part(UploadMultipartPartInput {
                account_id: GLACIER_ACCOUNT_ID.to_string(),
                body: Some(body.into()),
                checksum: Some(checksum.to_string()),
                range: Some(range.to_string()),
                upload_id: upload_id.to_string(),
                vault_name: vault.to_string(),
            })
            .await
            .context("UploadMultipartPart failed")?;

        output
            .checksum
            .ok_or_else(|| anyhow!("the service did not return a part checksum"))
    }

    async fn complete_upload(
        &self,
        vault: &str,
        upload_id: &str,
        checksum: &str,
        total_size: u64,
    ) -> Result<ArchiveReceipt> {
        let output = self
            .client
            .complete_multipart_upload(CompleteMultipartUploadInput {
                account_id: GLACIER_ACCOUNT_ID.to_string(),
                archive_size: Some(total_size.to_string()),
                checksum: Some(checksum.to_string()),
                upload_id: upload_id.to_string(),
                vault_name: vault.to_string(),
            })
            .await
            .context("CompleteMultipartUpload failed")?;

        Ok(ArchiveReceipt {
            archive_id: output.archive_id,
            checksum: output.checksum,
            location: output.location,
        })
    }

    async fn abort_upload(&self, vault: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload(AbortMultipartUploadInput {
                account_id: GLACIER_ACCOUNT_ID.to_string(),
                upload_id: upload_id.to_string(),
                vault_name: vault.to_string(),
            })
            .await
            .context("AbortMultipartUpload failed")?;
        Ok(())
    }

    async fn initiate_retrieval_job(
        &self,
        vault: &str,
        archive_id: &str,
        tier: &str,
    ) -> Result<String> {
        let output = self
            .client
            .initiate_job(InitiateJobInput {
                account_id: GLACIER_ACCOUNT_ID.to_string(),
                job_parameters: Some(JobParameters {
                    archive_id: Some(archive_id.to_string()),
                    tier: Some(tier.to_string()),
                    type_: Some(ARCHIVE_RETRIEVAL_JOB_TYPE.to_string()),
                    ..Default::default()
                }),
                vault_name: vault.to_string(),
            })
            .await
            .context("InitiateJob failed")?;

        output
            .job_id
            .ok_or_else(|| anyhow!("the service did not return a job id"))
    }

    async fn list_jobs(&self, vault: &str) -> Result<Vec<RetrievalJob>> {
        let output = self
            .client
            .list_jobs(ListJobsInput {
                account_id: GLACIER_ACCOUNT_ID.to_string(),
                vault_name: vault.to_string(),
                ..Default::default()
            })
            .await
            .context("ListJobs failed")?;

        let jobs = output
            .job_list
            .unwrap_or_default()
            .into_iter()
            .filter_map(|job| {
                job.job_id.map(|job_id| RetrievalJob {
                    job_id,
                    action: job.action,
                    archive_id: job.archive_id,
                    completed: job.completed.unwrap_or(false),
                })
            })
            .collect();

        Ok(jobs)
    }

    async fn describe_job(&self, vault: &str, job_id: &str) -> Result<RetrievalJob> {
        let job = self
            .client
            .describe_job(DescribeJobInput {
                account_id: GLACIER_ACCOUNT_ID.to_string(),
                job_id: job_id.to_string(),
                vault_name: vault.to_string(),
            })
            .await
            .context("DescribeJob failed")?;

        Ok(RetrievalJob {
            job_id: job.job_id.unwrap_or_else(|| job_id.to_string()),
            action: job.action,
            archive_id: job.archive_id,
            completed: job.completed.unwrap_or(false),
        })
    }

    async fn job_output(&self, vault: &str, job_id: &str) -> Result<JobOutputStream> {
        let output = self
            .client
            .get_job_output(GetJobOutputInput {
                account_id: GLACIER_ACCOUNT_ID.to_string(),
                job_id: job_id.to_string(),
                range: None,
                vault_name: vault.to_string(),
            })
            .await
            .context("GetJobOutput failed")?;

        let body = output
            .body
            .ok_or_else(|| anyhow!("the job output carries no body"))?;
        Ok(Box::new(std::io::Cursor::new(body)))
    }

    async fn delete_archive(&self, vault: &str, archive_id: &str) -> Result<()> {
        self.client
            .delete_archive(DeleteArchiveInput {
                account_id: GLACIER_ACCOUNT_ID.to_string(),
                archive_id: archive_id.to_string(),
                vault_name: vault.to_string(),
            })
            .await
            .context("DeleteArchive failed")?;
        Ok(())
    }
}
