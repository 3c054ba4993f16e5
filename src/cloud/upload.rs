//! Chunked multipart upload with integrity hashing and abort-on-failure.
//!
//! An upload moves through initiate, part transmission and completion. Any
//! failure after a session was initiated triggers exactly one best-effort
//! abort so the service is never left with an orphaned session; the session
//! identifier is still surfaced to the caller for manual reconciliation.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;

use crate::cloud::VaultService;
use crate::models::UploadOutcome;

/// Leaf size of the integrity tree hash (1 MiB).
const TREE_HASH_LEAF: usize = 1024 * 1024;

/// Upload failure carrying the session identifier when the transfer had
/// already been initiated.
#[derive(Debug)]
pub struct UploadError {
    pub upload_id: Option<String>,
    pub source: anyhow::Error,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.source)
    }
}

/// Drives one multipart upload against a vault.
pub struct ChunkedUploader {
    service: Arc<dyn VaultService>,
    vault: String,
    part_size: usize,
}

impl ChunkedUploader {
    pub fn new(service: Arc<dyn VaultService>, vault: &str, part_size: usize) -> Self {
        ChunkedUploader {
            service,
            vault: vault.to_string(),
            part_size,
        }
    }

    /// Upload everything from `src` as one archive and return the session
    /// identifier together with the outcome.
    ///
    /// Parts are read and transmitted sequentially; each part except the
    /// last is exactly the configured part size. On any failure past
    /// initiation the session is aborted before the error is returned.
    pub async fn upload<R>(
        &self,
        mut src: R,
        description: &str,
    ) -> Result<(String, UploadOutcome), UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let upload_id = self
            .service
            .initiate_upload(&self.vault, description, self.part_size)
            .await
            .context("could not initiate the upload")
            .map_err(|source| UploadError {
                upload_id: None,
                source,
            })?;
        info!("Initiated upload '{}' into vault '{}'", upload_id, self.vault);

        // the guard covers cancellation; a panic is caught so the abort can
        // be awaited before the unwind continues
        let mut guard = AbortGuard::new(self.service.clone(), &self.vault, &upload_id);
        let result = AssertUnwindSafe(self.transmit(&mut src, &upload_id, description))
            .catch_unwind()
            .await;
        guard.disarm();

        match result {
            Ok(Ok(outcome)) => Ok((upload_id, outcome)),
            Ok(Err(source)) => {
                self.abort(&upload_id).await;
                Err(UploadError {
                    upload_id: Some(upload_id),
                    source,
                })
            }
            Err(panic) => {
                self.abort(&upload_id).await;
                std::panic::resume_unwind(panic);
            }
        }
    }

    /// Best-effort abort of an open session; a failing abort is only logged.
    async fn abort(&self, upload_id: &str) {
        if let Err(e) = self.service.abort_upload(&self.vault, upload_id).await {
            warn!("Could not abort upload '{}': {:#}", upload_id, e);
        }
    }

    /// Transmit all parts and complete the session.
    async fn transmit<R>(
        &self,
        src: &mut R,
        upload_id: &str,
        description: &str,
    ) -> Result<UploadOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let mut part_checksums: Vec<[u8; 32]> = Vec::new();
        let mut total: u64 = 0;
        let mut buf = vec![0u8; self.part_size];

        loop {
            let n = read_part(src, &mut buf)
                .await
                .context("could not read the upload source stream")?;
            if n == 0 {
                break;
            }

            let part = &buf[..n];
            let checksum = hex::encode(tree_hash(part));
            let range = format!("bytes {}-{}/*", total, total + n as u64 - 1);
            debug!("Upload part {} ({} bytes)", range, n);

            let recorded = self
                .service
                .upload_part(&self.vault, upload_id, &range, &checksum, part.to_vec())
                .await
                .with_context(|| format!("could not upload part {}", range))?;
            part_checksums.push(decode_checksum(&recorded)?);
            total += n as u64;
        }

        let checksum = hex::encode(combine(part_checksums));
        let receipt = self
            .service
            .complete_upload(&self.vault, upload_id, &checksum, total)
            .await
            .context("could not complete the upload")?;
        info!(
            "Completed upload '{}': {} bytes, checksum {}",
            upload_id, total, checksum
        );

        Ok(UploadOutcome {
            archive_id: receipt.archive_id,
            checksum: receipt.checksum.or(Some(checksum)),
            location: receipt.location,
            total_size: total,
            part_size: self.part_size,
            description: description.to_string(),
        })
    }
}

/// Aborts the upload if dropped while armed, so a cancelled upload future
/// cannot leave the remote session open.
struct AbortGuard {
    service: Arc<dyn VaultService>,
    vault: String,
    upload_id: String,
    armed: bool,
}

impl AbortGuard {
    fn new(service: Arc<dyn VaultService>, vault: &str, upload_id: &str) -> Self {
        AbortGuard {
            service,
            vault: vault.to_string(),
            upload_id: upload_id.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let service = self.service.clone();
        let vault = std::mem::take(&mut self.vault);
        let upload_id = std::mem::take(&mut self.upload_id);
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = service.abort_upload(&vault, &upload_id).await {
                    warn!("Could not abort upload '{}': {:#}", upload_id, e);
                }
            });
        } else {
            warn!(
                "Upload '{}' may be left open, no runtime available to abort it",
                upload_id
            );
        }
    }
}

/// Fill `buf` from the stream, reading until the buffer is full or the
/// stream ends. Returns the number of bytes read.
async fn read_part<R: AsyncRead + Unpin>(src: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn decode_checksum(checksum: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(checksum)
        .with_context(|| format!("'{}' is not a valid part checksum", checksum))?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("'{}' is not a SHA-256 part checksum", checksum))
}

/// Tree hash of one contiguous byte run: SHA-256 over 1 MiB leaves,
/// combined pairwise up to a single root.
pub fn tree_hash(data: &[u8]) -> [u8; 32] {
    if data.is_empty() {
        return leaf_hash(data);
    }
    combine(data.chunks(TREE_HASH_LEAF).map(leaf_hash).collect())
}

/// Combine an ordered list of checksums pairwise until one root remains; an
/// odd checksum is carried up unchanged. The result depends only on the
/// ordered inputs.
pub fn combine(mut level: Vec<[u8; 32]>) -> [u8; 32] {
    if level.is_empty() {
        return leaf_hash(&[]);
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                if pair.len() == 2 {
                    let mut hasher = Sha256::new();
                    hasher.update(pair[0]);
                    hasher.update(pair[1]);
                    hasher.finalize().into()
                } else {
                    pair[0]
                }
            })
            .collect();
    }
    level[0]
}

fn leaf_hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
