//! Concurrent wiring of the backup and restore pipelines.
//!
//! The create path runs three stages connected by two in-memory pipes:
//! packaging writes into the cipher, the cipher writes into the uploader. A
//! fourth consumer drains the bounded content-event queue into the metadata
//! sink. The restore path runs the download and decryption stages joined by
//! one pipe. Pipes carry backpressure both ways: a slow uploader throttles
//! the cipher, which throttles the packager. Every stage closes its write
//! end when done, which its consumer observes as end-of-stream.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use tokio::fs::File;
use tokio::io::duplex;
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::io::SyncIoBridge;

use crate::archive::filter::PathFilter;
use crate::archive::packager::package;
use crate::cloud::retrieval::RetrievalSession;
use crate::cloud::upload::ChunkedUploader;
use crate::cloud::VaultService;
use crate::constants::{CONTENT_EVENT_QUEUE_CAPACITY, PIPE_BUFFER_SIZE};
use crate::crypto::StreamCipher;
use crate::models::{BackupRequest, BackupResult, ContentEvent, UploadOutcome};

/// Run one backup: package, encrypt and upload concurrently, feeding every
/// content event into `sink`.
///
/// The returned result always carries the vault and, when the upload got
/// that far, the session identifier; the first error observed among the
/// stages is surfaced, with upload failures taking precedence since the
/// other stages usually fail as a consequence of a broken pipe.
pub async fn run_backup<F>(
    service: Arc<dyn VaultService>,
    request: &BackupRequest,
    mut sink: F,
) -> BackupResult
where
    F: FnMut(ContentEvent) -> Result<()>,
{
    let filter = match PathFilter::new(&request.exclude_patterns, &request.include_patterns) {
        Ok(filter) => filter,
        Err(e) => return failed(request, e),
    };

    info!(
        "Starting backup of {} root(s) into vault '{}'",
        request.roots.len(),
        request.vault
    );

    let cipher = StreamCipher::new(&request.passphrase);
    let uploader = ChunkedUploader::new(service, &request.vault, request.part_size);

    let (pack_w, pack_r) = duplex(PIPE_BUFFER_SIZE);
    let (cipher_w, cipher_r) = duplex(PIPE_BUFFER_SIZE);
    let (event_tx, mut event_rx) = mpsc::channel(CONTENT_EVENT_QUEUE_CAPACITY);

    // the packager is synchronous; it runs on a blocking thread and writes
    // into the async pipe through a bridge
    let roots = request.roots.clone();
    let bridge = SyncIoBridge::new(pack_w);
    let pack_stage = task::spawn_blocking(move || package(&roots, &filter, bridge, Some(event_tx)));

    let encrypt_stage = cipher.encrypt(pack_r, cipher_w);
    let upload_stage = uploader.upload(cipher_r, &request.description);
    let drain_stage = async {
        let mut first_error = None;
        // keep draining even after a sink error, otherwise a full queue
        // would block the packager forever
        while let Some(event) = event_rx.recv().await {
            if first_error.is_none() {
                if let Err(e) = sink(event) {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    };

    let (pack_result, encrypt_result, upload_result, drain_result) =
        tokio::join!(pack_stage, encrypt_stage, upload_stage, drain_stage);

    let pack_result = match pack_result {
        Ok(result) => result.context("the packaging stage failed"),
        Err(e) => Err(anyhow!("the packaging stage did not finish: {}", e)),
    };

    let (upload_id, outcome, upload_error) = match upload_result {
        Ok((upload_id, outcome)) => (Some(upload_id), outcome, None),
        Err(e) => (e.upload_id, UploadOutcome::default(), Some(e.source)),
    };

    let error = upload_error
        .or_else(|| pack_result.err())
        .or_else(|| encrypt_result.err())
        .or_else(|| drain_result.err().map(|e: anyhow::Error| e.context("the metadata sink failed")));

    match &error {
        None => info!(
            "Backup into vault '{}' finished, {} bytes transmitted",
            request.vault, outcome.total_size
        ),
        Some(e) => warn!("Backup into vault '{}' failed: {:#}", request.vault, e),
    }

    BackupResult {
        vault: request.vault.clone(),
        upload_id,
        outcome,
        error,
    }
}

fn failed(request: &BackupRequest, error: anyhow::Error) -> BackupResult {
    BackupResult {
        vault: request.vault.clone(),
        upload_id: None,
        outcome: UploadOutcome::default(),
        error: Some(error),
    }
}

/// Run one restore: retrieve the archive and decrypt it into `target`,
/// concurrently. Returns the number of plaintext bytes written. A partially
/// written target is removed on failure.
#[allow(clippy::too_many_arguments)]
pub async fn run_restore(
    service: Arc<dyn VaultService>,
    vault: &str,
    archive_id: &str,
    tier: &str,
    poll_interval: Duration,
    passphrase: &str,
    target: &Path,
) -> Result<u64> {
    let cipher = StreamCipher::new(passphrase);
    let session = RetrievalSession::new(service, vault, poll_interval);

    let mut file = File::create(target)
        .await
        .with_context(|| format!("could not create the target file '{}'", target.display()))?;

    let (dl_w, dl_r) = duplex(PIPE_BUFFER_SIZE);
    let download_stage = session.retrieve(archive_id, tier, dl_w);
    let decrypt_stage = cipher.decrypt(dl_r, &mut file);

    let (download_result, decrypt_result) = tokio::join!(download_stage, decrypt_stage);

    match download_result.and(decrypt_result) {
        Ok(written) => {
            file.sync_all()
                .await
                .context("could not flush the restored file")?;
            info!("Restored {} bytes into '{}'", written, target.display());
            Ok(written)
        }
        Err(e) => {
            drop(file);
            if let Err(remove_error) = tokio::fs::remove_file(target).await {
                warn!(
                    "Could not remove the partial file '{}': {}",
                    target.display(),
                    remove_error
                );
            }
            Err(e)
        }
    }
}
