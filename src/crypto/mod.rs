//! Streaming encryption of the package stream.
//!
//! The cipher key is derived from the user's passphrase with SHA-256, so the
//! same passphrase always yields the same key. Each encryption run draws a
//! fresh random IV and writes it as a plaintext header ahead of the
//! ciphertext; decryption reads the header back before processing data. AES
//! in CTR mode keeps the ciphertext exactly as long as the plaintext (plus
//! the IV header), which the uploader relies on for size accounting.

use anyhow::{anyhow, bail, Context, Result};
use openssl::rand::rand_bytes;
use openssl::symm::{Cipher, Crypter, Mode};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{CIPHER_CHUNK_SIZE, CIPHER_IV_LEN};

/// Symmetric stream cipher bound to one passphrase-derived key.
pub struct StreamCipher {
    key: [u8; 32],
}

impl StreamCipher {
    /// Derive the cipher key from a passphrase.
    pub fn new(passphrase: &str) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(passphrase.as_bytes()));
        StreamCipher { key }
    }

    /// Encrypt everything from `src` into `dst` and return the number of
    /// bytes written, IV header included.
    ///
    /// The destination is flushed but not shut down; the caller owns the
    /// write end and decides when it closes.
    pub async fn encrypt<R, W>(&self, mut src: R, mut dst: W) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut iv = [0u8; CIPHER_IV_LEN];
        rand_bytes(&mut iv).context("could not generate a random IV")?;
        dst.write_all(&iv)
            .await
            .context("could not write the IV header")?;

        let written = self
            .process(Mode::Encrypt, &iv, &mut src, &mut dst)
            .await
            .context("encryption failed")?;
        dst.flush().await.context("could not flush the ciphertext")?;

        Ok(written + CIPHER_IV_LEN as u64)
    }

    /// Decrypt everything from `src` into `dst` and return the number of
    /// plaintext bytes written.
    ///
    /// Fails when the stream is shorter than the IV header.
    pub async fn decrypt<R, W>(&self, mut src: R, mut dst: W) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut iv = [0u8; CIPHER_IV_LEN];
        src.read_exact(&mut iv)
            .await
            .map_err(|e| anyhow!("the stream is too short to carry an IV header: {}", e))?;

        let written = self
            .process(Mode::Decrypt, &iv, &mut src, &mut dst)
            .await
            .context("decryption failed")?;
        dst.flush().await.context("could not flush the plaintext")?;

        Ok(written)
    }

    /// Pump `src` through an AES-256-CTR crypter into `dst` in fixed-size
    /// chunks, returning the number of output bytes.
    async fn process<R, W>(&self, mode: Mode, iv: &[u8], src: &mut R, dst: &mut W) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let cipher = Cipher::aes_256_ctr();
        let mut crypter = Crypter::new(cipher, mode, &self.key, Some(iv))
            .context("could not initialize the cipher")?;

        let mut buf = vec![0u8; CIPHER_CHUNK_SIZE];
        let mut out = vec![0u8; CIPHER_CHUNK_SIZE + cipher.block_size()];
        let mut written: u64 = 0;

        loop {
            let n = src.read(&mut buf).await.context("could not read the stream")?;
            if n == 0 {
                break;
            }
            let produced = crypter
                .update(&buf[..n], &mut out)
                .context("cipher update failed")?;
            dst.write_all(&out[..produced])
                .await
                .context("could not write the stream")?;
            written += produced as u64;
        }

        let produced = crypter.finalize(&mut out).context("cipher finalize failed")?;
        if produced > 0 {
            dst.write_all(&out[..produced])
                .await
                .context("could not write the stream")?;
            written += produced as u64;
        }

        Ok(written)
    }
}

/// Reject an empty passphrase up front instead of producing an archive
/// anyone can open.
pub fn validate_passphrase(passphrase: &str) -> Result<()> {
    if passphrase.is_empty() {
        bail!("the passphrase must not be empty");
    }
    Ok(())
}
