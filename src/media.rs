//! Large data transfer
//!
//! Media never travels in message payloads. The sender encrypts the file
//! locally, uploads the ciphertext, and ships only the opaque
//! `(mediaId, key)` pair; the receiver downloads the ciphertext and
//! decrypts it straight into the chat's media directory. Ciphertext only
//! ever touches disk inside the scratch directory, wrapped in an RAII guard
//! so it is removed on every exit path.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::ServerApi;
use crate::crypto::{CryptoProvider, EncryptedEnvelope};
use crate::storage::{MediaStore, UploadedMedia};
use crate::{Error, Result};

/// A ciphertext temp file that removes itself when dropped
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    async fn create(scratch_dir: &Path, contents: &[u8]) -> Result<Self> {
        tokio::fs::create_dir_all(scratch_dir).await?;
        let path = scratch_dir.join(format!("{}.bin", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&path, contents).await?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Scratch file {} already gone: {}", self.path.display(), e);
        }
    }
}

/// Encrypt-and-upload / download-and-decrypt for media blobs
#[derive(Clone)]
pub struct MediaTransfer {
    api: Arc<dyn ServerApi>,
    crypto: Arc<dyn CryptoProvider>,
    store: MediaStore,
    scratch_dir: PathBuf,
    media_dir: PathBuf,
}

impl MediaTransfer {
    /// Create a transfer helper bound to the given directories
    pub fn new(
        api: Arc<dyn ServerApi>,
        crypto: Arc<dyn CryptoProvider>,
        store: MediaStore,
        scratch_dir: impl Into<PathBuf>,
        media_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            crypto,
            store,
            scratch_dir: scratch_dir.into(),
            media_dir: media_dir.into(),
        }
    }

    /// Encrypt `source` under a fresh key and upload the ciphertext
    ///
    /// Returns the `(media_id, key)` pair the outgoing payload embeds. The
    /// key is generated per upload and never reused.
    pub async fn upload(
        &self,
        source: &Path,
        content_type: Option<&str>,
    ) -> Result<(String, String)> {
        let plaintext = tokio::fs::read(source).await?;

        let key = self.crypto.random_key();
        let envelope = self.crypto.seal(&key, &plaintext)?;
        let mut ciphertext = Vec::with_capacity(24 + envelope.ciphertext.len());
        ciphertext.extend_from_slice(&envelope.nonce);
        ciphertext.extend_from_slice(&envelope.ciphertext);

        let scratch = ScratchFile::create(&self.scratch_dir, &ciphertext).await?;

        let location = self.api.upload_location().await?;
        let body = tokio::fs::read(scratch.path()).await?;
        self.api.upload(&location, Bytes::from(body)).await?;

        let key_encoded = STANDARD.encode(key);
        self.store
            .save(&UploadedMedia {
                media_id: location.media_id.clone(),
                key: key_encoded.clone(),
                local_path: source.to_string_lossy().to_string(),
                content_type: content_type.map(|s| s.to_string()),
            })
            .await?;

        info!("Uploaded media {}", location.media_id);
        Ok((location.media_id, key_encoded))
    }

    /// Download a blob and decrypt it into the chat's media directory
    pub async fn download(
        &self,
        chat_id: &str,
        media_id: &str,
        key: &str,
        file_name: &str,
    ) -> Result<PathBuf> {
        let url = self.api.download_location(media_id).await?;
        let ciphertext = self.api.download(&url).await?;

        let scratch = ScratchFile::create(&self.scratch_dir, &ciphertext).await?;

        let raw = tokio::fs::read(scratch.path()).await?;
        if raw.len() < 24 + 16 {
            return Err(Error::Crypto(format!(
                "Downloaded ciphertext too short: {} bytes",
                raw.len()
            )));
        }
        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(&raw[..24]);
        let envelope = EncryptedEnvelope {
            nonce,
            ciphertext: raw[24..].to_vec(),
        };

        let key = decode_key(key)?;
        let plaintext = self.crypto.open(&key, &envelope)?;

        let chat_dir = self.media_dir.join(chat_id);
        tokio::fs::create_dir_all(&chat_dir).await?;
        let destination = chat_dir.join(file_name);
        tokio::fs::write(&destination, plaintext).await?;

        info!("Downloaded media {} to {}", media_id, destination.display());
        Ok(destination)
    }

    /// Move a file into the chat's media directory before upload, returning
    /// its new path
    pub async fn adopt_into_chat_dir(&self, chat_id: &str, source: &Path) -> Result<PathBuf> {
        let chat_dir = self.media_dir.join(chat_id);
        tokio::fs::create_dir_all(&chat_dir).await?;

        let file_name = source
            .file_name()
            .ok_or_else(|| Error::Validation(format!("no file name in {}", source.display())))?;
        let destination = chat_dir.join(file_name);
        if destination != source {
            tokio::fs::copy(source, &destination).await?;
            if let Err(e) = tokio::fs::remove_file(source).await {
                debug!("Source file not removed after adoption: {}", e);
            }
        }
        Ok(destination)
    }
}

fn decode_key(key: &str) -> Result<[u8; 32]> {
    let raw = STANDARD
        .decode(key)
        .map_err(|e| Error::Crypto(format!("Invalid media key encoding: {}", e)))?;
    raw.as_slice()
        .try_into()
        .map_err(|_| Error::Crypto(format!("Invalid media key length: {}", raw.len())))
}
