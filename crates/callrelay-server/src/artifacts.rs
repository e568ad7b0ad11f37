//! Write-once persistence of fetched recordings.
//!
//! Audio is staged under `{dir}/{caller}/{call_id}.wav` (later turns of the
//! same call get a `-turn{N}` suffix) and optionally uploaded to object
//! storage. Nothing here is on the request path: callers spawn
//! [`ArtifactStore::persist`] and only log its outcome.

use crate::config::StorageConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact upload failed: {0}")]
    Upload(String),

    #[error("artifact upload client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Where a persisted recording ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Local staging path; `None` once removed after upload.
    pub path: Option<PathBuf>,
    pub uploaded_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    upload_url: Option<String>,
    upload_token: String,
    delete_after_upload: bool,
    client: reqwest::Client,
}

impl ArtifactStore {
    /// Returns `None` when persistence is disabled.
    ///
    /// # Errors
    ///
    /// `ArtifactError::Client` if the upload client cannot be built.
    pub fn from_config(config: &StorageConfig) -> Result<Option<Self>, ArtifactError> {
        if !config.enabled {
            return Ok(None);
        }
        let client = reqwest::Client::builder().timeout(UPLOAD_TIMEOUT).build()?;
        Ok(Some(Self {
            dir: PathBuf::from(&config.dir),
            upload_url: config
                .upload_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            upload_token: config.upload_token.clone(),
            delete_after_upload: config.delete_after_upload,
            client,
        }))
    }

    /// Relative key for a recording, shared by the local path and upload URL.
    pub fn key(caller: &str, call_id: &str, turn: u32) -> String {
        let caller = match sanitize(caller) {
            s if s.is_empty() => "unknown".to_string(),
            s => s,
        };
        let call_id = sanitize(call_id);
        if turn > 1 {
            format!("{caller}/{call_id}-turn{turn}.wav")
        } else {
            format!("{caller}/{call_id}.wav")
        }
    }

    pub fn path_for(&self, caller: &str, call_id: &str, turn: u32) -> PathBuf {
        self.dir.join(Self::key(caller, call_id, turn))
    }

    /// Writes `audio` once, then uploads it if an upload URL is configured.
    ///
    /// # Errors
    ///
    /// `ArtifactError::AlreadyExists` if the recording was already written,
    /// `Io` on filesystem failures, `Upload` when the PUT fails (the local
    /// copy is kept in that case).
    pub async fn persist(
        &self,
        caller: &str,
        call_id: &str,
        turn: u32,
        audio: &[u8],
    ) -> Result<StoredArtifact, ArtifactError> {
        let key = Self::key(caller, call_id, turn);
        let path = self.dir.join(&key);
        write_once(&path, audio).await?;
        tracing::debug!(call_id, path = %path.display(), bytes = audio.len(), "recording staged");

        let Some(base) = &self.upload_url else {
            return Ok(StoredArtifact {
                path: Some(path),
                uploaded_to: None,
            });
        };

        let target = format!("{}/{}", base, key);
        self.upload(&target, audio).await?;
        tracing::info!(call_id, target = %target, "recording uploaded");

        let path = if self.delete_after_upload {
            tokio::fs::remove_file(&path).await?;
            None
        } else {
            Some(path)
        };
        Ok(StoredArtifact {
            path,
            uploaded_to: Some(target),
        })
    }

    async fn upload(&self, target: &str, audio: &[u8]) -> Result<(), ArtifactError> {
        let mut request = self
            .client
            .put(target)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(audio.to_vec());
        if !self.upload_token.is_empty() {
            request = request.bearer_auth(&self.upload_token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ArtifactError::Upload(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ArtifactError::Upload(format!(
                "storage returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

async fn write_once(path: &Path, audio: &[u8]) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => ArtifactError::AlreadyExists(path.to_path_buf()),
            _ => ArtifactError::Io(e),
        })?;
    file.write_all(audio).await?;
    file.flush().await?;
    Ok(())
}

/// Keeps characters that are safe in a single path segment.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_'))
        .collect()
}
