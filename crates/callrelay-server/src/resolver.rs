//! Turns callback data into a transcript.
//!
//! Two sources are supported. With platform transcription the callback carries
//! the text and its status, checked by [`TranscriptionResolver::resolve_inline`].
//! With fetch transcription only a recording URL arrives, and
//! [`TranscriptionResolver::fetch_and_transcribe`] downloads the audio and runs
//! it through speech-to-text. Every failure becomes
//! [`CallError::TranscriptionFailed`]; nothing is retried.

use crate::artifacts::ArtifactStore;
use crate::config::{Config, ConfigError};
use callrelay_types::CallError;
use callrelay_voice::SpeechToText;
use std::sync::Arc;
use std::time::Duration;

/// Platform status for a usable transcript.
const COMPLETED: &str = "completed";

pub struct TranscriptionResolver {
    stt: Arc<dyn SpeechToText>,
    client: reqwest::Client,
    fetch_timeout: Duration,
    max_bytes: usize,
    /// Basic-auth credential for recording downloads, when required.
    credentials: Option<(String, String)>,
    artifacts: Option<ArtifactStore>,
}

impl TranscriptionResolver {
    /// # Errors
    ///
    /// `ConfigError::Invalid` if an HTTP client cannot be built.
    pub fn new(config: &Config, stt: Arc<dyn SpeechToText>) -> Result<Self, ConfigError> {
        let fetch_timeout = config.recording.fetch_timeout();
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("recording fetch client: {e}")))?;
        let artifacts = ArtifactStore::from_config(&config.storage)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let credentials = if config.recording.require_auth {
            config
                .telephony
                .credentials()
                .map(|(sid, token)| (sid.to_string(), token.to_string()))
        } else {
            None
        };

        Ok(Self {
            stt,
            client,
            fetch_timeout,
            max_bytes: config.recording.max_bytes,
            credentials,
            artifacts,
        })
    }

    /// Accepts a platform transcript only when it completed with some text.
    ///
    /// # Errors
    ///
    /// `CallError::TranscriptionFailed` for any other status or blank text.
    pub fn resolve_inline(status: Option<&str>, text: Option<&str>) -> Result<String, CallError> {
        let status = status.unwrap_or_default().trim();
        if !status.eq_ignore_ascii_case(COMPLETED) {
            return Err(CallError::TranscriptionFailed(format!(
                "platform transcription status '{}'",
                status
            )));
        }
        match text.map(str::trim) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(CallError::TranscriptionFailed("empty transcript".into())),
        }
    }

    /// Downloads the recording at `recording_uri` and transcribes it.
    ///
    /// # Errors
    ///
    /// `CallError::TranscriptionFailed` if the download fails, times out or
    /// is too large, or if speech-to-text fails or hears nothing.
    pub async fn fetch_and_transcribe(
        &self,
        call_id: &str,
        caller: &str,
        turn: u32,
        recording_uri: &str,
    ) -> Result<String, CallError> {
        let audio = self.fetch(recording_uri).await?;
        tracing::debug!(call_id, caller, bytes = audio.len(), "recording fetched");

        if let Some(artifacts) = &self.artifacts {
            let artifacts = artifacts.clone();
            let (call_id, caller, audio) = (call_id.to_string(), caller.to_string(), audio.clone());
            tokio::spawn(async move {
                if let Err(e) = artifacts.persist(&caller, &call_id, turn, &audio).await {
                    tracing::warn!(call_id = %call_id, caller = %caller, error = %e, "failed to persist recording");
                }
            });
        }

        let transcript = self
            .stt
            .transcribe(&audio, "audio/wav")
            .await
            .map_err(|e| CallError::TranscriptionFailed(e.to_string()))?;

        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(CallError::TranscriptionFailed(
                "speech-to-text returned no text".into(),
            ));
        }
        Ok(transcript.to_string())
    }

    async fn fetch(&self, recording_uri: &str) -> Result<Vec<u8>, CallError> {
        let mut request = self.client.get(recording_uri);
        if let Some((sid, token)) = &self.credentials {
            request = request.basic_auth(sid, Some(token));
        }

        let mut response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CallError::TranscriptionFailed(format!(
                    "recording fetch timed out after {}s",
                    self.fetch_timeout.as_secs()
                ))
            } else {
                CallError::TranscriptionFailed(format!("recording fetch failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallError::TranscriptionFailed(format!(
                "recording fetch returned {}",
                status
            )));
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(self.oversize());
        }

        let mut audio = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CallError::TranscriptionFailed(format!("recording read failed: {}", e)))?
        {
            if audio.len() + chunk.len() > self.max_bytes {
                return Err(self.oversize());
            }
            audio.extend_from_slice(&chunk);
        }

        if audio.is_empty() {
            return Err(CallError::TranscriptionFailed("recording is empty".into()));
        }
        Ok(audio)
    }

    fn oversize(&self) -> CallError {
        CallError::TranscriptionFailed(format!(
            "recording exceeds {} bytes",
            self.max_bytes
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_requires_completed_status() {
        assert_eq!(
            TranscriptionResolver::resolve_inline(Some("completed"), Some("  What time is it ")),
            Ok("What time is it".to_string())
        );
        assert!(TranscriptionResolver::resolve_inline(Some("failed"), Some("text")).is_err());
        assert!(TranscriptionResolver::resolve_inline(None, Some("text")).is_err());
    }

    #[test]
    fn inline_rejects_blank_text() {
        for text in [None, Some(""), Some("   ")] {
            let err = TranscriptionResolver::resolve_inline(Some("completed"), text).unwrap_err();
            assert!(matches!(err, CallError::TranscriptionFailed(_)));
        }
    }
}
