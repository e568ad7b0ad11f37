use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::{SttBackend, SttConfig};
use crate::error::{truncate_body, VoiceError};

const SERVICE: &str = "speech-to-text service";

/// Maximum audio input size for STT (10 MiB). A 60 second telephone
/// recording is well under 1 MiB.
pub const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// A speech-to-text backend.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribes `audio`, returning the recognised text (possibly empty).
    async fn transcribe(&self, audio: &[u8], content_type: &str) -> Result<String, VoiceError>;
}

/// Builds the backend selected by `config.backend`.
pub fn from_config(config: &SttConfig) -> Result<Box<dyn SpeechToText>, VoiceError> {
    match config.backend {
        SttBackend::Http => Ok(Box::new(HttpSpeechToText::new(config.clone())?)),
        SttBackend::Local => {
            let binary = config.binary_path.clone().ok_or_else(|| {
                VoiceError::Config("stt.binary_path is required for the local backend".into())
            })?;
            let model = config.model_path.clone().ok_or_else(|| {
                VoiceError::Config("stt.model_path is required for the local backend".into())
            })?;
            Ok(Box::new(
                LocalWhisper::new(model, binary).with_timeout(config.timeout()),
            ))
        }
    }
}

fn check_input_size(audio: &[u8]) -> Result<(), VoiceError> {
    if audio.len() > MAX_STT_INPUT_BYTES {
        return Err(VoiceError::Stt(format!(
            "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
            audio.len(),
            MAX_STT_INPUT_BYTES
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for an OpenAI-compatible `/audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct HttpSpeechToText {
    config: SttConfig,
    client: reqwest::Client,
}

impl HttpSpeechToText {
    pub fn new(config: SttConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(&self, audio: &[u8], content_type: &str) -> Result<String, VoiceError> {
        check_input_size(audio)?;
        if self.config.api_key.is_empty() {
            return Err(VoiceError::Config("stt api key is not set".to_string()));
        }

        let file = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("recording.wav")
            .mime_str(content_type)?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.config.model.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::from_transport(SERVICE, self.config.timeout(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: TranscriptionResponse =
            response.json().await.map_err(|e| VoiceError::Malformed {
                service: SERVICE,
                detail: e.to_string(),
            })?;
        Ok(parsed.text.trim().to_string())
    }
}

/// Runs a whisper.cpp-compatible binary, writing audio to stdin and reading
/// the transcript from stdout.
#[derive(Debug, Clone)]
pub struct LocalWhisper {
    model_path: PathBuf,
    binary_path: PathBuf,
    timeout: Duration,
}

impl LocalWhisper {
    pub fn new(model_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SpeechToText for LocalWhisper {
    async fn transcribe(&self, audio: &[u8], _content_type: &str) -> Result<String, VoiceError> {
        check_input_size(audio)?;

        let mut command = Command::new(&self.binary_path);
        // -m <model>, -f - (stdin), -nt (no timestamps)
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg("-")
            .arg("-nt")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Stt(format!("Failed to spawn STT binary: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Stt("Failed to open stdin".to_string()))?;

        // Written from a separate task so a full stdout pipe cannot deadlock us.
        let input = audio.to_vec();
        let write_task = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout {
                service: SERVICE,
                after: self.timeout,
            })?
            .map_err(|e| VoiceError::Stt(format!("Failed to read stdout: {}", e)))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "STT binary closed stdin early");
            }
            Err(e) => {
                return Err(VoiceError::Stt(format!("stdin writer task failed: {}", e)));
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!(
                "STT binary failed: {}",
                truncate_body(&stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
