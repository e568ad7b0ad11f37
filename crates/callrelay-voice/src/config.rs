use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_completion_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_completion_timeout_seconds() -> u64 {
    20
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_stt_timeout_seconds() -> u64 {
    20
}

fn default_twilio_api_base() -> String {
    "https://api.twilio.com".to_string()
}

fn default_messaging_timeout_seconds() -> u64 {
    10
}

/// Settings for the language-completion service (OpenAI-compatible).
#[derive(Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    /// Bearer credential. Empty means "not configured": requests fail, startup does not.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_completion_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_completion_model(),
            api_key: String::new(),
            timeout_seconds: default_completion_timeout_seconds(),
        }
    }
}

impl fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redacted(&self.api_key))
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Which speech-to-text implementation transcribes fetched recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttBackend {
    /// OpenAI-compatible `/audio/transcriptions` endpoint.
    #[default]
    Http,
    /// A whisper.cpp-style binary reading audio from stdin.
    Local,
}

/// Settings for speech-to-text.
#[derive(Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default)]
    pub backend: SttBackend,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_stt_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Path to the local binary (`backend = "local"`).
    #[serde(default)]
    pub binary_path: Option<PathBuf>,
    /// Path to the local model file (`backend = "local"`).
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backend: SttBackend::default(),
            base_url: default_openai_base_url(),
            model: default_stt_model(),
            api_key: String::new(),
            timeout_seconds: default_stt_timeout_seconds(),
            binary_path: None,
            model_path: None,
        }
    }
}

impl fmt::Debug for SttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redacted(&self.api_key))
            .field("timeout_seconds", &self.timeout_seconds)
            .field("binary_path", &self.binary_path)
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl SttConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Telephony platform REST credentials, used for text messages and for
/// downloading access-controlled recordings.
#[derive(Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_twilio_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub account_sid: String,
    #[serde(default, skip_serializing)]
    pub auth_token: String,
    /// Sender number for outbound text messages.
    #[serde(default)]
    pub from_number: String,
    #[serde(default = "default_messaging_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            api_base: default_twilio_api_base(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            timeout_seconds: default_messaging_timeout_seconds(),
        }
    }
}

impl fmt::Debug for MessagingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingConfig")
            .field("api_base", &self.api_base)
            .field("account_sid", &self.account_sid)
            .field("auth_token", &redacted(&self.auth_token))
            .field("from_number", &self.from_number)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl MessagingConfig {
    /// Returns `(account_sid, auth_token)` when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.account_sid.is_empty() || self.auth_token.is_empty() {
            None
        } else {
            Some((&self.account_sid, &self.auth_token))
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "[REDACTED]"
    }
}
