//! Server configuration loading from file and environment variables.

use callrelay_voice::{CompletionConfig, MessagingConfig, SttBackend, SttConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Longest recording the platform is asked to capture, in seconds.
pub const MAX_RECORDING_SECONDS: u32 = 60;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub continuation: ContinuationConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub stt: SttConfig,
    /// Telephony platform REST credentials (recording download, text messages).
    #[serde(default)]
    pub telephony: MessagingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL the platform uses to reach this server. Callback
    /// targets are joined onto it; when empty, relative paths are emitted.
    #[serde(default)]
    pub public_url: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "callrelay_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Correlation store lifetime settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Seconds after creation at which an undelivered session is evicted.
    #[serde(default = "default_session_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Seconds between background sweeps of expired sessions.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

/// How the reply finds its way back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    /// The handler that resolves the transcript speaks the reply itself.
    SameResponse,
    /// The reply is stored; the live call leg polls until it can speak it.
    #[default]
    StoreAndRedirect,
    /// The reply is sent as a text message and the call is ended.
    TextMessage,
}

/// Where transcript text comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionMode {
    /// The platform transcribes and posts text to the transcript callback.
    #[default]
    Platform,
    /// The server downloads the recording and runs speech-to-text itself.
    Fetch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub strategy: DispatchStrategy,
    #[serde(default)]
    pub transcription: TranscriptionMode,
    /// Polls of the wait loop before the call gives up on its reply.
    #[serde(default = "default_max_wait_polls")]
    pub max_wait_polls: u32,
    /// Pause inside each wait-loop iteration, in seconds.
    #[serde(default = "default_wait_pause_seconds")]
    pub wait_pause_seconds: u32,
    /// Pause after the "please hold" message, in seconds.
    #[serde(default = "default_hold_pause_seconds")]
    pub hold_pause_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    /// Maximum recording length; values above 60 are clamped.
    #[serde(default = "default_max_length_seconds")]
    pub max_length_seconds: u32,
    #[serde(default = "default_finish_on_key")]
    pub finish_on_key: String,
    /// Seconds of silence that end the recording.
    #[serde(default = "default_silence_timeout_seconds")]
    pub silence_timeout_seconds: u32,
    /// Download recordings with the telephony credentials. Disable when
    /// recordings are publicly fetchable.
    #[serde(default = "default_true")]
    pub require_auth: bool,
    #[serde(default = "default_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,
    /// Largest recording body accepted from the platform.
    #[serde(default = "default_max_recording_bytes")]
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContinuationConfig {
    /// Offer "press 1 to ask another question" after a spoken reply.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Questions allowed per call, including the first.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_gather_timeout_seconds")]
    pub gather_timeout_seconds: u32,
}

/// Everything the caller hears.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Voice attribute for spoken replies; empty leaves it to the platform.
    pub voice: String,
    pub greeting: String,
    pub next_question: String,
    pub hold: String,
    pub still_processing: String,
    pub follow_up: String,
    pub continuation_menu: String,
    pub goodbye: String,
    pub farewell: String,
    pub turn_limit: String,
    pub text_acknowledgement: String,
    pub text_prefix: String,
    pub unintelligible: String,
    pub completion_fallback: String,
    pub recording_unavailable: String,
    pub transcription_failed: String,
    pub delivery_timeout: String,
    pub generic_apology: String,
}

/// Optional persistence of fetched recordings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_storage_dir")]
    pub dir: String,
    /// Object storage prefix; each artifact is PUT below it.
    #[serde(default)]
    pub upload_url: Option<String>,
    /// Bearer credential for the upload. Environment only.
    #[serde(skip)]
    pub upload_token: String,
    /// Remove the local staging copy once uploaded.
    #[serde(default = "default_true")]
    pub delete_after_upload: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_session_ttl_seconds() -> u64 {
    300
}

fn default_sweep_interval_seconds() -> u64 {
    30
}

fn default_max_wait_polls() -> u32 {
    12
}

fn default_wait_pause_seconds() -> u32 {
    5
}

fn default_hold_pause_seconds() -> u32 {
    3
}

fn default_max_length_seconds() -> u32 {
    MAX_RECORDING_SECONDS
}

fn default_finish_on_key() -> String {
    "#".to_string()
}

fn default_silence_timeout_seconds() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout_seconds() -> u64 {
    15
}

fn default_max_recording_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_max_turns() -> u32 {
    3
}

fn default_gather_timeout_seconds() -> u32 {
    5
}

fn default_storage_dir() -> String {
    "recordings".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strategy: DispatchStrategy::default(),
            transcription: TranscriptionMode::default(),
            max_wait_polls: default_max_wait_polls(),
            wait_pause_seconds: default_wait_pause_seconds(),
            hold_pause_seconds: default_hold_pause_seconds(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_length_seconds: default_max_length_seconds(),
            finish_on_key: default_finish_on_key(),
            silence_timeout_seconds: default_silence_timeout_seconds(),
            require_auth: true,
            fetch_timeout_seconds: default_fetch_timeout_seconds(),
            max_bytes: default_max_recording_bytes(),
        }
    }
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_turns: default_max_turns(),
            gather_timeout_seconds: default_gather_timeout_seconds(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            voice: "alice".to_string(),
            greeting: "Please leave a message after the beep. Press pound when done.".to_string(),
            next_question: "Please leave your next question after the beep. Press pound when done."
                .to_string(),
            hold: "Thank you for your message. Please hold while I process your request."
                .to_string(),
            still_processing: "Still processing your request.".to_string(),
            follow_up: "Is there anything else you would like to ask?".to_string(),
            continuation_menu: "Press 1 to ask another question, or press 2 to end the call."
                .to_string(),
            goodbye: "Thank you for calling. Goodbye.".to_string(),
            farewell: "Thank you for calling. Have a great day!".to_string(),
            turn_limit: "You have reached the maximum number of questions for this call. Goodbye."
                .to_string(),
            text_acknowledgement:
                "Thank you. We are processing your message and will text you the answer."
                    .to_string(),
            text_prefix: "Response to your message: ".to_string(),
            unintelligible: "I'm sorry, I could not understand your message.".to_string(),
            completion_fallback:
                "I'm sorry, I'm having trouble answering right now. Please try again later."
                    .to_string(),
            recording_unavailable: "Sorry, I did not receive a recording. Goodbye.".to_string(),
            transcription_failed:
                "Sorry, I could not understand your message. Please try again later. Goodbye."
                    .to_string(),
            delivery_timeout:
                "Sorry, this is taking longer than expected. Please call back later. Goodbye."
                    .to_string(),
            generic_apology:
                "Sorry, something went wrong while processing your message. Goodbye.".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_storage_dir(),
            upload_url: None,
            upload_token: String::new(),
            delete_after_upload: true,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl RecordingConfig {
    /// Recording length sent to the platform, never above 60 seconds.
    pub fn max_length(&self) -> u32 {
        self.max_length_seconds.clamp(1, MAX_RECORDING_SECONDS)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but cannot run.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Rejects combinations that would fail on every call.
    ///
    /// A missing completion credential is deliberately not an error: each
    /// request then falls back to the apology reply.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "session.ttl_seconds must be greater than zero".into(),
            ));
        }
        if self.dispatch.max_wait_polls == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_wait_polls must be greater than zero".into(),
            ));
        }
        if self.continuation.max_turns == 0 {
            return Err(ConfigError::Invalid(
                "continuation.max_turns must be greater than zero".into(),
            ));
        }
        if !self.server.public_url.is_empty() && url::Url::parse(&self.server.public_url).is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "server.public_url is not a valid URL: {}",
                self.server.public_url
            )));
        }

        if self.dispatch.strategy == DispatchStrategy::TextMessage
            && (self.telephony.credentials().is_none() || self.telephony.from_number.is_empty())
        {
            return Err(ConfigError::Invalid(
                "dispatch.strategy = \"text_message\" needs telephony.account_sid, \
                 telephony.auth_token and telephony.from_number"
                    .into(),
            ));
        }

        if self.dispatch.transcription == TranscriptionMode::Fetch {
            if self.recording.require_auth && self.telephony.credentials().is_none() {
                return Err(ConfigError::Invalid(
                    "recording.require_auth needs telephony.account_sid and telephony.auth_token"
                        .into(),
                ));
            }
            if self.stt.backend == SttBackend::Local
                && (self.stt.binary_path.is_none() || self.stt.model_path.is_none())
            {
                return Err(ConfigError::Invalid(
                    "stt.backend = \"local\" needs stt.binary_path and stt.model_path".into(),
                ));
            }
        }

        if self.storage.enabled {
            if let Some(upload_url) = &self.storage.upload_url {
                if url::Url::parse(upload_url).is_err() {
                    return Err(ConfigError::Invalid(format!(
                        "storage.upload_url is not a valid URL: {}",
                        upload_url
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CALLRELAY_HOST` overrides `server.host`
/// - `CALLRELAY_PORT` (or `PORT`) overrides `server.port`
/// - `CALLRELAY_PUBLIC_URL` (or `BASE_URL`) overrides `server.public_url`
/// - `CALLRELAY_LOG_LEVEL` overrides `logging.level`
/// - `CALLRELAY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CALLRELAY_DISPATCH` overrides `dispatch.strategy`
/// - `OPENAI_API_KEY` sets `completion.api_key`
/// - `STT_API_KEY` sets `stt.api_key` (defaults to `OPENAI_API_KEY`)
/// - `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_PHONE_NUMBER` set `telephony.*`
/// - `OBJECT_STORAGE_TOKEN` sets `storage.upload_token`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies environment overrides read through `var`.
///
/// Split out from [`load_config`] so tests can supply variables without
/// touching the process environment.
pub fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| var(key).filter(|value| !value.trim().is_empty());

    if let Some(host) = non_empty("CALLRELAY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = non_empty("CALLRELAY_PORT").or_else(|| non_empty("PORT")) {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = non_empty("CALLRELAY_PUBLIC_URL").or_else(|| non_empty("BASE_URL")) {
        config.server.public_url = url;
    }
    if let Some(level) = non_empty("CALLRELAY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = non_empty("CALLRELAY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(strategy) = non_empty("CALLRELAY_DISPATCH") {
        match strategy.as_str() {
            "same_response" => config.dispatch.strategy = DispatchStrategy::SameResponse,
            "store_and_redirect" => config.dispatch.strategy = DispatchStrategy::StoreAndRedirect,
            "text_message" => config.dispatch.strategy = DispatchStrategy::TextMessage,
            other => tracing::warn!(value = other, "ignoring unknown CALLRELAY_DISPATCH"),
        }
    }

    if let Some(key) = non_empty("OPENAI_API_KEY") {
        config.completion.api_key = key;
    }
    if let Some(key) = non_empty("STT_API_KEY") {
        config.stt.api_key = key;
    } else if config.stt.api_key.is_empty() {
        config.stt.api_key = config.completion.api_key.clone();
    }
    if let Some(sid) = non_empty("TWILIO_ACCOUNT_SID") {
        config.telephony.account_sid = sid;
    }
    if let Some(token) = non_empty("TWILIO_AUTH_TOKEN") {
        config.telephony.auth_token = token;
    }
    if let Some(number) = non_empty("TWILIO_PHONE_NUMBER") {
        config.telephony.from_number = number;
    }
    if let Some(token) = non_empty("OBJECT_STORAGE_TOKEN") {
        config.storage.upload_token = token;
    }
}
