use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} timed out after {secs} seconds", secs = .after.as_secs())]
    Timeout {
        service: &'static str,
        after: Duration,
    },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Malformed response from {service}: {detail}")]
    Malformed {
        service: &'static str,
        detail: String,
    },

    #[error("STT error: {0}")]
    Stt(String),
}

impl VoiceError {
    /// Maps a transport error, folding client-side timeouts into [`VoiceError::Timeout`].
    pub(crate) fn from_transport(service: &'static str, after: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { service, after }
        } else {
            Self::Http(err)
        }
    }
}

/// Truncates an error body so a misbehaving upstream cannot flood the logs.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX_ERROR_BODY_CHARS: usize = 512;
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        cut.push_str("...");
        cut
    }
}
