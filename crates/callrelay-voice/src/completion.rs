use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::error::{truncate_body, VoiceError};

const SERVICE: &str = "completion service";

/// A language-completion backend.
///
/// Implementations receive the caller's transcript as the only prompt content
/// and return the generated reply. No conversation history is carried.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, VoiceError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    config: CompletionConfig,
    client: reqwest::Client,
}

impl OpenAiCompletion {
    /// # Errors
    ///
    /// `VoiceError::Http` if the HTTP client cannot be built.
    pub fn new(config: CompletionConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { config, client })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, VoiceError> {
        if !self.is_configured() {
            return Err(VoiceError::Config(
                "completion api key is not set".to_string(),
            ));
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoiceError::from_transport(SERVICE, self.timeout(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                VoiceError::Timeout {
                    service: SERVICE,
                    after: self.timeout(),
                }
            } else {
                VoiceError::Malformed {
                    service: SERVICE,
                    detail: e.to_string(),
                }
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| VoiceError::Malformed {
                service: SERVICE,
                detail: "response contained no message content".to_string(),
            })?;

        tracing::debug!(model = %self.config.model, chars = content.len(), "completion received");
        Ok(content)
    }
}
