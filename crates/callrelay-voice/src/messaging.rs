use async_trait::async_trait;
use serde::Deserialize;

use crate::config::MessagingConfig;
use crate::error::{truncate_body, VoiceError};

const SERVICE: &str = "messaging service";

/// Outbound text-message delivery.
#[async_trait]
pub trait TextMessenger: Send + Sync {
    /// Sends `body` to `to`, returning the platform's message identifier.
    async fn send(&self, to: &str, body: &str) -> Result<String, VoiceError>;
}

#[derive(Deserialize)]
struct MessageResource {
    sid: String,
}

/// Twilio Programmable Messaging client.
#[derive(Debug, Clone)]
pub struct TwilioMessenger {
    config: MessagingConfig,
    client: reqwest::Client,
}

impl TwilioMessenger {
    /// Creates the client, failing if credentials or the sender number are missing.
    pub fn new(config: MessagingConfig) -> Result<Self, VoiceError> {
        if config.credentials().is_none() {
            return Err(VoiceError::Config(
                "messaging requires account_sid and auth_token".to_string(),
            ));
        }
        if config.from_number.is_empty() {
            return Err(VoiceError::Config(
                "messaging requires a from_number".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl TextMessenger for TwilioMessenger {
    async fn send(&self, to: &str, body: &str) -> Result<String, VoiceError> {
        if to.is_empty() {
            return Err(VoiceError::Config("recipient number is empty".to_string()));
        }

        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Body", body),
        ];

        let response = self
            .client
            .post(self.endpoint())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
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

        let resource: MessageResource =
            response.json().await.map_err(|e| VoiceError::Malformed {
                service: SERVICE,
                detail: e.to_string(),
            })?;
        Ok(resource.sid)
    }
}
