//! Turns a transcript into the sentence the caller will hear.
//!
//! [`ReplyGenerator::generate`] never fails: an unusable transcript gets the
//! "could not understand" reply, and any completion failure gets the fallback
//! apology. Callers can always advance the session to `READY_TO_SPEAK`.

use callrelay_types::{CallError, FailureStage};
use callrelay_voice::CompletionService;
use std::sync::Arc;
use std::time::Duration;

/// Where a generated reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Completion,
    Fallback,
    Unintelligible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReply {
    pub text: String,
    pub source: ReplySource,
}

pub struct ReplyGenerator {
    service: Arc<dyn CompletionService>,
    timeout: Duration,
    fallback: String,
    unintelligible: String,
}

impl ReplyGenerator {
    pub fn new(
        service: Arc<dyn CompletionService>,
        timeout: Duration,
        fallback: impl Into<String>,
        unintelligible: impl Into<String>,
    ) -> Self {
        Self {
            service,
            timeout,
            fallback: fallback.into(),
            unintelligible: unintelligible.into(),
        }
    }

    pub async fn generate(&self, call_id: &str, caller: &str, transcript: &str) -> GeneratedReply {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            tracing::info!(call_id, caller, "empty transcript, skipping completion");
            return GeneratedReply {
                text: self.unintelligible.clone(),
                source: ReplySource::Unintelligible,
            };
        }

        match self.complete(transcript).await {
            Ok(text) => {
                tracing::info!(call_id, caller, chars = text.len(), "reply generated");
                GeneratedReply {
                    text,
                    source: ReplySource::Completion,
                }
            }
            Err(e) => {
                tracing::warn!(
                    call_id,
                    caller,
                    stage = FailureStage::Completion.as_str(),
                    error = %e,
                    "completion failed, using fallback reply"
                );
                GeneratedReply {
                    text: self.fallback.clone(),
                    source: ReplySource::Fallback,
                }
            }
        }
    }

    async fn complete(&self, transcript: &str) -> Result<String, CallError> {
        let text = tokio::time::timeout(self.timeout, self.service.complete(transcript))
            .await
            .map_err(|_| {
                CallError::CompletionService(format!(
                    "no response within {}s",
                    self.timeout.as_secs_f32()
                ))
            })?
            .map_err(|e| CallError::CompletionService(e.to_string()))?;

        if text.trim().is_empty() {
            return Err(CallError::CompletionService("empty completion".into()));
        }
        Ok(text)
    }
}
