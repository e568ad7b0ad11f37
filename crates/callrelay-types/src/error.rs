use thiserror::Error;

use crate::session::{CallStatus, FailureStage};

/// A lifecycle event arrived in a state that does not accept it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("call {call_id}: event '{event}' is not allowed in status {from}")]
pub struct TransitionError {
    pub call_id: String,
    pub from: CallStatus,
    pub event: &'static str,
}

/// Reasons a call could not follow the normal record → reply → speak path.
///
/// Every variant is absorbed at the handler boundary: the caller hears a
/// spoken sentence and the error itself is only logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The recording callback carried no recording reference.
    #[error("no recording reference in callback")]
    RecordingUnavailable,

    /// Speech-to-text failed, or the audio could not be fetched.
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// The completion service failed; recovered with a fallback reply.
    #[error("completion service error: {0}")]
    CompletionService(String),

    /// The live call leg gave up waiting for the reply.
    #[error("reply not ready after {attempts} polls")]
    DeliveryRace { attempts: u32 },

    /// Sending the reply as a text message failed.
    #[error("text message delivery failed: {0}")]
    Messaging(String),
}

impl CallError {
    /// The lifecycle stage this error is recorded against.
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::RecordingUnavailable => FailureStage::Recording,
            Self::TranscriptionFailed(_) => FailureStage::Transcription,
            Self::CompletionService(_) => FailureStage::Completion,
            Self::DeliveryRace { .. } => FailureStage::Delivery,
            Self::Messaging(_) => FailureStage::Messaging,
        }
    }
}
