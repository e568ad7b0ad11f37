//! Per-call session state and its transition function.
//!
//! A [`CallSession`] is created when a call first reaches the server and is
//! advanced exclusively through [`CallSession::apply`]. Handlers never assign
//! `status` directly, so a transition that the lifecycle does not allow (for
//! example delivering a reply that was never generated) is rejected with a
//! [`TransitionError`] instead of silently producing a default.
//!
//! ```text
//! AWAITING_RECORDING -> AWAITING_TRANSCRIPT -> AWAITING_REPLY -> READY_TO_SPEAK -> DELIVERED
//!          \__________________________________/        |                 |
//!            (transcript may beat the recording)       |                 |
//!   any non-terminal state ------------------------------------------> FAILED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransitionError;

/// Lifecycle position of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    /// The record prompt has been issued; no audio yet.
    AwaitingRecording,
    /// The platform reported a finished recording; waiting for text.
    AwaitingTranscript,
    /// Transcript is known; the completion service is being consulted.
    AwaitingReply,
    /// A reply (real or fallback) is stored and can be spoken.
    ReadyToSpeak,
    /// The reply has been handed to the caller. Terminal.
    Delivered,
    /// The call could not be completed. Terminal.
    Failed,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingRecording => "AWAITING_RECORDING",
            Self::AwaitingTranscript => "AWAITING_TRANSCRIPT",
            Self::AwaitingReply => "AWAITING_REPLY",
            Self::ReadyToSpeak => "READY_TO_SPEAK",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
        }
    }

    /// Returns `true` for states that accept no further events.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The processing stage at which a call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Recording,
    Transcription,
    Completion,
    Delivery,
    Messaging,
}

impl FailureStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Transcription => "transcription",
            Self::Completion => "completion",
            Self::Delivery => "delivery",
            Self::Messaging => "messaging",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event reported by one of the callback handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// The platform finished recording the caller.
    RecordingCompleted { recording_uri: Option<String> },
    /// Speech-to-text produced the caller's words.
    TranscriptResolved { transcript: String },
    /// The reply text (service output or fallback) is known.
    ReplyGenerated { reply: String },
    /// The reply was spoken or sent.
    Delivered,
    /// Processing stopped at the given stage.
    Failed { stage: FailureStage },
}

impl CallEvent {
    /// Short name used in logs and transition errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RecordingCompleted { .. } => "recording_completed",
            Self::TranscriptResolved { .. } => "transcript_resolved",
            Self::ReplyGenerated { .. } => "reply_generated",
            Self::Delivered => "delivered",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Transient state for one phone call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    /// Platform-supplied call identifier; the correlation key.
    pub call_id: String,
    /// Originating phone number.
    pub caller_number: String,
    pub recording_uri: Option<String>,
    pub transcript: Option<String>,
    reply: Option<String>,
    status: CallStatus,
    /// Stage that failed, set only when `status` is `Failed`.
    failure: Option<FailureStage>,
    /// 1-based question number within the call.
    pub turn: u32,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    /// Creates a session waiting for its first recording.
    pub fn new(call_id: impl Into<String>, caller_number: impl Into<String>) -> Self {
        Self::for_turn(call_id, caller_number, 1)
    }

    /// Creates a session for a follow-up question on an existing call.
    pub fn for_turn(
        call_id: impl Into<String>,
        caller_number: impl Into<String>,
        turn: u32,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            caller_number: caller_number.into(),
            recording_uri: None,
            transcript: None,
            reply: None,
            status: CallStatus::AwaitingRecording,
            failure: None,
            turn: turn.max(1),
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn failure(&self) -> Option<FailureStage> {
        self.failure
    }

    /// The reply, available only once the session is ready to speak it.
    pub fn ready_reply(&self) -> Option<&str> {
        match self.status {
            CallStatus::ReadyToSpeak => self.reply.as_deref(),
            _ => None,
        }
    }

    /// Applies `event`, advancing the status or rejecting the transition.
    ///
    /// On error the session is left untouched.
    pub fn apply(&mut self, event: CallEvent) -> Result<CallStatus, TransitionError> {
        use CallStatus::*;

        if self.status.is_terminal() {
            return Err(self.rejected(&event));
        }

        match (self.status, event) {
            (AwaitingRecording, CallEvent::RecordingCompleted { recording_uri }) => {
                self.recording_uri = recording_uri;
                self.status = AwaitingTranscript;
            }
            (AwaitingRecording | AwaitingTranscript, CallEvent::TranscriptResolved { transcript }) => {
                self.transcript = Some(transcript);
                self.status = AwaitingReply;
            }
            (AwaitingReply, CallEvent::ReplyGenerated { reply }) => {
                self.reply = Some(reply);
                self.status = ReadyToSpeak;
            }
            (ReadyToSpeak, CallEvent::Delivered) => {
                self.status = Delivered;
            }
            (_, CallEvent::Failed { stage }) => {
                self.failure = Some(stage);
                self.status = Failed;
            }
            (_, event) => return Err(self.rejected(&event)),
        }

        Ok(self.status)
    }

    fn rejected(&self, event: &CallEvent) -> TransitionError {
        TransitionError {
            call_id: self.call_id.clone(),
            from: self.status,
            event: event.name(),
        }
    }
}

/// A reply taken out of the store for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub call_id: String,
    pub caller_number: String,
    pub reply: String,
    pub turn: u32,
}
