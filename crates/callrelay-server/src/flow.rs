//! Builders for every document a call can receive.
//!
//! Handlers decide *which* step a call is at; [`CallFlow`] decides what that
//! step sounds like and where its callbacks point.

use crate::config::{
    Config, ContinuationConfig, DispatchStrategy, PromptConfig, RecordingConfig,
    TranscriptionMode,
};
use crate::twiml::{Gather, Record, Say, VoiceResponse};
use callrelay_types::{CallError, FailureStage, ReplyRecord};

pub const PATH_VOICE: &str = "/voice";
pub const PATH_PROCESS: &str = "/process";
pub const PATH_TRANSCRIPTION: &str = "/transcription";
pub const PATH_WAIT: &str = "/wait-for-processing";
pub const PATH_ADDITIONAL_INPUT: &str = "/handle-additional-input";

/// Call-flow settings resolved once from [`Config`].
#[derive(Debug, Clone)]
pub struct CallFlow {
    public_url: String,
    pub strategy: DispatchStrategy,
    pub transcription: TranscriptionMode,
    pub prompts: PromptConfig,
    recording: RecordingConfig,
    continuation: ContinuationConfig,
    pub max_wait_polls: u32,
    wait_pause_seconds: u32,
    hold_pause_seconds: u32,
}

impl CallFlow {
    pub fn from_config(config: &Config) -> Self {
        Self {
            public_url: config.server.public_url.trim_end_matches('/').to_string(),
            strategy: config.dispatch.strategy,
            transcription: config.dispatch.transcription,
            prompts: config.prompts.clone(),
            recording: config.recording.clone(),
            continuation: config.continuation.clone(),
            max_wait_polls: config.dispatch.max_wait_polls,
            wait_pause_seconds: config.dispatch.wait_pause_seconds,
            hold_pause_seconds: config.dispatch.hold_pause_seconds,
        }
    }

    /// Joins `path_and_query` onto the public base URL; stays relative when
    /// no base URL is configured.
    pub fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.public_url, path_and_query)
    }

    fn voice(&self) -> Option<&str> {
        Some(self.prompts.voice.as_str())
    }

    /// Speaks `prompt`, then records the caller.
    pub fn record_prompt(&self, prompt: &str) -> VoiceResponse {
        let transcribe_callback = match self.transcription {
            TranscriptionMode::Platform => Some(self.url(PATH_TRANSCRIPTION)),
            TranscriptionMode::Fetch => None,
        };
        VoiceResponse::new().say(prompt, self.voice()).record(Record {
            action: self.url(PATH_PROCESS),
            max_length: self.recording.max_length(),
            finish_on_key: self.recording.finish_on_key.clone(),
            timeout: self.recording.silence_timeout_seconds,
            transcribe_callback,
        })
    }

    pub fn greeting(&self) -> VoiceResponse {
        self.record_prompt(&self.prompts.greeting)
    }

    pub fn next_question(&self) -> VoiceResponse {
        self.record_prompt(&self.prompts.next_question)
    }

    /// Keeps the caller on the line and sends them to the wait loop.
    pub fn hold(&self, call_id: &str) -> VoiceResponse {
        VoiceResponse::new()
            .say(&self.prompts.hold, self.voice())
            .pause(self.hold_pause_seconds)
            .redirect(self.wait_url(call_id, 1))
    }

    /// One more round of the wait loop; `attempt` is the next poll number.
    pub fn still_processing(&self, call_id: &str, attempt: u32) -> VoiceResponse {
        VoiceResponse::new()
            .say(&self.prompts.still_processing, self.voice())
            .pause(self.wait_pause_seconds)
            .redirect(self.wait_url(call_id, attempt))
    }

    pub fn wait_url(&self, call_id: &str, attempt: u32) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("attempt", &attempt.to_string())
            .append_pair("call_id", call_id)
            .finish();
        self.url(&format!("{}?{}", PATH_WAIT, query))
    }

    /// Speaks a delivered reply, then offers another question or hangs up.
    pub fn speak_reply(&self, record: &ReplyRecord) -> VoiceResponse {
        let mut doc = VoiceResponse::new()
            .say(&record.reply, self.voice())
            .pause(1);

        if self.can_continue(record.turn) {
            doc = doc.say(&self.prompts.follow_up, self.voice()).gather(Gather {
                action: self.url(&format!("{}?turn={}", PATH_ADDITIONAL_INPUT, record.turn)),
                num_digits: 1,
                timeout: self.continuation.gather_timeout_seconds,
                prompt: Some(Say {
                    text: self.prompts.continuation_menu.clone(),
                    voice: self.voice().map(str::to_string),
                }),
            });
        }

        doc.say(&self.prompts.goodbye, self.voice()).hangup()
    }

    /// Whether a caller on `turn` may ask another question.
    pub fn can_continue(&self, turn: u32) -> bool {
        self.continuation.enabled && turn < self.continuation.max_turns
    }

    pub fn apology(&self, error: &CallError) -> VoiceResponse {
        self.apology_for_stage(Some(error.stage()))
    }

    pub fn apology_for_stage(&self, stage: Option<FailureStage>) -> VoiceResponse {
        let text = match stage {
            Some(FailureStage::Recording) => &self.prompts.recording_unavailable,
            Some(FailureStage::Transcription) => &self.prompts.transcription_failed,
            Some(FailureStage::Delivery) => &self.prompts.delivery_timeout,
            Some(FailureStage::Completion | FailureStage::Messaging) | None => {
                &self.prompts.generic_apology
            }
        };
        VoiceResponse::new().say(text, self.voice()).hangup()
    }

    /// Closes a call whose reply will arrive by text message.
    pub fn acknowledge(&self) -> VoiceResponse {
        VoiceResponse::new()
            .say(&self.prompts.text_acknowledgement, self.voice())
            .hangup()
    }

    pub fn farewell(&self) -> VoiceResponse {
        VoiceResponse::new()
            .say(&self.prompts.farewell, self.voice())
            .hangup()
    }

    pub fn turn_limit(&self) -> VoiceResponse {
        VoiceResponse::new()
            .say(&self.prompts.turn_limit, self.voice())
            .hangup()
    }

    pub fn text_body(&self, reply: &str) -> String {
        format!("{}{}", self.prompts.text_prefix, reply)
    }
}
