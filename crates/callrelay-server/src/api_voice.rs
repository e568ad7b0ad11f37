//! Telephony webhook handlers.
//!
//! Every handler answers `200 text/xml`, whatever the input. Form data that
//! fails to parse is treated as empty rather than rejected.

use crate::config::DispatchStrategy;
use crate::dispatch::{self, ResponseTarget};
use crate::store::StoreError;
use crate::twiml::VoiceResponse;
use crate::AppState;
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Extension, Form, Path, Query};
use callrelay_types::{CallError, CallEvent, CallSession};
use serde::Deserialize;
use std::sync::Arc;

/// Fields the platform posts to callbacks. All optional: which ones are
/// present depends on the callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackForm {
    #[serde(rename = "CallSid", default)]
    pub call_sid: Option<String>,
    #[serde(rename = "From", default)]
    pub from: Option<String>,
    #[serde(rename = "RecordingUrl", default)]
    pub recording_url: Option<String>,
    #[serde(rename = "RecordingSid", default)]
    pub recording_sid: Option<String>,
    #[serde(rename = "TranscriptionText", default)]
    pub transcription_text: Option<String>,
    #[serde(rename = "TranscriptionStatus", default)]
    pub transcription_status: Option<String>,
    #[serde(rename = "Digits", default)]
    pub digits: Option<String>,
}

impl CallbackForm {
    fn from_extracted(form: Result<Form<CallbackForm>, FormRejection>) -> Self {
        match form {
            Ok(Form(form)) => form,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable callback form, treating as empty");
                Self::default()
            }
        }
    }

    fn call_id(&self) -> Option<&str> {
        non_blank(self.call_sid.as_deref())
    }

    fn caller(&self) -> &str {
        non_blank(self.from.as_deref()).unwrap_or_default()
    }

    fn has_inline_transcript(&self) -> bool {
        self.transcription_status.is_some() || self.transcription_text.is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WaitQuery {
    #[serde(default)]
    pub attempt: Option<u32>,
    #[serde(default)]
    pub call_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeakQuery {
    #[serde(default)]
    pub call_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TurnQuery {
    #[serde(default)]
    pub turn: Option<u32>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn query_or_default<T: Default>(query: Result<Query<T>, QueryRejection>) -> T {
    match query {
        Ok(Query(query)) => query,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable query string, using defaults");
            T::default()
        }
    }
}

/// Handler for `GET|POST /voice`: greets the caller and starts recording.
pub async fn voice_handler(
    Extension(state): Extension<Arc<AppState>>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> VoiceResponse {
    let form = CallbackForm::from_extracted(form);

    match form.call_id() {
        Some(call_id) => {
            let caller = form.caller();
            if let Some(previous) = state.store.put(CallSession::new(call_id, caller)) {
                tracing::info!(call_id, caller, %previous, "superseded earlier session");
            }
            tracing::info!(call_id, caller, "call answered, prompting for recording");
        }
        None => tracing::warn!("call answered without CallSid, session not tracked"),
    }

    state.flow.greeting()
}

/// Handler for `POST /process` and `POST /handle-recording`.
pub async fn recording_handler(
    Extension(state): Extension<Arc<AppState>>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> VoiceResponse {
    let form = CallbackForm::from_extracted(form);
    let caller = form.caller().to_string();
    let call_id = match form.call_id() {
        Some(id) => id.to_string(),
        None => {
            let id = dispatch::untracked_call_id();
            tracing::warn!(call_id = %id, "recording callback without CallSid");
            id
        }
    };

    if form.has_inline_transcript() {
        return dispatch::handle_transcript(
            &state,
            &call_id,
            &caller,
            form.transcription_status.as_deref(),
            form.transcription_text.as_deref(),
            ResponseTarget::LiveCall,
        )
        .await;
    }

    let Some(recording_uri) = non_blank(form.recording_url.as_deref()).map(str::to_string) else {
        return dispatch::fail(
            &state,
            &call_id,
            &caller,
            CallError::RecordingUnavailable,
            ResponseTarget::LiveCall,
        );
    };

    let event = CallEvent::RecordingCompleted {
        recording_uri: Some(recording_uri.clone()),
    };
    match state.store.apply_or_create(&call_id, &caller, event) {
        Ok(session) => {
            tracing::info!(
                call_id = %call_id,
                caller = %caller,
                recording_sid = form.recording_sid.as_deref().unwrap_or_default(),
                turn = session.turn,
                "recording completed"
            );
            dispatch::after_recording(&state, session, recording_uri).await
        }
        Err(StoreError::Transition(e)) => {
            tracing::info!(call_id = %call_id, error = %e, "duplicate recording callback ignored");
            match state.flow.strategy {
                DispatchStrategy::TextMessage => state.flow.acknowledge(),
                _ => state.flow.hold(&call_id),
            }
        }
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(call_id = %call_id, "session unavailable for recording");
            state.flow.apology_for_stage(None)
        }
    }
}

/// Handler for `POST /transcription` and `POST /process-transcription`.
pub async fn transcription_handler(
    Extension(state): Extension<Arc<AppState>>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> VoiceResponse {
    let form = CallbackForm::from_extracted(form);
    let Some(call_id) = form.call_id() else {
        tracing::warn!("transcription callback without CallSid ignored");
        return VoiceResponse::new();
    };

    dispatch::handle_transcript(
        &state,
        call_id,
        form.caller(),
        form.transcription_status.as_deref(),
        form.transcription_text.as_deref(),
        ResponseTarget::Callback,
    )
    .await
}

/// Handler for `GET|POST /wait-for-processing?attempt=N`.
pub async fn wait_handler(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<WaitQuery>, QueryRejection>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> VoiceResponse {
    let query = query_or_default(query);
    let form = CallbackForm::from_extracted(form);

    let call_id = non_blank(query.call_id.as_deref()).or_else(|| form.call_id());
    match call_id {
        Some(call_id) => dispatch::poll(&state, call_id, query.attempt.unwrap_or(1)),
        None => {
            tracing::warn!("wait loop polled without a call id");
            state.flow.apology_for_stage(None)
        }
    }
}

/// Handler for `GET|POST /deliver-response/{call_id}`.
pub async fn deliver_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> VoiceResponse {
    dispatch::speak_now(&state, &call_id)
}

/// Handler for `GET|POST /speak?call_id=`.
pub async fn speak_handler(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<SpeakQuery>, QueryRejection>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> VoiceResponse {
    let query = query_or_default(query);
    let form = CallbackForm::from_extracted(form);
    match non_blank(query.call_id.as_deref()).or_else(|| form.call_id()) {
        Some(call_id) => dispatch::speak_now(&state, call_id),
        None => {
            tracing::warn!("speak requested without a call id");
            state.flow.apology_for_stage(None)
        }
    }
}

/// Handler for `POST /handle-additional-input?turn=N`.
pub async fn additional_input_handler(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<TurnQuery>, QueryRejection>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> VoiceResponse {
    let turn = query_or_default(query).turn.unwrap_or(1).max(1);
    let form = CallbackForm::from_extracted(form);
    let digits = form.digits.as_deref().map(str::trim).unwrap_or_default();
    let call_id = form.call_id();
    let caller = form.caller();

    if digits != "1" {
        tracing::info!(call_id, caller, digits, turn, "caller finished");
        return state.flow.farewell();
    }
    if !state.flow.can_continue(turn) {
        tracing::info!(call_id, caller, turn, "question limit reached");
        return state.flow.turn_limit();
    }

    let next_turn = turn + 1;
    match call_id {
        Some(call_id) => {
            state
                .store
                .put(CallSession::for_turn(call_id, caller, next_turn));
            tracing::info!(call_id, caller, turn = next_turn, "caller asking another question");
        }
        None => tracing::warn!(turn = next_turn, "follow-up question without CallSid, not tracked"),
    }
    state.flow.next_question()
}
