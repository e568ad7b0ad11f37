//! Moves a call from transcript to delivered reply.
//!
//! Every function here absorbs its own failures: the result is always a
//! document the platform can execute, and failures are logged with the
//! call id, caller and stage.

use crate::config::{DispatchStrategy, TranscriptionMode};
use crate::resolver::TranscriptionResolver;
use crate::store::{ReplyPoll, StoreError};
use crate::twiml::VoiceResponse;
use crate::AppState;
use callrelay_types::{CallError, CallEvent, CallSession};
use std::sync::Arc;

/// Prefix of ids given to recording callbacks that arrive without a `CallSid`.
const UNTRACKED_PREFIX: &str = "untracked-";

/// Who receives the document a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTarget {
    /// The caller's live call leg; the document is executed on the call.
    LiveCall,
    /// An asynchronous platform callback. The platform discards its document,
    /// so a callback never consumes the reply.
    Callback,
}

/// Log id for a callback that carried no `CallSid`.
pub fn untracked_call_id() -> String {
    format!("{UNTRACKED_PREFIX}{}", uuid::Uuid::new_v4())
}

fn is_untracked(call_id: &str) -> bool {
    call_id.starts_with(UNTRACKED_PREFIX)
}

/// Whether `target` gets the document the caller hears. Under `same_response`
/// callbacks render it too, without delivering anything.
fn renders_for_caller(state: &AppState, target: ResponseTarget) -> bool {
    target == ResponseTarget::LiveCall || state.flow.strategy == DispatchStrategy::SameResponse
}

/// Records a failure against the call and returns what the target should get.
///
/// Nothing is stored for untracked calls: no later request can name them.
pub fn fail(
    state: &AppState,
    call_id: &str,
    caller: &str,
    error: CallError,
    target: ResponseTarget,
) -> VoiceResponse {
    let stage = error.stage();
    tracing::warn!(
        call_id,
        caller,
        stage = stage.as_str(),
        error = %error,
        "call processing failed"
    );
    if !is_untracked(call_id) {
        if let Err(e) = state
            .store
            .apply_or_create(call_id, caller, CallEvent::Failed { stage })
        {
            tracing::debug!(call_id, error = %e, "failure not recorded on session");
        }
    }
    if renders_for_caller(state, target) {
        state.flow.apology(&error)
    } else {
        VoiceResponse::new()
    }
}

/// Handles a platform transcript (status + text) for `call_id`.
pub async fn handle_transcript(
    state: &Arc<AppState>,
    call_id: &str,
    caller: &str,
    status: Option<&str>,
    text: Option<&str>,
    target: ResponseTarget,
) -> VoiceResponse {
    let transcript = match TranscriptionResolver::resolve_inline(status, text) {
        Ok(transcript) => transcript,
        Err(e) => return fail(state, call_id, caller, e, target),
    };
    tracing::info!(call_id, caller, "transcript received");

    match answer(state, call_id, caller, &transcript).await {
        Ok(()) => deliver(state, call_id, target).await,
        Err(StoreError::Transition(e)) => {
            tracing::info!(call_id, caller, error = %e, "duplicate transcript ignored");
            deliver(state, call_id, target).await
        }
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(call_id, caller, "session vanished while generating reply");
            if renders_for_caller(state, target) {
                state.flow.apology_for_stage(None)
            } else {
                VoiceResponse::new()
            }
        }
    }
}

/// Stores `transcript`, generates a reply and marks the session ready to speak.
///
/// # Errors
///
/// `StoreError::Transition` when the call already has a transcript (a
/// duplicate callback), `StoreError::NotFound` if the session expired or was
/// superseded while the reply was generated.
pub async fn answer(
    state: &AppState,
    call_id: &str,
    caller: &str,
    transcript: &str,
) -> Result<(), StoreError> {
    state.store.apply_or_create(
        call_id,
        caller,
        CallEvent::TranscriptResolved {
            transcript: transcript.to_string(),
        },
    )?;

    let reply = state.replies.generate(call_id, caller, transcript).await;
    let session = state
        .store
        .apply(call_id, CallEvent::ReplyGenerated { reply: reply.text })?;
    tracing::info!(
        call_id,
        caller,
        status = %session.status(),
        source = ?reply.source,
        "reply stored"
    );
    Ok(())
}

/// Hands a ready reply to the configured dispatch strategy.
///
/// Only the live call leg or a text message delivers a spoken reply. A
/// callback leaves it stored for the wait loop.
pub async fn deliver(state: &Arc<AppState>, call_id: &str, target: ResponseTarget) -> VoiceResponse {
    match (state.flow.strategy, target) {
        (DispatchStrategy::TextMessage, _) => {
            send_text(state, call_id).await;
            match target {
                ResponseTarget::LiveCall => state.flow.acknowledge(),
                ResponseTarget::Callback => VoiceResponse::new(),
            }
        }
        (_, ResponseTarget::LiveCall) => speak_now(state, call_id),
        (DispatchStrategy::SameResponse, ResponseTarget::Callback) => {
            tracing::debug!(call_id, "reply rendered, left for the waiting call leg");
            match state.store.peek_reply(call_id) {
                Some(record) => state.flow.speak_reply(&record),
                None => VoiceResponse::new(),
            }
        }
        (DispatchStrategy::StoreAndRedirect, ResponseTarget::Callback) => {
            tracing::debug!(call_id, "reply stored for the waiting call leg");
            VoiceResponse::new()
        }
    }
}

/// Takes the reply and speaks it, or keeps the caller waiting if it is not
/// ready yet.
pub fn speak_now(state: &AppState, call_id: &str) -> VoiceResponse {
    match state.store.take_reply(call_id) {
        ReplyPoll::Ready(record) => {
            tracing::info!(
                call_id,
                caller = %record.caller_number,
                turn = record.turn,
                "reply delivered"
            );
            state.flow.speak_reply(&record)
        }
        ReplyPoll::Pending(status) => {
            tracing::debug!(call_id, %status, "reply not ready, holding");
            state.flow.hold(call_id)
        }
        ReplyPoll::Failed(stage) => state.flow.apology_for_stage(stage),
        ReplyPoll::Missing => {
            tracing::warn!(call_id, "no reply to deliver");
            state.flow.apology_for_stage(None)
        }
    }
}

/// One round of the wait loop for a live call leg.
pub fn poll(state: &AppState, call_id: &str, attempt: u32) -> VoiceResponse {
    let attempt = attempt.max(1);
    match state.store.take_reply(call_id) {
        ReplyPoll::Ready(record) => {
            tracing::info!(
                call_id,
                caller = %record.caller_number,
                attempt,
                "reply delivered after wait"
            );
            state.flow.speak_reply(&record)
        }
        ReplyPoll::Pending(status) if attempt < state.flow.max_wait_polls => {
            tracing::debug!(call_id, %status, attempt, "reply pending");
            state.flow.still_processing(call_id, attempt + 1)
        }
        ReplyPoll::Pending(_) => {
            let caller = state
                .store
                .get(call_id)
                .map(|session| session.caller_number)
                .unwrap_or_default();
            fail(
                state,
                call_id,
                &caller,
                CallError::DeliveryRace { attempts: attempt },
                ResponseTarget::LiveCall,
            )
        }
        ReplyPoll::Failed(stage) => state.flow.apology_for_stage(stage),
        ReplyPoll::Missing => {
            tracing::warn!(call_id, attempt, "wait loop found no session");
            state.flow.apology_for_stage(None)
        }
    }
}

/// Sends the ready reply for `call_id` as a text message to the caller.
///
/// The session is marked delivered before the send; a failed send is logged
/// and not retried.
pub async fn send_text(state: &AppState, call_id: &str) {
    let record = match state.store.take_reply(call_id) {
        ReplyPoll::Ready(record) => record,
        other => {
            tracing::debug!(call_id, poll = ?other, "no reply ready for text message");
            return;
        }
    };

    let result = match &state.messenger {
        Some(messenger) => messenger
            .send(&record.caller_number, &state.flow.text_body(&record.reply))
            .await
            .map_err(|e| CallError::Messaging(e.to_string())),
        None => Err(CallError::Messaging("no text messenger configured".into())),
    };

    match result {
        Ok(message_id) => tracing::info!(
            call_id,
            caller = %record.caller_number,
            message_id = %message_id,
            "reply sent by text message"
        ),
        Err(e) => tracing::error!(
            call_id,
            caller = %record.caller_number,
            stage = e.stage().as_str(),
            error = %e,
            "text message delivery failed"
        ),
    }
}

/// Fetches, transcribes and answers a recording, then delivers the reply by
/// text message if that is the configured strategy.
///
/// Runs detached from the request that started it; failures are recorded on
/// the session for the wait loop to report.
pub async fn process_recording(state: Arc<AppState>, session: CallSession, recording_uri: String) {
    let call_id = session.call_id.as_str();
    let caller = session.caller_number.as_str();

    let transcript = match state
        .resolver
        .fetch_and_transcribe(call_id, caller, session.turn, &recording_uri)
        .await
    {
        Ok(transcript) => transcript,
        Err(e) => {
            fail(&state, call_id, caller, e, ResponseTarget::Callback);
            return;
        }
    };

    match answer(&state, call_id, caller, &transcript).await {
        Ok(()) => {
            if state.flow.strategy == DispatchStrategy::TextMessage {
                send_text(&state, call_id).await;
            }
        }
        Err(e) => tracing::warn!(call_id, caller, error = %e, "reply not stored"),
    }
}

/// What the live call leg hears right after its recording completes.
pub async fn after_recording(
    state: &Arc<AppState>,
    session: CallSession,
    recording_uri: String,
) -> VoiceResponse {
    let call_id = session.call_id.clone();
    match (state.flow.transcription, state.flow.strategy) {
        (TranscriptionMode::Platform, DispatchStrategy::TextMessage) => state.flow.acknowledge(),
        (TranscriptionMode::Platform, _) => state.flow.hold(&call_id),
        (TranscriptionMode::Fetch, DispatchStrategy::SameResponse) => {
            process_recording(state.clone(), session, recording_uri).await;
            speak_now(state, &call_id)
        }
        (TranscriptionMode::Fetch, strategy) => {
            tokio::spawn(process_recording(state.clone(), session, recording_uri));
            match strategy {
                DispatchStrategy::TextMessage => state.flow.acknowledge(),
                _ => state.flow.hold(&call_id),
            }
        }
    }
}
