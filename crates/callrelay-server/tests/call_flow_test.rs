mod common;

use axum::http::StatusCode;
use callrelay_server::config::{DispatchStrategy, PromptConfig};
use callrelay_types::{CallStatus, FailureStage};
use common::{test_config, MockCompletion, TestApp};
use std::time::Duration;

fn transcript(call_id: &'static str, status: &'static str, text: &'static str) -> Vec<(&'static str, &'static str)> {
    vec![
        ("CallSid", call_id),
        ("From", "+15550100"),
        ("TranscriptionStatus", status),
        ("TranscriptionText", text),
    ]
}

#[tokio::test]
async fn same_response_speaks_reply_and_hangs_up() {
    let app = TestApp::new(
        test_config(DispatchStrategy::SameResponse),
        MockCompletion::replying("It is noon."),
    );

    let (status, body) = app
        .post("/transcription", &transcript("CA123", "completed", "What time is it"))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.completion.prompts(), vec!["What time is it".to_string()]);
    assert!(body.contains("<Say voice=\"alice\">It is noon.</Say>"), "{body}");
    assert!(body.ends_with("<Hangup/></Response>"), "{body}");
    // The callback response is discarded by the platform; the reply stays
    // stored for the live call leg.
    assert_eq!(
        app.state.store.get("CA123").unwrap().status(),
        CallStatus::ReadyToSpeak
    );
}

#[tokio::test]
async fn same_response_with_platform_transcript_reaches_waiting_caller() {
    let app = TestApp::new(
        test_config(DispatchStrategy::SameResponse),
        MockCompletion::replying("It is noon."),
    );
    let call = [("CallSid", "CA1"), ("From", "+15550100")];

    app.post("/voice", &call).await;
    let (_, body) = app
        .post(
            "/process",
            &[
                ("CallSid", "CA1"),
                ("From", "+15550100"),
                ("RecordingUrl", "https://api.example.com/Recordings/RE1"),
            ],
        )
        .await;
    assert!(body.contains("/wait-for-processing?attempt=1&amp;call_id=CA1"), "{body}");

    app.post("/transcription", &transcript("CA1", "completed", "What time is it"))
        .await;

    let (_, body) = app
        .post("/wait-for-processing?attempt=1&call_id=CA1", &call)
        .await;
    assert!(body.contains("It is noon."), "{body}");
    assert!(!body.contains(&PromptConfig::default().generic_apology));

    let (_, body) = app
        .post("/wait-for-processing?attempt=2&call_id=CA1", &call)
        .await;
    assert!(!body.contains("It is noon."), "spoken once: {body}");
    assert_eq!(app.completion.calls(), 1);
}

#[tokio::test]
async fn failed_transcript_apologises_without_completion() {
    let app = TestApp::new(
        test_config(DispatchStrategy::SameResponse),
        MockCompletion::replying("unused"),
    );
    let prompts = PromptConfig::default();

    for (call_id, status, text) in [("CA1", "failed", "garbled"), ("CA2", "completed", "   ")] {
        let (status, body) = app.post("/transcription", &transcript(call_id, status, text)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(&prompts.transcription_failed), "{body}");
        assert!(body.contains("<Hangup/>"));
    }
    assert_eq!(app.completion.calls(), 0);

    let session = app.state.store.get("CA1").unwrap();
    assert_eq!(session.status(), CallStatus::Failed);
    assert_eq!(session.failure(), Some(FailureStage::Transcription));
}

#[tokio::test(start_paused = true)]
async fn completion_timeout_speaks_fallback() {
    let app = TestApp::new(
        test_config(DispatchStrategy::SameResponse),
        MockCompletion::slow("too late", Duration::from_secs(60)),
    );

    let (_, body) = app
        .post("/transcription", &transcript("CA5", "completed", "hello"))
        .await;

    let prompts = PromptConfig::default();
    assert!(body.contains(&prompts.completion_fallback), "{body}");
    assert!(!body.contains("too late"));
    assert!(body.contains("<Hangup/>"));
}

#[tokio::test]
async fn completion_error_speaks_fallback() {
    let app = TestApp::new(
        test_config(DispatchStrategy::SameResponse),
        MockCompletion::failing("upstream down"),
    );
    let (_, body) = app
        .post("/process-transcription", &transcript("CA6", "completed", "hello"))
        .await;
    assert!(body.contains(&PromptConfig::default().completion_fallback), "{body}");
    assert_eq!(app.completion.calls(), 1);
}

#[tokio::test]
async fn store_and_redirect_delivers_reply_exactly_once() {
    let app = TestApp::new(
        test_config(DispatchStrategy::StoreAndRedirect),
        MockCompletion::replying("Sunny today."),
    );
    let call = [("CallSid", "CA999"), ("From", "+15550100")];

    let (_, body) = app.post("/voice", &call).await;
    assert!(body.contains("<Record"));

    let (_, body) = app
        .post(
            "/process",
            &[
                ("CallSid", "CA999"),
                ("From", "+15550100"),
                ("RecordingUrl", "https://api.example.com/Recordings/RE1"),
            ],
        )
        .await;
    assert!(body.contains("/wait-for-processing?attempt=1&amp;call_id=CA999"), "{body}");
    assert_eq!(
        app.state.store.get("CA999").unwrap().status(),
        CallStatus::AwaitingTranscript
    );

    // Poll before the transcript arrives: keep waiting.
    let (_, body) = app
        .post("/wait-for-processing?attempt=1&call_id=CA999", &call)
        .await;
    assert!(body.contains("Still processing"), "{body}");
    assert!(body.contains("attempt=2&amp;call_id=CA999"), "{body}");
    assert!(!body.contains("Sunny today."));

    // Transcript callback stores the reply; its own response is empty.
    let (_, body) = app
        .post("/transcription", &transcript("CA999", "completed", "Weather?"))
        .await;
    assert!(body.ends_with("<Response/>"), "{body}");
    assert_eq!(
        app.state.store.get("CA999").unwrap().status(),
        CallStatus::ReadyToSpeak
    );

    let (_, body) = app
        .post("/wait-for-processing?attempt=2&call_id=CA999", &call)
        .await;
    assert!(body.contains("Sunny today."), "{body}");
    assert!(body.contains("<Gather"));

    // The reply is never spoken twice.
    let (_, body) = app
        .post("/wait-for-processing?attempt=3&call_id=CA999", &call)
        .await;
    assert!(!body.contains("Sunny today."), "{body}");
    assert!(body.contains("<Hangup/>"));
    assert_eq!(app.completion.calls(), 1);
}

#[tokio::test]
async fn retried_transcript_after_delivery_is_ignored() {
    let app = TestApp::new(
        test_config(DispatchStrategy::StoreAndRedirect),
        MockCompletion::replying("Noon."),
    );
    app.post("/voice", &[("CallSid", "CA20")]).await;
    app.post("/transcription", &transcript("CA20", "completed", "Time?"))
        .await;
    let (_, body) = app.get("/wait-for-processing?attempt=1&call_id=CA20").await;
    assert!(body.contains("Noon."), "{body}");

    let (_, body) = app
        .post("/transcription", &transcript("CA20", "completed", "Time?"))
        .await;
    assert!(body.ends_with("<Response/>"), "{body}");
    assert_eq!(app.completion.calls(), 1);
    assert!(app.state.store.get("CA20").is_none());

    let (_, body) = app.get("/wait-for-processing?attempt=2&call_id=CA20").await;
    assert!(!body.contains("Noon."), "{body}");
}

#[tokio::test]
async fn wait_loop_uses_call_sid_when_query_has_no_call_id() {
    let app = TestApp::new(
        test_config(DispatchStrategy::StoreAndRedirect),
        MockCompletion::replying("Answer."),
    );
    app.post("/voice", &[("CallSid", "CA10")]).await;
    app.post("/transcription", &transcript("CA10", "completed", "Question"))
        .await;

    let (_, body) = app
        .post("/wait-for-processing", &[("CallSid", "CA10")])
        .await;
    assert!(body.contains("Answer."), "{body}");
}

#[tokio::test]
async fn wait_loop_gives_up_after_max_polls() {
    let mut config = test_config(DispatchStrategy::StoreAndRedirect);
    config.dispatch.max_wait_polls = 2;
    let app = TestApp::new(config, MockCompletion::replying("unused"));
    app.post("/voice", &[("CallSid", "CA11"), ("From", "+15550100")])
        .await;

    let (_, body) = app.get("/wait-for-processing?attempt=1&call_id=CA11").await;
    assert!(body.contains("attempt=2"), "{body}");

    let (_, body) = app.get("/wait-for-processing?attempt=2&call_id=CA11").await;
    assert!(body.contains(&PromptConfig::default().delivery_timeout), "{body}");
    assert!(body.contains("<Hangup/>"));

    let session = app.state.store.get("CA11").unwrap();
    assert_eq!(session.status(), CallStatus::Failed);
    assert_eq!(session.failure(), Some(FailureStage::Delivery));
}

#[tokio::test]
async fn wait_loop_reports_failed_transcription() {
    let app = TestApp::new(
        test_config(DispatchStrategy::StoreAndRedirect),
        MockCompletion::replying("unused"),
    );
    app.post("/voice", &[("CallSid", "CA12")]).await;
    let (_, body) = app
        .post("/transcription", &transcript("CA12", "failed", ""))
        .await;
    assert!(body.ends_with("<Response/>"));

    let (_, body) = app.get("/wait-for-processing?attempt=1&call_id=CA12").await;
    assert!(body.contains(&PromptConfig::default().transcription_failed), "{body}");
}

#[tokio::test]
async fn deliver_response_route_speaks_stored_reply() {
    let app = TestApp::new(
        test_config(DispatchStrategy::StoreAndRedirect),
        MockCompletion::replying("Stored reply."),
    );
    app.post("/transcription", &transcript("CA13", "completed", "Q"))
        .await;

    let (_, body) = app.get("/deliver-response/CA13").await;
    assert!(body.contains("Stored reply."), "{body}");

    let (_, body) = app.get("/speak?call_id=CA13").await;
    assert!(!body.contains("Stored reply."));
    assert!(body.contains(&PromptConfig::default().generic_apology));
}

#[tokio::test]
async fn inline_transcript_on_recording_callback_is_answered_live() {
    let app = TestApp::new(
        test_config(DispatchStrategy::StoreAndRedirect),
        MockCompletion::replying("Inline answer."),
    );
    let (_, body) = app
        .post(
            "/handle-recording",
            &[
                ("CallSid", "CA14"),
                ("RecordingUrl", "https://api.example.com/Recordings/RE2"),
                ("TranscriptionStatus", "completed"),
                ("TranscriptionText", "Inline question"),
            ],
        )
        .await;
    assert!(body.contains("Inline answer."), "{body}");
    assert_eq!(app.completion.prompts(), vec!["Inline question".to_string()]);
}

#[tokio::test]
async fn recording_callback_without_recording_apologises() {
    let app = TestApp::new(
        test_config(DispatchStrategy::StoreAndRedirect),
        MockCompletion::replying("unused"),
    );
    let (status, body) = app.post("/process", &[("CallSid", "CA15")]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(&PromptConfig::default().recording_unavailable), "{body}");
    assert!(body.contains("<Hangup/>"));
    assert_eq!(
        app.state.store.get("CA15").unwrap().failure(),
        Some(FailureStage::Recording)
    );
}

#[tokio::test]
async fn failed_callback_without_call_sid_is_not_stored() {
    let app = TestApp::new(
        test_config(DispatchStrategy::StoreAndRedirect),
        MockCompletion::replying("unused"),
    );
    let (status, body) = app.post("/process", &[("From", "+15550100")]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(&PromptConfig::default().recording_unavailable), "{body}");
    assert!(app.state.store.is_empty());
}

#[tokio::test]
async fn duplicate_recording_callback_keeps_single_session() {
    let app = TestApp::new(
        test_config(DispatchStrategy::StoreAndRedirect),
        MockCompletion::replying("unused"),
    );
    let fields = [
        ("CallSid", "CA16"),
        ("RecordingUrl", "https://api.example.com/Recordings/RE3"),
    ];
    let (_, first) = app.post("/process", &fields).await;
    let (_, second) = app.post("/process", &fields).await;
    assert_eq!(first, second);
    assert_eq!(app.state.store.len(), 1);
    assert_eq!(
        app.state.store.get("CA16").unwrap().recording_uri.as_deref(),
        Some("https://api.example.com/Recordings/RE3")
    );
}

#[tokio::test]
async fn text_message_strategy_texts_the_caller() {
    let app = TestApp::new(
        test_config(DispatchStrategy::TextMessage),
        MockCompletion::replying("Open until 5pm."),
    );

    let (_, body) = app
        .post(
            "/process",
            &[
                ("CallSid", "CA17"),
                ("From", "+15550100"),
                ("RecordingUrl", "https://api.example.com/Recordings/RE4"),
            ],
        )
        .await;
    assert!(body.contains(&PromptConfig::default().text_acknowledgement), "{body}");
    assert!(body.contains("<Hangup/>"));

    let (_, body) = app
        .post("/transcription", &transcript("CA17", "completed", "Opening hours?"))
        .await;
    assert!(body.ends_with("<Response/>"), "{body}");
    assert_eq!(
        app.messenger.sent(),
        vec![(
            "+15550100".to_string(),
            "Response to your message: Open until 5pm.".to_string()
        )]
    );
    assert!(app.state.store.get("CA17").is_none());
}
