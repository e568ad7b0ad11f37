use axum::{body::Bytes, http::HeaderMap, routing::post, Json, Router};
use callrelay_voice::stt::{self, MAX_STT_INPUT_BYTES};
use callrelay_voice::{HttpSpeechToText, LocalWhisper, SpeechToText, SttBackend, SttConfig, VoiceError};
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

async fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    tokio::fs::write(&path, body).await.unwrap();
    let mut perms = tokio::fs::metadata(&path).await.unwrap().permissions();
    perms.set_mode(0o755);
    tokio::fs::set_permissions(&path, perms).await.unwrap();
    path
}

#[tokio::test]
async fn local_whisper_reads_stdout() {
    let temp_dir = tempfile::tempdir().unwrap();
    // Drain stdin, then print a transcript with surrounding whitespace.
    let script = write_script(
        temp_dir.path(),
        "mock_whisper.sh",
        "#!/bin/sh\ncat > /dev/null\necho '  what time is it  '\n",
    )
    .await;

    let stt = LocalWhisper::new("dummy_model", script);
    let text = stt.transcribe(b"RIFF....WAVE", "audio/wav").await.unwrap();
    assert_eq!(text, "what time is it");
}

#[tokio::test]
async fn local_whisper_reports_nonzero_exit() {
    let temp_dir = tempfile::tempdir().unwrap();
    let script = write_script(
        temp_dir.path(),
        "failing_whisper.sh",
        "#!/bin/sh\ncat > /dev/null\necho 'model not found' >&2\nexit 3\n",
    )
    .await;

    let err = LocalWhisper::new("dummy_model", script)
        .transcribe(b"audio", "audio/wav")
        .await
        .unwrap_err();
    match err {
        VoiceError::Stt(msg) => assert!(msg.contains("model not found"), "{msg}"),
        other => panic!("expected STT error, got {other:?}"),
    }
}

#[tokio::test]
async fn local_whisper_times_out() {
    let temp_dir = tempfile::tempdir().unwrap();
    let script = write_script(temp_dir.path(), "slow_whisper.sh", "#!/bin/sh\nsleep 5\n").await;

    let err = LocalWhisper::new("dummy_model", script)
        .with_timeout(Duration::from_millis(200))
        .transcribe(b"audio", "audio/wav")
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::Timeout { .. }), "got {err:?}");
}

#[tokio::test]
async fn oversized_audio_is_rejected_before_spawning() {
    let stt = LocalWhisper::new("dummy_model", "/nonexistent/whisper");
    let audio = vec![0u8; MAX_STT_INPUT_BYTES + 1];
    let err = stt.transcribe(&audio, "audio/wav").await.unwrap_err();
    match err {
        VoiceError::Stt(msg) => assert!(msg.contains("exceeds maximum size")),
        other => panic!("expected STT error, got {other:?}"),
    }
}

#[tokio::test]
async fn http_backend_uploads_multipart_audio() {
    let router = Router::new().route(
        "/audio/transcriptions",
        post(|headers: HeaderMap, body: Bytes| async move {
            let content_type = headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body = String::from_utf8_lossy(&body).to_string();
            let ok = content_type.starts_with("multipart/form-data")
                && body.contains("whisper-1")
                && body.contains("FAKEAUDIO");
            Json(json!({ "text": if ok { " hello there " } else { "bad request shape" } }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let stt = HttpSpeechToText::new(SttConfig {
        base_url: format!("http://{}", addr),
        api_key: "sk-stt".into(),
        timeout_seconds: 2,
        ..Default::default()
    })
    .unwrap();
    let text = stt.transcribe(b"FAKEAUDIO", "audio/wav").await.unwrap();
    assert_eq!(text, "hello there");
}

#[test]
fn local_backend_requires_paths() {
    let config: SttConfig = toml::from_str(r#"backend = "local""#).unwrap();
    assert_eq!(config.backend, SttBackend::Local);
    assert!(matches!(stt::from_config(&config), Err(VoiceError::Config(_))));

    let config = SttConfig {
        backend: SttBackend::Local,
        binary_path: Some("/usr/local/bin/whisper".into()),
        model_path: Some("/models/ggml-base.en.bin".into()),
        ..Default::default()
    };
    assert!(stt::from_config(&config).is_ok());
}
