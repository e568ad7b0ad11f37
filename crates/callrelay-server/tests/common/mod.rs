#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use callrelay_server::config::{Config, DispatchStrategy};
use callrelay_server::{app, AppState};
use callrelay_voice::{CompletionService, SpeechToText, TextMessenger, VoiceError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

/// Completion fake that records prompts and answers after an optional delay.
pub struct MockCompletion {
    prompts: Mutex<Vec<String>>,
    reply: Result<String, String>,
    delay: Duration,
}

impl MockCompletion {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            reply: Ok(reply.to_string()),
            delay: Duration::ZERO,
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            reply: Err(message.to_string()),
            delay: Duration::ZERO,
        })
    }

    pub fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            reply: Ok(reply.to_string()),
            delay,
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, VoiceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        tokio::time::sleep(self.delay).await;
        self.reply
            .clone()
            .map_err(|message| VoiceError::Status {
                service: "completion",
                status: 500,
                body: message,
            })
    }
}

/// Speech-to-text fake returning a fixed transcript.
pub struct MockStt {
    transcript: String,
    received: AtomicUsize,
    last_audio: Mutex<Vec<u8>>,
}

impl MockStt {
    pub fn hearing(transcript: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: transcript.to_string(),
            received: AtomicUsize::new(0),
            last_audio: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub fn last_audio(&self) -> Vec<u8> {
        self.last_audio.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechToText for MockStt {
    async fn transcribe(&self, audio: &[u8], _content_type: &str) -> Result<String, VoiceError> {
        self.received.fetch_add(1, Ordering::SeqCst);
        *self.last_audio.lock().unwrap() = audio.to_vec();
        Ok(self.transcript.clone())
    }
}

/// Text-message fake that records (to, body) pairs.
#[derive(Default)]
pub struct MockMessenger {
    sent: Mutex<Vec<(String, String)>>,
}

impl MockMessenger {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextMessenger for MockMessenger {
    async fn send(&self, to: &str, body: &str) -> Result<String, VoiceError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok("SM1".to_string())
    }
}

pub fn test_config(strategy: DispatchStrategy) -> Config {
    let mut config = Config::default();
    config.dispatch.strategy = strategy;
    config
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub completion: Arc<MockCompletion>,
    pub stt: Arc<MockStt>,
    pub messenger: Arc<MockMessenger>,
}

impl TestApp {
    pub fn new(config: Config, completion: Arc<MockCompletion>) -> Self {
        let stt = MockStt::hearing("what time is it");
        Self::with_stt(config, completion, stt)
    }

    pub fn with_stt(config: Config, completion: Arc<MockCompletion>, stt: Arc<MockStt>) -> Self {
        let messenger = Arc::new(MockMessenger::default());
        let state = AppState::from_parts(
            &config,
            completion.clone(),
            stt.clone(),
            Some(messenger.clone() as Arc<dyn TextMessenger>),
        )
        .unwrap();
        Self {
            router: app(state.clone()),
            state,
            completion,
            stt,
            messenger,
        }
    }

    pub async fn post(&self, uri: &str, fields: &[(&str, &str)]) -> (StatusCode, String) {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        if body.starts_with("<?xml") {
            assert_eq!(content_type, "text/xml");
        }
        (status, body)
    }
}

/// Polls `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
