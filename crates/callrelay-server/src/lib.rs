//! callrelay server library logic.

pub mod api_voice;
pub mod artifacts;
pub mod background;
pub mod config;
pub mod dispatch;
pub mod flow;
pub mod reply;
pub mod resolver;
pub mod store;
pub mod twiml;

use axum::{extract::DefaultBodyLimit, routing::get, routing::post, Extension, Json, Router};
use callrelay_voice::{
    stt, CompletionService, OpenAiCompletion, SpeechToText, TextMessenger, TwilioMessenger,
};
use config::{Config, ConfigError, DispatchStrategy};
use flow::CallFlow;
use reply::ReplyGenerator;
use resolver::TranscriptionResolver;
use serde_json::{json, Value};
use std::sync::Arc;
use store::CallStore;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Correlation store: call id → session.
    pub store: CallStore,
    /// Document builders and call-flow settings.
    pub flow: Arc<CallFlow>,
    /// Transcript resolution (inline or fetch + speech-to-text).
    pub resolver: Arc<TranscriptionResolver>,
    /// Completion-backed reply generation.
    pub replies: Arc<ReplyGenerator>,
    /// Text-message sender, present for the `text_message` strategy.
    pub messenger: Option<Arc<dyn TextMessenger>>,
}

impl AppState {
    /// Builds state with the real service clients named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a configured client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let completion = OpenAiCompletion::new(config.completion.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !completion.is_configured() {
            tracing::warn!("completion API key not set; every call will get the fallback reply");
        }
        let stt: Arc<dyn SpeechToText> = Arc::from(
            stt::from_config(&config.stt).map_err(|e| ConfigError::Invalid(e.to_string()))?,
        );
        let messenger: Option<Arc<dyn TextMessenger>> =
            if config.dispatch.strategy == DispatchStrategy::TextMessage {
                let messenger = TwilioMessenger::new(config.telephony.clone())
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Some(Arc::new(messenger) as Arc<dyn TextMessenger>)
            } else {
                None
            };

        Self::from_parts(config, Arc::new(completion), stt, messenger)
    }

    /// Builds state around caller-supplied service clients.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the recording client cannot be built.
    pub fn from_parts(
        config: &Config,
        completion: Arc<dyn CompletionService>,
        stt: Arc<dyn SpeechToText>,
        messenger: Option<Arc<dyn TextMessenger>>,
    ) -> Result<Self, ConfigError> {
        let flow = CallFlow::from_config(config);
        let replies = ReplyGenerator::new(
            completion,
            config.completion.timeout(),
            flow.prompts.completion_fallback.clone(),
            flow.prompts.unintelligible.clone(),
        );

        Ok(Self {
            store: CallStore::new(config.session.ttl()),
            resolver: Arc::new(TranscriptionResolver::new(config, stt)?),
            replies: Arc::new(replies),
            flow: Arc::new(flow),
            messenger,
        })
    }
}

/// Maximum request body size (64 KiB). Callbacks are small form posts.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.store.len(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            flow::PATH_VOICE,
            get(api_voice::voice_handler).post(api_voice::voice_handler),
        )
        .route(flow::PATH_PROCESS, post(api_voice::recording_handler))
        .route("/handle-recording", post(api_voice::recording_handler))
        .route(
            flow::PATH_TRANSCRIPTION,
            post(api_voice::transcription_handler),
        )
        .route(
            "/process-transcription",
            post(api_voice::transcription_handler),
        )
        .route(
            flow::PATH_WAIT,
            get(api_voice::wait_handler).post(api_voice::wait_handler),
        )
        .route(
            "/deliver-response/{call_id}",
            get(api_voice::deliver_handler).post(api_voice::deliver_handler),
        )
        .route(
            "/speak",
            get(api_voice::speak_handler).post(api_voice::speak_handler),
        )
        .route(
            flow::PATH_ADDITIONAL_INPUT,
            post(api_voice::additional_input_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_state() {
        let state = AppState::from_config(&Config::default()).unwrap();
        assert!(state.messenger.is_none());
        assert!(state.store.is_empty());
    }

    #[test]
    fn client_setup_errors_surface_as_invalid_config() {
        let mut config = Config::default();
        config.stt.backend = callrelay_voice::SttBackend::Local;
        assert!(matches!(
            AppState::from_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }
}
