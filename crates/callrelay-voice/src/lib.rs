//! Clients for the services a call depends on but does not own.
//!
//! The server hands transcripts to a [`CompletionService`], audio to a
//! [`SpeechToText`] backend, and finished replies to a [`TextMessenger`]
//! when a deployment answers by text message instead of speech. Each seam is
//! an object-safe trait so the server can hold `Arc<dyn ...>` handles and tests
//! can substitute in-process fakes.
//!
//! Every network or process call made here is bounded by an explicit timeout:
//! the caller is on a live line while these run.

pub mod completion;
pub mod config;
pub mod error;
pub mod messaging;
pub mod stt;

pub use completion::{CompletionService, OpenAiCompletion};
pub use config::{CompletionConfig, MessagingConfig, SttBackend, SttConfig};
pub use error::VoiceError;
pub use messaging::{TextMessenger, TwilioMessenger};
pub use stt::{HttpSpeechToText, LocalWhisper, SpeechToText};
