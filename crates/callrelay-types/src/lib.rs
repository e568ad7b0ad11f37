//! Shared types for the callrelay server.
//!
//! This crate defines the per-call state that the server correlates across
//! independent telephony callbacks: the [`CallSession`] record, its
//! [`CallStatus`] lifecycle, the [`CallEvent`]s that drive it, and the
//! [`CallError`] taxonomy used when a call cannot be completed normally.
//!
//! Nothing here performs I/O. The server crate owns storage and dispatch; the
//! voice crate owns the external service clients.

pub mod error;
pub mod session;

pub use error::{CallError, TransitionError};
pub use session::{CallEvent, CallSession, CallStatus, FailureStage, ReplyRecord};
