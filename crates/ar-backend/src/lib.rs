//! Typed client for the ARCANOS control-plane backend.
//!
//! Stateless JSON-over-HTTP: every operation maps the response onto either
//! a typed value or a [`BackendError`] from the structured taxonomy. The
//! bearer token is re-read from the provider on every call so credentials
//! refreshed mid-run are picked up.

pub mod chat;
pub mod client;
pub mod daemon;
pub mod error;
pub mod media;
pub mod models;
pub mod plans;

pub use client::{BackendClient, RawResponse, TokenProvider};
pub use error::{BackendError, BackendErrorKind, BackendResult, ConfirmationChallenge};
pub use models::{ChatMessage, ChatResult, TranscriptionResult, VisionResult};
