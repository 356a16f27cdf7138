//! sage-ai: Streaming chat-completion boundary
//!
//! This crate wraps an OpenAI-compatible chat-completion endpoint as an
//! incremental stream of text deltas. The orchestrator in `sage-core`
//! consumes it through the [`CompletionClient`] trait and never sees the
//! wire protocol.

pub mod client;
pub mod error;
pub mod types;

pub use client::{CompletionClient, DeltaStream, SseClient};
pub use error::{Error, Result};
pub use types::*;
