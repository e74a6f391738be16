//! Streaming LLM client abstraction for local model servers
//!
//! This crate implements:
//! - Common interface for chat backends via the LLMClient trait
//! - Support for Ollama (NDJSON) and LM Studio / OpenAI-compatible (SSE) servers
//! - Frame reassembly from arbitrarily chunked transport reads
//! - Cumulative delta streaming with cancellation and optional deadlines
//! - A deterministic mock backend for tests and offline development


mod utils;

pub mod factory;
pub mod framing;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod streaming;
pub mod types;

pub use factory::{create_client, ClientConfig, ServiceType};
pub use mock::MockClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// Snapshot of an in-progress response, handed to the caller once per
/// decoded frame and exactly once more with `is_complete` set.
///
/// `content` is cumulative: each delta carries the full text received so
/// far, never a diff, so content length is monotonically non-decreasing
/// across callbacks for a single request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub content: String,
    pub is_complete: bool,
    /// Wall time elapsed since the request was sent
    pub response_time_ms: Option<u64>,
    /// Best-effort token estimate for the content so far
    pub token_count: Option<u32>,
}

pub type StreamingCallback = Box<dyn Fn(&StreamDelta) -> Result<()> + Send + Sync>;

/// Trait for the different chat backend implementations
///
/// A client handles one logical stream per chat turn. Callers must not
/// pipeline concurrent sends on the same client; a new send assumes the
/// previous request already completed or was cancelled.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Sends the conversation history and streams the response through
    /// `callback`. Resolves to the final accumulated content.
    async fn send_streaming_request(
        &self,
        request: ChatRequest,
        callback: &StreamingCallback,
    ) -> Result<String>;

    /// Buffered convenience: drives the streaming path to completion and
    /// returns only the final content.
    async fn send_request(&self, request: ChatRequest) -> Result<String> {
        let callback: StreamingCallback = Box::new(|_| Ok(()));
        self.send_streaming_request(request, &callback).await
    }

    /// Aborts the in-flight request, closing the underlying connection.
    /// Idempotent; cancelling a completed or already-cancelled request is
    /// a no-op.
    fn cancel_request(&self);
}
