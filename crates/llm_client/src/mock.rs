//! Deterministic mock backend
//!
//! Replays a fixed script of content fragments with an artificial delay,
//! rendered as Ollama-style NDJSON frames so the full assembler, decoder
//! and driver pipeline is exercised without any real I/O.

use crate::ollama::OllamaDecoder;
use crate::streaming::{drive_stream, DeltaEmitter, ScriptedChunkStream};
use crate::types::*;
use crate::{LLMClient, StreamingCallback};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_DELAY: Duration = Duration::from_millis(17);

pub struct MockClient {
    script: Vec<String>,
    delay: Duration,
    estimator: Box<dyn TokenEstimator>,
    cancel: Mutex<CancellationToken>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::with_script(
            vec![
                "This is ".to_string(),
                "a scripted ".to_string(),
                "mock response.".to_string(),
            ],
            DEFAULT_DELAY,
        )
    }

    pub fn with_script(script: Vec<String>, delay: Duration) -> Self {
        Self {
            script,
            delay,
            estimator: Box::new(HeuristicEstimator),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    fn render_chunks(&self) -> Vec<Vec<u8>> {
        let mut chunks: Vec<Vec<u8>> = self
            .script
            .iter()
            .map(|piece| {
                format!(
                    "{}\n",
                    serde_json::json!({"message": {"content": piece}, "done": false})
                )
                .into_bytes()
            })
            .collect();
        chunks.push(format!("{}\n", serde_json::json!({"done": true})).into_bytes());
        chunks
    }

    fn fresh_cancel_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap() = token.clone();
        token
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for MockClient {
    async fn send_streaming_request(
        &self,
        _request: ChatRequest,
        callback: &StreamingCallback,
    ) -> Result<String> {
        let cancel = self.fresh_cancel_token();
        let mut emitter = DeltaEmitter::new(callback, self.estimator.as_ref());
        let stream = ScriptedChunkStream::new(self.render_chunks(), self.delay);
        let mut decoder = OllamaDecoder::default();
        drive_stream(stream, &mut decoder, &mut emitter, &cancel, None).await
    }

    fn cancel_request(&self) {
        self.cancel.lock().unwrap().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamDelta;
    use std::sync::Arc;

    fn collecting_callback() -> (StreamingCallback, Arc<Mutex<Vec<StreamDelta>>>) {
        let deltas: Arc<Mutex<Vec<StreamDelta>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = deltas.clone();
        let callback: StreamingCallback = Box::new(move |delta| {
            sink.lock().unwrap().push(delta.clone());
            Ok(())
        });
        (callback, deltas)
    }

    #[tokio::test]
    async fn replays_script_deterministically() {
        let client = MockClient::with_script(
            vec!["one ".to_string(), "two ".to_string(), "three".to_string()],
            Duration::from_millis(1),
        );

        for _ in 0..2 {
            let (callback, deltas) = collecting_callback();
            let content = client
                .send_streaming_request(ChatRequest::default(), &callback)
                .await
                .unwrap();

            assert_eq!(content, "one two three");
            let deltas = deltas.lock().unwrap();
            let contents: Vec<&str> = deltas.iter().map(|d| d.content.as_str()).collect();
            assert_eq!(contents, vec!["one ", "one two ", "one two three", "one two three"]);
            assert_eq!(deltas.iter().filter(|d| d.is_complete).count(), 1);
            assert!(deltas.last().unwrap().is_complete);
        }
    }

    #[tokio::test]
    async fn buffered_send_returns_final_content() {
        let client = MockClient::with_script(
            vec!["buffered".to_string()],
            Duration::from_millis(1),
        );
        let content = client.send_request(ChatRequest::default()).await.unwrap();
        assert_eq!(content, "buffered");
    }
}
