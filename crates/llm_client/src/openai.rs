//! OpenAI-compatible chat completions client
//!
//! Speaks the `data:`-prefixed SSE wire shape used by LM Studio and other
//! servers exposing the OpenAI chat completions API.

use crate::framing::Framing;
use crate::streaming::{drive_stream, DeltaEmitter, FrameDecoder, FrameEvent, HttpChunkStream};
use crate::types::*;
use crate::{utils, LLMClient, StreamingCallback};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct OpenAIChatMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
    #[allow(dead_code)]
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Decodes SSE lines into cumulative snapshots. Diff-style
/// `choices[0].delta.content` fragments are accumulated here; the literal
/// `[DONE]` sentinel terminates the stream.
#[derive(Default)]
pub(crate) struct OpenAIDecoder {
    content: String,
}

impl FrameDecoder for OpenAIDecoder {
    fn framing(&self) -> Framing {
        Framing::Lines
    }

    fn decode(&mut self, frame: &str) -> Vec<FrameEvent> {
        // Non-data SSE lines (comments, event names) carry no payload
        let Some(data) = frame.strip_prefix("data: ") else {
            return Vec::new();
        };
        if data.trim() == "[DONE]" {
            return vec![FrameEvent::Done];
        }

        match serde_json::from_str::<OpenAIStreamResponse>(data) {
            Ok(parsed) => {
                if let Some(choice) = parsed.choices.first() {
                    if let Some(content) = &choice.delta.content {
                        if !content.is_empty() {
                            self.content.push_str(content);
                            return vec![FrameEvent::Delta(self.content.clone())];
                        }
                    }
                }
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to parse stream event '{}': {}", data, e);
                Vec::new()
            }
        }
    }
}

pub struct OpenAIClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    request_timeout: Option<Duration>,
    estimator: Box<dyn TokenEstimator>,
    cancel: Mutex<CancellationToken>,
}

impl OpenAIClient {
    /// LM Studio's local server default
    pub fn default_base_url() -> String {
        "http://localhost:1234/v1".to_string()
    }

    pub fn new(model: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            model,
            api_key: None,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            request_timeout: None,
            estimator: Box::new(HeuristicEstimator),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Bearer token for servers that require one; LM Studio does not
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_token_estimator(mut self, estimator: Box<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    fn get_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn convert_message(message: &ChatMessage) -> OpenAIChatMessage {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
        .to_string();

        match &message.content {
            MessageContent::Text(text) => OpenAIChatMessage {
                role,
                content: serde_json::json!(text),
            },
            MessageContent::Structured(blocks) => {
                let parts: Vec<serde_json::Value> = blocks
                    .iter()
                    .map(|block| match block {
                        ContentBlock::Text { text } => serde_json::json!({
                            "type": "text",
                            "text": text
                        }),
                        ContentBlock::Image { media_type, data } => serde_json::json!({
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:{};base64,{}", media_type, data)
                            }
                        }),
                    })
                    .collect();
                OpenAIChatMessage {
                    role,
                    content: serde_json::json!(parts),
                }
            }
        }
    }

    fn build_request(&self, request: &ChatRequest) -> OpenAIRequest {
        let mut messages = Vec::new();

        if let Some(system) = request.system_prompt.as_ref().or(self.system_prompt.as_ref()) {
            messages.push(OpenAIChatMessage {
                role: "system".to_string(),
                content: serde_json::json!(system),
            });
        }
        messages.extend(request.messages.iter().map(Self::convert_message));

        OpenAIRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn fresh_cancel_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap() = token.clone();
        token
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn send_streaming_request(
        &self,
        request: ChatRequest,
        callback: &StreamingCallback,
    ) -> Result<String> {
        let cancel = self.fresh_cancel_token();
        let body = serde_json::to_value(self.build_request(&request))?;
        debug!("Sending streaming request: {}", body);

        let mut emitter = DeltaEmitter::new(callback, self.estimator.as_ref());

        let mut request_builder = self.client.post(self.get_url()).json(&body);
        if let Some(api_key) = &self.api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = match request_builder.send().await {
            Ok(response) => response,
            Err(e) => {
                emitter.finish("")?;
                return Err(ApiError::NetworkError(e.to_string()).into());
            }
        };
        let response = match utils::check_response_error(response).await {
            Ok(response) => response,
            Err(e) => {
                emitter.finish("")?;
                return Err(e);
            }
        };

        let mut decoder = OpenAIDecoder::default();
        drive_stream(
            HttpChunkStream::new(response),
            &mut decoder,
            &mut emitter,
            &cancel,
            self.request_timeout,
        )
        .await
    }

    fn cancel_request(&self) {
        self.cancel.lock().unwrap().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_accumulates_sse_deltas() {
        let mut decoder = OpenAIDecoder::default();

        let events = decoder.decode(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#);
        assert_eq!(events, vec![FrameEvent::Delta("Hi".to_string())]);

        let events = decoder.decode(r#"data: {"choices":[{"delta":{"content":" there"}}]}"#);
        assert_eq!(events, vec![FrameEvent::Delta("Hi there".to_string())]);

        assert_eq!(decoder.decode("data: [DONE]"), vec![FrameEvent::Done]);
    }

    #[test]
    fn frames_without_payload_are_ignored() {
        let mut decoder = OpenAIDecoder::default();
        // Role-only delta, empty choices, comment line, garbage
        assert!(decoder
            .decode(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#)
            .is_empty());
        assert!(decoder.decode(r#"data: {"choices":[]}"#).is_empty());
        assert!(decoder.decode(": keep-alive").is_empty());
        assert!(decoder.decode("data: {broken json").is_empty());
    }

    #[test]
    fn request_body_uses_image_url_parts() {
        let client = OpenAIClient::new("local-model".to_string(), OpenAIClient::default_base_url())
            .with_max_tokens(512);

        let request = ChatRequest {
            messages: vec![ChatMessage {
                role: MessageRole::User,
                content: MessageContent::Structured(vec![
                    ContentBlock::Text {
                        text: "Describe this".to_string(),
                    },
                    ContentBlock::new_image_base64("image/jpeg", "Zm9v"),
                ]),
            }],
            system_prompt: Some("Be terse.".to_string()),
        };

        let body = serde_json::to_value(client.build_request(&request)).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "system");
        let parts = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(
            parts[1]["image_url"]["url"],
            "data:image/jpeg;base64,Zm9v"
        );
    }
}
