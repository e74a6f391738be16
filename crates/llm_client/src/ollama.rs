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
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct OllamaMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

/// One NDJSON line of a streamed `/api/chat` response
#[derive(Debug, Deserialize)]
struct OllamaStreamFrame {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
}

/// Decodes Ollama's per-line content diffs into cumulative snapshots
#[derive(Default)]
pub(crate) struct OllamaDecoder {
    content: String,
}

impl FrameDecoder for OllamaDecoder {
    fn framing(&self) -> Framing {
        Framing::Lines
    }

    fn decode(&mut self, frame: &str) -> Vec<FrameEvent> {
        let parsed: OllamaStreamFrame = match serde_json::from_str(frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Dropping malformed Ollama frame '{}': {}", frame, e);
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        if let Some(message) = parsed.message {
            if !message.content.is_empty() {
                self.content.push_str(&message.content);
                events.push(FrameEvent::Delta(self.content.clone()));
            }
        }
        if parsed.done {
            events.push(FrameEvent::Done);
        }
        events
    }
}

pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    system_prompt: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    request_timeout: Option<Duration>,
    estimator: Box<dyn TokenEstimator>,
    cancel: Mutex<CancellationToken>,
}

impl OllamaClient {
    pub fn default_base_url() -> String {
        "http://localhost:11434".to_string()
    }

    pub fn new(model: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            model,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            request_timeout: None,
            estimator: Box::new(HeuristicEstimator),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Default system prompt, used when the request carries none
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

    /// Deadline for the whole streamed read; rides the cancellation path
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_token_estimator(mut self, estimator: Box<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    fn get_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn convert_message(message: &ChatMessage) -> OllamaMessage {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
        .to_string();

        match &message.content {
            MessageContent::Text(text) => OllamaMessage {
                role,
                content: text.clone(),
                images: None,
            },
            MessageContent::Structured(blocks) => {
                let mut content_parts = Vec::new();
                let mut images = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => content_parts.push(text.clone()),
                        ContentBlock::Image { data, .. } => images.push(data.clone()),
                    }
                }
                OllamaMessage {
                    role,
                    content: content_parts.join("\n\n"),
                    images: if images.is_empty() {
                        None
                    } else {
                        Some(images)
                    },
                }
            }
        }
    }

    fn build_request(&self, request: &ChatRequest) -> OllamaRequest {
        let mut messages = Vec::new();

        if let Some(system) = request.system_prompt.as_ref().or(self.system_prompt.as_ref()) {
            messages.push(OllamaMessage {
                role: "system".to_string(),
                content: system.clone(),
                images: None,
            });
        }
        messages.extend(request.messages.iter().map(Self::convert_message));

        let options = if self.temperature.is_some() || self.max_tokens.is_some() {
            Some(OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            })
        } else {
            None
        };

        OllamaRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            options,
        }
    }

    fn fresh_cancel_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap() = token.clone();
        token
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn send_streaming_request(
        &self,
        request: ChatRequest,
        callback: &StreamingCallback,
    ) -> Result<String> {
        let cancel = self.fresh_cancel_token();
        let body = serde_json::to_value(self.build_request(&request))?;
        debug!("Sending request to Ollama: '{}'", body);

        let mut emitter = DeltaEmitter::new(callback, self.estimator.as_ref());

        let response = match self.client.post(self.get_url()).json(&body).send().await {
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

        let mut decoder = OllamaDecoder::default();
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
