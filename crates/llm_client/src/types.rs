use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Structured(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image")]
    Image { media_type: String, data: String },
}

impl ContentBlock {
    /// Create an image block from raw bytes, encoding them as base64
    pub fn new_image(media_type: &str, raw: &[u8]) -> Self {
        use base64::Engine as _;
        ContentBlock::Image {
            media_type: media_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(raw),
        }
    }

    /// Create an image block from already base64-encoded data
    pub fn new_image_base64(media_type: &str, data: &str) -> Self {
        ContentBlock::Image {
            media_type: media_type.to_string(),
            data: data.to_string(),
        }
    }
}

/// One entry of the conversation history sent to a backend
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }
}

/// Generic request structure that gets mapped to each backend's wire schema.
///
/// The history is owned (cloned by the caller), so an in-flight or
/// cancelled request never observes the conversation mutating underneath it.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the client's configured system prompt when set
    pub system_prompt: Option<String>,
}

/// Common error types for all backends
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Pluggable token-count estimator for streamed content
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u32;
}

/// Default estimator: the larger of the whitespace-separated word count
/// and a characters-per-token ratio, which tracks reasonably for both
/// prose and code without tokenizer access.
pub struct HeuristicEstimator;

const CHARS_PER_TOKEN: u32 = 4;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> u32 {
        let words = text.split_whitespace().count() as u32;
        let chars = text.chars().count() as u32;
        words.max(chars / CHARS_PER_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_estimator_scales_with_text() {
        let estimator = HeuristicEstimator;
        assert_eq!(estimator.estimate(""), 0);
        assert!(estimator.estimate("hello world") >= 2);
        let long = "word ".repeat(100);
        assert!(estimator.estimate(&long) >= 100);
    }

    #[test]
    fn image_block_encodes_base64() {
        let block = ContentBlock::new_image("image/png", b"fake-png-data");
        match block {
            ContentBlock::Image { media_type, data } => {
                use base64::Engine as _;
                assert_eq!(media_type, "image/png");
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(&data)
                    .unwrap();
                assert_eq!(decoded, b"fake-png-data");
            }
            _ => panic!("Expected Image content block"),
        }
    }

    #[test]
    fn message_content_serializes_untagged() {
        let message = ChatMessage::text(MessageRole::User, "Hello");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "Hello");
    }
}
