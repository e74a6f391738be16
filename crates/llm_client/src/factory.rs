use crate::types::ApiError;
use crate::{LLMClient, MockClient, OllamaClient, OpenAIClient};
use anyhow::Result;
use clap::ValueEnum;
use std::time::Duration;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ServiceType {
    Ollama,
    LmStudio,
    Mock,
}

/// Configuration for creating a chat client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub service: ServiceType,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(service: ServiceType) -> Self {
        Self {
            service,
            base_url: None,
            model: None,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            request_timeout: None,
        }
    }
}

/// Builds the client for the configured service. Missing required fields
/// fail here, at creation time, never on the streaming path.
pub fn create_client(config: ClientConfig) -> Result<Box<dyn LLMClient>> {
    match config.service {
        ServiceType::Ollama => {
            let model = config.model.ok_or_else(|| {
                ApiError::Configuration("Model name is required for the Ollama service".to_string())
            })?;
            let base_url = config.base_url.unwrap_or_else(OllamaClient::default_base_url);

            let mut client = OllamaClient::new(model, base_url);
            if let Some(prompt) = config.system_prompt {
                client = client.with_system_prompt(prompt);
            }
            if let Some(temperature) = config.temperature {
                client = client.with_temperature(temperature);
            }
            if let Some(max_tokens) = config.max_tokens {
                client = client.with_max_tokens(max_tokens);
            }
            if let Some(timeout) = config.request_timeout {
                client = client.with_request_timeout(timeout);
            }
            Ok(Box::new(client))
        }

        ServiceType::LmStudio => {
            let model = config.model.ok_or_else(|| {
                ApiError::Configuration(
                    "Model name is required for the LM Studio service".to_string(),
                )
            })?;
            let base_url = config.base_url.unwrap_or_else(OpenAIClient::default_base_url);

            let mut client = OpenAIClient::new(model, base_url);
            if let Some(prompt) = config.system_prompt {
                client = client.with_system_prompt(prompt);
            }
            if let Some(temperature) = config.temperature {
                client = client.with_temperature(temperature);
            }
            if let Some(max_tokens) = config.max_tokens {
                client = client.with_max_tokens(max_tokens);
            }
            if let Some(timeout) = config.request_timeout {
                client = client.with_request_timeout(timeout);
            }
            Ok(Box::new(client))
        }

        ServiceType::Mock => Ok(Box::new(MockClient::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_fails_at_creation() {
        for service in [ServiceType::Ollama, ServiceType::LmStudio] {
            let error = create_client(ClientConfig::new(service)).err().unwrap();
            match error.downcast_ref::<ApiError>() {
                Some(ApiError::Configuration(_)) => {}
                other => panic!("Expected configuration error, got {other:?}"),
            }
        }
    }

    #[test]
    fn mock_service_needs_no_config() {
        assert!(create_client(ClientConfig::new(ServiceType::Mock)).is_ok());
    }

    #[test]
    fn full_config_creates_clients() {
        for service in [ServiceType::Ollama, ServiceType::LmStudio] {
            let mut config = ClientConfig::new(service);
            config.model = Some("local-model".to_string());
            config.system_prompt = Some("You are a note-taking assistant.".to_string());
            config.temperature = Some(0.5);
            config.max_tokens = Some(1024);
            config.request_timeout = Some(Duration::from_secs(120));
            assert!(create_client(config).is_ok());
        }
    }
}
