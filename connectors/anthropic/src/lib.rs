//! Anthropic model backend for the cartography engine's model dispatcher.

use async_trait::async_trait;
use cartography_core::errors::DispatchError;
use cartography_core::traits::{GenerationRequest, GenerationResponse, ModelBackend, ModelCapabilities};
use reqwest::{Client, StatusCode};
use tracing::debug;

mod config;
mod models;

pub use config::AnthropicConfig;
use models::*;

pub struct AnthropicConnector {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicConnector {
    pub fn new(config: AnthropicConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DispatchError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Anthropic's JSON mode is prompt-only: there is no native schema
    /// constraint, so the dispatcher is expected to have already folded
    /// the schema text into `system_instruction` when `supports_json_schema`
    /// is `false`. We only forward the system instruction.
    fn build_request(&self, request: &GenerationRequest) -> MessageRequest {
        MessageRequest {
            model: self.config.model.clone(),
            messages: vec![Message::new_user(&request.prompt)],
            system: request.system_instruction.clone(),
            max_tokens: self.config.max_tokens,
            temperature: Some(request.temperature),
            thinking: request.thinking_budget.or(self.config.thinking_budget).map(|budget| ThinkingConfig {
                thinking_type: "enabled".to_string(),
                budget_tokens: budget,
            }),
        }
    }

    fn strip_markdown_fences(content: &str) -> &str {
        content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    }

    fn classify_status(status: StatusCode, body: String) -> DispatchError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            DispatchError::InvalidCredential
        } else {
            DispatchError::ServerOrClient { status: status.as_u16(), body }
        }
    }
}

#[async_trait]
impl ModelBackend for AnthropicConnector {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            supports_system_instruction: true,
            supports_thinking: true,
            supports_json_schema: false,
        }
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, DispatchError> {
        debug!(model = %self.config.model, label = %request.label, "dispatching anthropic request");

        let message_request = self.build_request(&request);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.api_base))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&message_request)
            .send()
            .await
            .map_err(|e| DispatchError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Self::classify_status(status, body));
        }

        let message_response: MessageResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Internal(format!("failed to parse response: {e}")))?;

        let text = message_response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return Err(DispatchError::Internal("no text content in response".to_string()));
        }

        Ok(GenerationResponse {
            text: Self::strip_markdown_fences(&text).to_string(),
            model: message_response.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartography_core::traits::GenerationRequest;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            prompt: prompt.to_string(),
            system_instruction: Some("You are a cartographer.".to_string()),
            json_schema: None,
            thinking_budget: None,
            temperature: 0.2,
            label: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn generate_strips_markdown_fences() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "model": "claude-3-5-sonnet-20241022",
                "content": [{"type": "text", "text": "```json\n{\"nodes_to_add\":[]}\n```"}],
                "usage": {"input_tokens": 10, "output_tokens": 5}
            })))
            .mount(&server)
            .await;

        let connector =
            AnthropicConnector::new(AnthropicConfig::new("test-key").with_api_base(server.uri())).unwrap();
        let response = connector.generate(request("describe the room")).await.unwrap();
        assert_eq!(response.text, "{\"nodes_to_add\":[]}");
    }

    #[tokio::test]
    async fn forbidden_status_maps_to_invalid_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let connector =
            AnthropicConnector::new(AnthropicConfig::new("bad-key").with_api_base(server.uri())).unwrap();
        let err = connector.generate(request("hello")).await.unwrap_err();
        assert!(err.is_invalid_credential());
    }

    #[tokio::test]
    async fn empty_content_is_an_internal_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_2",
                "model": "claude-3-5-sonnet-20241022",
                "content": [],
                "usage": {"input_tokens": 10, "output_tokens": 0}
            })))
            .mount(&server)
            .await;

        let connector =
            AnthropicConnector::new(AnthropicConfig::new("test-key").with_api_base(server.uri())).unwrap();
        let err = connector.generate(request("hello")).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
