//! OpenAI model backend for the cartography engine's model dispatcher.

use async_trait::async_trait;
use cartography_core::errors::DispatchError;
use cartography_core::traits::{GenerationRequest, GenerationResponse, ModelBackend, ModelCapabilities};
use reqwest::{Client, StatusCode};
use tracing::debug;

mod config;
mod models;

pub use config::OpenAiConfig;
use models::*;

pub struct OpenAiConnector {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiConnector {
    pub fn new(config: OpenAiConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DispatchError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn build_messages(&self, request: &GenerationRequest) -> Vec<OpenAiMessage> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_instruction {
            messages.push(OpenAiMessage { role: "system".to_string(), content: system.clone() });
        }
        messages.push(OpenAiMessage { role: "user".to_string(), content: request.prompt.clone() });
        messages
    }

    fn response_format(&self, request: &GenerationRequest) -> Option<ResponseFormat> {
        request.json_schema.as_ref().map(|schema| ResponseFormat::JsonSchema {
            json_schema: JsonSchemaSpec {
                name: request.label.clone(),
                schema: schema.clone(),
                strict: true,
            },
        })
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
impl ModelBackend for OpenAiConnector {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            supports_system_instruction: true,
            supports_thinking: false,
            supports_json_schema: true,
        }
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, DispatchError> {
        debug!(model = %self.config.model, label = %request.label, "dispatching openai request");

        let chat_request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: self.build_messages(&request),
            max_tokens: self.config.max_tokens,
            temperature: Some(request.temperature),
            response_format: self.response_format(&request),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| DispatchError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Self::classify_status(status, body));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Internal(format!("failed to parse response: {e}")))?;

        let content = chat_response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| DispatchError::Internal("no content in response".to_string()))?;

        Ok(GenerationResponse { text: content, model: chat_response.model })
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
            model: "gpt-4o".to_string(),
            prompt: prompt.to_string(),
            system_instruction: Some("You are a cartographer.".to_string()),
            json_schema: None,
            thinking_budget: None,
            temperature: 0.2,
            label: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn generate_extracts_content_from_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"nodes_to_add\":[]}"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            })))
            .mount(&server)
            .await;

        let connector = OpenAiConnector::new(OpenAiConfig::new("test-key").with_api_base(server.uri())).unwrap();
        let response = connector.generate(request("describe the room")).await.unwrap();
        assert_eq!(response.text, "{\"nodes_to_add\":[]}");
    }

    #[tokio::test]
    async fn unauthorized_status_maps_to_invalid_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let connector = OpenAiConnector::new(OpenAiConfig::new("bad-key").with_api_base(server.uri())).unwrap();
        let err = connector.generate(request("hello")).await.unwrap_err();
        assert!(err.is_invalid_credential());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let connector = OpenAiConnector::new(OpenAiConfig::new("test-key").with_api_base(server.uri())).unwrap();
        let err = connector.generate(request("hello")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
