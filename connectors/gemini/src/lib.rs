//! Gemini model backend for the cartography engine's model dispatcher.

use async_trait::async_trait;
use cartography_core::errors::DispatchError;
use cartography_core::traits::{GenerationRequest, GenerationResponse, ModelBackend, ModelCapabilities};
use reqwest::{Client, StatusCode};
use tracing::debug;

mod config;
mod models;

pub use config::GeminiConfig;
use models::*;

pub struct GeminiConnector {
    client: Client,
    config: GeminiConfig,
}

impl GeminiConnector {
    pub fn new(config: GeminiConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DispatchError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn generate_content_url(&self) -> String {
        let base = &self.config.api_base;
        let model = &self.config.model;
        match &self.config.project_id {
            Some(project_id) => format!("{base}/projects/{project_id}/models/{model}:generateContent"),
            None => format!("{base}/models/{model}:generateContent"),
        }
    }

    fn build_request(&self, request: &GenerationRequest) -> ContentRequest {
        ContentRequest {
            contents: vec![Content::new_user(&request.prompt)],
            system_instruction: request.system_instruction.as_ref().map(Content::system),
            generation_config: Some(GenerationConfig {
                temperature: Some(request.temperature),
                max_output_tokens: self.config.max_tokens,
                response_mime_type: request.json_schema.as_ref().map(|_| "application/json".to_string()),
                response_schema: request.json_schema.clone(),
                thinking_config: request.thinking_budget.or(self.config.thinking_budget).map(|budget| ThinkingConfig {
                    thinking_budget: budget,
                }),
            }),
        }
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
impl ModelBackend for GeminiConnector {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            supports_system_instruction: true,
            supports_thinking: true,
            supports_json_schema: true,
        }
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, DispatchError> {
        debug!(model = %self.config.model, label = %request.label, "dispatching gemini request");

        let content_request = self.build_request(&request);
        let url = format!("{}?key={}", self.generate_content_url(), self.config.api_key);

        let response = self
            .client
            .post(url)
            .json(&content_request)
            .send()
            .await
            .map_err(|e| DispatchError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Self::classify_status(status, body));
        }

        let content_response: ContentResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Internal(format!("failed to parse response: {e}")))?;

        let text = content_response
            .candidates
            .iter()
            .flat_map(|c| &c.content.parts)
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return Err(DispatchError::Internal("no text content in response".to_string()));
        }

        Ok(GenerationResponse { text, model: self.config.model.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartography_core::traits::GenerationRequest;
    use serde_json::json;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            model: "gemini-1.5-pro".to_string(),
            prompt: prompt.to_string(),
            system_instruction: Some("You are a cartographer.".to_string()),
            json_schema: None,
            thinking_budget: None,
            temperature: 0.2,
            label: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn generate_joins_multiple_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/models/.*:generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "{\"nodes_to_add\":"}, {"text": "[]}"}]}}],
                "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5}
            })))
            .mount(&server)
            .await;

        let connector = GeminiConnector::new(GeminiConfig::new("test-key").with_api_base(server.uri())).unwrap();
        let response = connector.generate(request("describe the room")).await.unwrap();
        assert_eq!(response.text, "{\"nodes_to_add\":\n[]}");
    }

    #[tokio::test]
    async fn forbidden_status_maps_to_invalid_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/models/.*:generateContent$"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let connector = GeminiConnector::new(GeminiConfig::new("bad-key").with_api_base(server.uri())).unwrap();
        let err = connector.generate(request("hello")).await.unwrap_err();
        assert!(err.is_invalid_credential());
    }
}
