//! Configuration for the Anthropic model backend.

use serde::{Deserialize, Serialize};

/// Anthropic API configuration. One config per model name configured in
/// the dispatcher's priority list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// Anthropic API key
    pub api_key: String,
    /// Model to use (e.g., "claude-3-5-sonnet-20241022", "claude-3-haiku-20240307")
    pub model: String,
    /// API base URL
    pub api_base: String,
    /// Maximum tokens to generate. Anthropic requires this field on every
    /// request, unlike OpenAI where it is optional.
    pub max_tokens: u32,
    /// Temperature for generation (0.0 to 1.0)
    pub temperature: Option<f32>,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Extended-thinking token budget. `None` disables thinking mode even
    /// when the caller requests it.
    pub thinking_budget: Option<u32>,
}

impl AnthropicConfig {
    /// Create a new Anthropic config with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            api_base: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            temperature: Some(0.1),
            timeout_ms: 30_000,
            thinking_budget: None,
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the API base URL (for enterprise deployments or proxies)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set maximum tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self::new("") // Empty API key - must be set by user
    }
}
