//! Gemini generateContent API data models

use serde::{Deserialize, Serialize};

/// Gemini generateContent request
#[derive(Debug, Serialize)]
pub struct ContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

/// Content part of a request
#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>, // "user" or "model"
}

/// Part of a content
#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// Generation configuration
#[derive(Debug, Serialize)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
pub struct ThinkingConfig {
    pub thinking_budget: u32,
}

/// Gemini generateContent response
#[derive(Debug, Deserialize)]
pub struct ContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

/// Candidate in the response
#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: ContentResult,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Content in the response
#[derive(Debug, Deserialize)]
pub struct ContentResult {
    #[serde(default)]
    pub parts: Vec<PartResult>,
}

/// Part in the response
#[derive(Debug, Deserialize)]
pub struct PartResult {
    #[serde(default)]
    pub text: String,
}

/// Usage metadata
#[derive(Debug, Deserialize)]
pub struct UsageMetadata {
    pub prompt_token_count: u32,
    pub candidates_token_count: u32,
}

/// Gemini error response
#[derive(Debug, Deserialize)]
pub struct GeminiError {
    pub error: ErrorDetails,
}

/// Error details
#[derive(Debug, Deserialize)]
pub struct ErrorDetails {
    pub code: u32,
    pub message: String,
    pub status: String,
}

impl Content {
    pub fn new_user(text: impl Into<String>) -> Self {
        Self { parts: vec![Part { text: text.into() }], role: Some("user".to_string()) }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self { parts: vec![Part { text: text.into() }], role: None }
    }
}
