//! The `ModelBackend` plugin interface: one implementation per LLM
//! provider (connectors/openai, connectors/anthropic, connectors/gemini),
//! dispatched over by the model dispatcher in the `engine` crate.

use crate::errors::DispatchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-model capability flags the dispatcher consults before building a
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_system_instruction: bool,
    pub supports_thinking: bool,
    pub supports_json_schema: bool,
}

/// A single text-generation request, provider-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub system_instruction: Option<String>,
    /// Present only when the model's capabilities report schema support;
    /// otherwise the dispatcher folds this into `system_instruction` as
    /// text before the backend ever sees it.
    pub json_schema: Option<serde_json::Value>,
    pub thinking_budget: Option<u32>,
    pub temperature: f32,
    /// Telemetry label, e.g. "map-update", "chain-refine", "guess-parent".
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub model: String,
}

/// Implemented once per provider. The dispatcher is the only caller;
/// retries, rate pacing, and fallback all live in `engine::dispatcher`.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Stable name used for rate-limit bucketing and debug-trace labels.
    fn name(&self) -> &str;

    fn capabilities(&self) -> ModelCapabilities;

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, DispatchError>;
}

/// One attempt's worth of dispatcher bookkeeping, appended to a
/// caller-supplied debug-log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAttempt {
    pub model: String,
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success { raw_response: String },
    Error { message: String },
}
