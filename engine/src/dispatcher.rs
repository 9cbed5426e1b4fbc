//! The model dispatcher: sends a single text-generation request to a
//! priority-ordered list of models with capability gating, shared rate
//! pacing, per-model retries, and typed-error classification.

use cartography_core::debug::DebugPacket;
use cartography_core::errors::DispatchError;
use cartography_core::traits::{AttemptOutcome, DispatchAttempt, GenerationRequest, GenerationResponse, ModelBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retries attempted per model before falling through to the next one.
const MAX_RETRIES_PER_MODEL: u32 = 3;

/// Floor observed before every call against a rate-limited model, plus
/// whatever backoff the previous failure accrued.
const RATE_LIMIT_FLOOR: Duration = Duration::from_millis(5000);

/// A process-wide, mutex-guarded pacing counter: the only state a
/// `Dispatcher` shares across turns. Injected as a service rather than
/// reached for as a global.
#[derive(Debug)]
pub struct RateLimiter {
    next_allowed: Mutex<Option<Instant>>,
    floor: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { next_allowed: Mutex::new(None), floor: RATE_LIMIT_FLOOR }
    }

    /// A limiter with a caller-chosen floor, used by tests so the pacing
    /// logic can be exercised without a real 5-second wait.
    pub fn new_with_floor(floor: Duration) -> Self {
        Self { next_allowed: Mutex::new(None), floor }
    }

    /// Sleep until the shared floor has elapsed, then reserve the next
    /// window. `backoff` is added on top of the floor; the first call
    /// observes the floor too, since `backoff` starts at zero.
    async fn wait_and_reserve(&self, backoff: Duration, cancel: &CancellationToken) -> Result<(), DispatchError> {
        let wait_until = {
            let mut guard = self.next_allowed.lock().await;
            let now = Instant::now();
            let earliest = guard.map(|t| t.max(now)).unwrap_or(now);
            let wait_until = earliest + self.floor + backoff;
            *guard = Some(wait_until);
            wait_until
        };

        let remaining = wait_until.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            sleep_cancellable(remaining, cancel).await?;
        }
        Ok(())
    }
}

/// Simple cooperative cancellation signal: checked between attempts and
/// during backoff sleeps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> Result<(), DispatchError> {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        tokio::time::sleep(remaining.min(Duration::from_millis(200))).await;
    }
}

/// What the dispatcher handed back on success: the raw text, the model
/// that produced it, and the resolved prompt/system instruction so the
/// caller can thread them into a debug packet without re-deriving them.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub response: GenerationResponse,
    pub prompt: String,
    pub system_instruction: Option<String>,
}

/// Delivers a single request across a prioritized list of backends,
/// applying capability gating, retry, and fallthrough.
pub struct Dispatcher {
    models: Vec<Arc<dyn ModelBackend>>,
    rate_limiter: Arc<RateLimiter>,
}

impl Dispatcher {
    pub fn new(models: Vec<Arc<dyn ModelBackend>>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { models, rate_limiter }
    }

    /// Run `request` against the configured model list, recording each
    /// attempt in `debug`. Returns the first success; falls through to the
    /// next model on exhausted retries; short-circuits on an invalid
    /// credential.
    pub async fn dispatch(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
        debug: &mut DebugPacket,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut last_error: Option<DispatchError> = None;

        for backend in &self.models {
            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            let capabilities = backend.capabilities();
            let (effective_prompt, effective_system_instruction) =
                fold_schema_into_instruction(&request, capabilities.supports_json_schema);

            debug!(model = backend.name(), label = %request.label, "dispatching");

            match self
                .attempt_with_retries(backend.as_ref(), &request, &effective_prompt, &effective_system_instruction, cancel, debug)
                .await
            {
                Ok(response) => {
                    return Ok(DispatchOutcome {
                        response,
                        prompt: effective_prompt,
                        system_instruction: effective_system_instruction,
                    });
                }
                Err(err) => {
                    if err.is_invalid_credential() {
                        warn!(model = backend.name(), "invalid credential, short-circuiting dispatch");
                        return Err(err);
                    }
                    if matches!(err, DispatchError::Cancelled) {
                        return Err(err);
                    }
                    warn!(model = backend.name(), error = %err, "model exhausted, falling through");
                    last_error = Some(err);
                }
            }
        }

        let last = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no models configured".to_string());
        Err(DispatchError::ModelsExhausted(last))
    }

    async fn attempt_with_retries(
        &self,
        backend: &dyn ModelBackend,
        request: &GenerationRequest,
        prompt: &str,
        system_instruction: &Option<String>,
        cancel: &CancellationToken,
        debug: &mut DebugPacket,
    ) -> Result<GenerationResponse, DispatchError> {
        let mut backoff = Duration::ZERO;
        let mut last_error = DispatchError::Internal("no attempts made".to_string());

        for attempt in 0..MAX_RETRIES_PER_MODEL {
            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            self.rate_limiter.wait_and_reserve(backoff, cancel).await?;

            let attempt_request = GenerationRequest {
                prompt: prompt.to_string(),
                system_instruction: system_instruction.clone(),
                ..request.clone()
            };

            match backend.generate(attempt_request).await {
                Ok(response) => {
                    debug.record_attempt(DispatchAttempt {
                        model: backend.name().to_string(),
                        prompt: prompt.to_string(),
                        system_instruction: system_instruction.clone(),
                        outcome: AttemptOutcome::Success { raw_response: response.text.clone() },
                    });
                    return Ok(response);
                }
                Err(err) => {
                    debug.record_attempt(DispatchAttempt {
                        model: backend.name().to_string(),
                        prompt: prompt.to_string(),
                        system_instruction: system_instruction.clone(),
                        outcome: AttemptOutcome::Error { message: err.to_string() },
                    });

                    if err.is_invalid_credential() {
                        return Err(err);
                    }
                    if !err.is_retryable() {
                        return Err(err);
                    }

                    warn!(model = backend.name(), attempt, error = %err, "retryable error");
                    last_error = err;
                    backoff = backoff + Duration::from_millis(500 * (attempt as u64 + 1));
                }
            }
        }

        Err(last_error)
    }
}

/// When the model cannot enforce a schema natively, the schema (if any)
/// is serialized textually and appended to the system instruction instead
/// of being dropped.
fn fold_schema_into_instruction(request: &GenerationRequest, supports_json_schema: bool) -> (String, Option<String>) {
    if supports_json_schema || request.json_schema.is_none() {
        return (request.prompt.clone(), request.system_instruction.clone());
    }

    let schema_text = request
        .json_schema
        .as_ref()
        .map(|schema| format!("Respond with JSON matching this schema:\n{}", schema))
        .unwrap_or_default();

    let instruction = match &request.system_instruction {
        Some(existing) => format!("{existing}\n\n{schema_text}"),
        None => schema_text,
    };

    (request.prompt.clone(), Some(instruction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cartography_core::traits::ModelCapabilities;
    use std::sync::atomic::AtomicU32;

    struct FlakyBackend {
        name: String,
        capabilities: ModelCapabilities,
        fail_times: AtomicU32,
        error: fn() -> DispatchError,
    }

    #[async_trait]
    impl ModelBackend for FlakyBackend {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> ModelCapabilities {
            self.capabilities
        }

        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, DispatchError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err((self.error)());
            }
            Ok(GenerationResponse { text: format!("ok:{}", request.prompt), model: self.name.clone() })
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "primary".to_string(),
            prompt: "hello".to_string(),
            system_instruction: None,
            json_schema: None,
            thinking_budget: None,
            temperature: 0.2,
            label: "test".to_string(),
        }
    }

    fn capabilities() -> ModelCapabilities {
        ModelCapabilities { supports_system_instruction: true, supports_thinking: false, supports_json_schema: true }
    }

    #[tokio::test]
    async fn succeeds_after_transient_retries_within_one_model() {
        let backend = Arc::new(FlakyBackend {
            name: "primary".to_string(),
            capabilities: capabilities(),
            fail_times: AtomicU32::new(2),
            error: || DispatchError::Transient("timeout".to_string()),
        });
        let dispatcher = Dispatcher::new(vec![backend], Arc::new(RateLimiter::new_with_floor(Duration::from_millis(1))));
        let mut debug = DebugPacket::default();
        let cancel = CancellationToken::new();

        let outcome = dispatcher.dispatch(request(), &cancel, &mut debug).await.unwrap();
        assert_eq!(outcome.response.text, "ok:hello");
        assert_eq!(debug.model_calls.len(), 3);
    }

    #[tokio::test]
    async fn falls_through_to_next_model_on_exhaustion() {
        let bad = Arc::new(FlakyBackend {
            name: "flaky".to_string(),
            capabilities: capabilities(),
            fail_times: AtomicU32::new(99),
            error: || DispatchError::ServerOrClient { status: 503, body: "busy".to_string() },
        });
        let good = Arc::new(FlakyBackend {
            name: "backup".to_string(),
            capabilities: capabilities(),
            fail_times: AtomicU32::new(0),
            error: || DispatchError::Internal("unused".to_string()),
        });
        let dispatcher = Dispatcher::new(vec![bad, good], Arc::new(RateLimiter::new_with_floor(Duration::from_millis(1))));
        let mut debug = DebugPacket::default();
        let cancel = CancellationToken::new();

        let outcome = dispatcher.dispatch(request(), &cancel, &mut debug).await.unwrap();
        assert_eq!(outcome.response.model, "backup");
    }

    #[tokio::test]
    async fn invalid_credential_short_circuits_without_trying_next_model() {
        let bad = Arc::new(FlakyBackend {
            name: "primary".to_string(),
            capabilities: capabilities(),
            fail_times: AtomicU32::new(99),
            error: || DispatchError::InvalidCredential,
        });
        let unreached = Arc::new(FlakyBackend {
            name: "backup".to_string(),
            capabilities: capabilities(),
            fail_times: AtomicU32::new(0),
            error: || DispatchError::Internal("unused".to_string()),
        });
        let dispatcher = Dispatcher::new(vec![bad, unreached], Arc::new(RateLimiter::new_with_floor(Duration::from_millis(1))));
        let mut debug = DebugPacket::default();
        let cancel = CancellationToken::new();

        let err = dispatcher.dispatch(request(), &cancel, &mut debug).await.unwrap_err();
        assert!(err.is_invalid_credential());
        assert_eq!(debug.model_calls.len(), 1);
    }

    #[tokio::test]
    async fn all_models_exhausted_surfaces_last_error() {
        let a = Arc::new(FlakyBackend {
            name: "a".to_string(),
            capabilities: capabilities(),
            fail_times: AtomicU32::new(99),
            error: || DispatchError::Transient("down".to_string()),
        });
        let dispatcher = Dispatcher::new(vec![a], Arc::new(RateLimiter::new_with_floor(Duration::from_millis(1))));
        let mut debug = DebugPacket::default();
        let cancel = CancellationToken::new();

        let err = dispatcher.dispatch(request(), &cancel, &mut debug).await.unwrap_err();
        assert!(matches!(err, DispatchError::ModelsExhausted(_)));
        assert_eq!(debug.model_calls.len(), 3);
    }

    #[tokio::test]
    async fn cancellation_is_honored_before_any_attempt() {
        let a = Arc::new(FlakyBackend {
            name: "a".to_string(),
            capabilities: capabilities(),
            fail_times: AtomicU32::new(0),
            error: || DispatchError::Internal("unused".to_string()),
        });
        let dispatcher = Dispatcher::new(vec![a], Arc::new(RateLimiter::new_with_floor(Duration::from_millis(1))));
        let mut debug = DebugPacket::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = dispatcher.dispatch(request(), &cancel, &mut debug).await.unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
    }

    #[test]
    fn schema_is_folded_into_system_instruction_when_unsupported() {
        let mut request = request();
        request.json_schema = Some(serde_json::json!({"type": "object"}));
        request.system_instruction = Some("Be terse.".to_string());

        let (_, instruction) = fold_schema_into_instruction(&request, false);
        let instruction = instruction.unwrap();
        assert!(instruction.contains("Be terse."));
        assert!(instruction.contains("\"type\":\"object\"") || instruction.contains("type"));
    }

    #[test]
    fn schema_is_left_alone_when_supported() {
        let mut request = request();
        request.json_schema = Some(serde_json::json!({"type": "object"}));
        let (_, instruction) = fold_schema_into_instruction(&request, true);
        assert!(instruction.is_none());
    }
}
