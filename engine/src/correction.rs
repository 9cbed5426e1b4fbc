//! Thin, LLM-backed repair operations the update applier and chain refiner
//! call out to when they cannot resolve something from the graph alone.
//! Every service goes through the same `Dispatcher`, against a smaller,
//! cheaper model list with fallback to the primary list, and tolerates an
//! empty or unparseable reply by returning `None` so the caller can fall
//! back to its own default. A real dispatch failure (exhausted models,
//! cancellation, an invalid credential) is a different matter and is
//! propagated to the caller rather than swallowed into a default.

use crate::dispatcher::{CancellationToken, Dispatcher};
use crate::envelope::{parse_one_or_many_or_none, parse_option_index};
use cartography_core::debug::DebugPacket;
use cartography_core::errors::DispatchError;
use cartography_core::traits::GenerationRequest;
use tracing::warn;

/// Wraps a `Dispatcher` already configured over the correction-service
/// model list (smaller/cheaper models, falling back to the primary list).
/// Callers build one of these once and pass it to every phase that needs a
/// repair call.
pub struct CorrectionServices<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> CorrectionServices<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Dispatches one correction prompt. A non-credential dispatch failure
    /// (transient, exhausted, cancelled) degrades to `Ok(None)` so the
    /// caller can fall back to its own default; an invalid credential is
    /// fatal to the turn and is propagated instead.
    async fn ask(
        &self,
        label: &str,
        prompt: String,
        system_instruction: Option<String>,
        cancel: &CancellationToken,
        debug: &mut DebugPacket,
    ) -> Result<Option<String>, DispatchError> {
        let request = GenerationRequest {
            model: String::new(),
            prompt,
            system_instruction,
            json_schema: None,
            thinking_budget: None,
            temperature: 0.0,
            label: label.to_string(),
        };

        match self.dispatcher.dispatch(request, cancel, debug).await {
            Ok(outcome) => Ok(Some(outcome.response.text)),
            Err(err) if err.is_invalid_credential() => Err(err),
            Err(err) => {
                warn!(label, error = %err, "correction call failed, falling back to default");
                Ok(None)
            }
        }
    }

    /// Disambiguates two colliding `placeName`s by proposing a new, unique
    /// name for the incoming one.
    pub async fn disambiguate_rename(
        &self,
        colliding_name: &str,
        existing_names: &[String],
        cancel: &CancellationToken,
        debug: &mut DebugPacket,
    ) -> Result<Option<String>, DispatchError> {
        let prompt = format!(
            "The place name \"{colliding_name}\" collides with an existing node. \
             Existing names: {}. Reply with a single, short alternate name, nothing else.",
            existing_names.join(", ")
        );
        let Some(reply) = self.ask("rename-disambiguator", prompt, None, cancel, debug).await? else {
            return Ok(None);
        };
        let trimmed = reply.trim().trim_matches('"');
        Ok(if trimmed.is_empty() { None } else { Some(trimmed.to_string()) })
    }

    /// Falls back to an LLM identifier resolution when the plain lookup
    /// comes up empty, passing the raw identifier plus a text rendering of
    /// candidate nodes.
    pub async fn resolve_identifier(
        &self,
        raw_identifier: &str,
        map_rendering: &str,
        cancel: &CancellationToken,
        debug: &mut DebugPacket,
    ) -> Result<Option<String>, DispatchError> {
        let prompt = format!(
            "Which node id below best matches the reference \"{raw_identifier}\"?\n{map_rendering}\n\
             Reply with the exact node id only, or the single word \"none\"."
        );
        let Some(reply) = self.ask("identifier-resolver", prompt, None, cancel, debug).await? else {
            return Ok(None);
        };
        let trimmed = reply.trim().trim_matches('"');
        Ok(if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") { None } else { Some(trimmed.to_string()) })
    }

    /// One-shot "guess parent" call used when hierarchical node addition
    /// makes no progress after a full pass over the add queue.
    pub async fn guess_parent(
        &self,
        unresolved_place_name: &str,
        narrative_context: &str,
        map_rendering: &str,
        cancel: &CancellationToken,
        debug: &mut DebugPacket,
    ) -> Result<Option<String>, DispatchError> {
        let prompt = format!(
            "A new place called \"{unresolved_place_name}\" needs a parent node. \
             Narrative context: {narrative_context}\nCurrent map:\n{map_rendering}\n\
             Reply with the exact id of the best parent node, or the single word \"root\"."
        );
        let Some(reply) = self.ask("parent-guesser", prompt, None, cancel, debug).await? else {
            return Ok(None);
        };
        let trimmed = reply.trim().trim_matches('"');
        Ok(if trimmed.is_empty() { None } else { Some(trimmed.to_string()) })
    }

    /// When multiple hierarchy-conflict resolution "nets" survive
    /// simulation, ask the correction model to choose among them by
    /// numbered, human-readable description. Defaults to the first option
    /// if the reply is silent or unparseable.
    pub async fn choose_hierarchy_resolution(
        &self,
        options: &[String],
        cancel: &CancellationToken,
        debug: &mut DebugPacket,
    ) -> Result<usize, DispatchError> {
        let numbered = options
            .iter()
            .enumerate()
            .map(|(i, desc)| format!("{}. {}", i, desc))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Multiple ways to resolve a hierarchy conflict are possible:\n{numbered}\n\
             Reply with the single integer index of the best option."
        );
        let reply = self.ask("hierarchy-resolution-chooser", prompt, None, cancel, debug).await?;
        Ok(reply.and_then(|r| parse_option_index(&r)).filter(|i| *i < options.len()).unwrap_or(0))
    }

    /// The payload re-JSON-er: asks the model to reformat a reply that
    /// failed schema validation into strict JSON matching `schema`, folding
    /// a single-object-or-array reply into a `Vec<T>` either way.
    pub async fn rejson_one_or_many<T: serde::de::DeserializeOwned>(
        &self,
        malformed_reply: &str,
        schema: &serde_json::Value,
        cancel: &CancellationToken,
        debug: &mut DebugPacket,
    ) -> Result<Option<Vec<T>>, DispatchError> {
        let prompt = format!(
            "The following reply failed schema validation:\n{malformed_reply}\n\n\
             Reformat it as strict JSON matching this schema, with no commentary:\n{schema}"
        );
        let Some(reply) = self.ask("payload-rejson", prompt, None, cancel, debug).await? else {
            return Ok(None);
        };
        Ok(parse_one_or_many_or_none(&reply))
    }
}
