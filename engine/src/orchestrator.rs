//! The public entry point. Builds the narrator-to-cartographer prompt from
//! narrative context, dispatches it, parses the reply, and hands the
//! validated payload off to the applier.

use crate::applier::{ApplyContext, ApplyOutcome};
use crate::applier;
use crate::dispatcher::{CancellationToken, Dispatcher};
use crate::envelope;
use cartography_core::debug::DebugPacket;
use cartography_core::errors::{ApplierError, CartographyError, CartographyResult, ChainError};
use cartography_core::traits::GenerationRequest;
use cartography_core::types::{InventoryItem, NodeType, Npc};
use cartography_store::GraphStore;

/// Everything the narrator hands the orchestrator for a single turn.
pub struct TurnInput<'a> {
    pub scene_description: &'a str,
    pub log_message: &'a str,
    pub local_place: &'a str,
    pub map_hint: &'a str,
    pub theme_name: &'a str,
    pub theme_guidance: &'a str,
    pub previous_node_id: Option<&'a str>,
    pub known_main_place_names: &'a [String],
    pub inventory: &'a [InventoryItem],
    pub npcs: &'a [Npc],
    pub current_node_id: Option<String>,
    pub destination_node_id: Option<String>,
}

pub struct MapUpdateOrchestrator {
    dispatcher: Dispatcher,
}

fn render_map(store: &GraphStore) -> String {
    let mut node_lines: Vec<String> = store
        .nodes()
        .values()
        .map(|n| format!("- {} [{}] ({:?}/{:?}) parent={:?}", n.id, n.place_name, n.node_type, n.status, n.parent_node_id))
        .collect();
    node_lines.sort();

    let mut edge_lines: Vec<String> = store
        .edges()
        .values()
        .map(|e| format!("- {} --[{:?}/{:?}]--> {}", e.source_node_id, e.edge_type, e.status, e.target_node_id))
        .collect();
    edge_lines.sort();

    format!("Nodes:\n{}\nEdges:\n{}", node_lines.join("\n"), edge_lines.join("\n"))
}

fn system_instruction() -> String {
    let node_types = NodeType::ALL_IN_DEPTH_ORDER.iter().map(|t| format!("{t:?}")).collect::<Vec<_>>().join(", ");
    let node_statuses = ["Undiscovered", "Discovered", "Rumored", "QuestTarget", "Blocked"].join(", ");
    let edge_types = [
        "Path", "Road", "SeaRoute", "Door", "Teleporter", "SecretPassage", "RiverCrossing", "TemporaryBridge", "BoardingHook",
        "Shortcut",
    ]
    .join(", ");
    let edge_statuses = [
        "Open", "Accessible", "Closed", "Locked", "Blocked", "Hidden", "Rumored", "OneWay", "Collapsed", "Removed", "Active",
        "Inactive",
    ]
    .join(", ");

    format!(
        "You are the Cartographer. Given the scene below, reply with a single \
         JSON object matching the MapUpdate schema: nodesToAdd, nodesToUpdate, \
         nodesToRemove, edgesToAdd, edgesToUpdate, edgesToRemove, and optional \
         suggestedCurrentMapNodeId, observations, rationale. Every field is \
         optional; omit fields with no change.\n\
         Node types (containment order, shallowest first): {node_types}.\n\
         Node statuses: {node_statuses}.\n\
         Edge types: {edge_types}.\n\
         Edge statuses: {edge_statuses}.\n\
         Rules: a node's parent must be strictly shallower than the node unless \
         both are Feature (a conflict the engine resolves). A Feature may not \
         parent another node. Edges may only connect Feature nodes whose parents \
         share a parent or grandparent, unless the edge type is Shortcut. Use the \
         literal string \"Universe\" for a node with no parent. Reply with JSON only, \
         no commentary."
    )
}

fn build_prompt(store: &GraphStore, turn: &TurnInput<'_>) -> String {
    let inventory_names: Vec<&str> = turn.inventory.iter().map(|i| i.name.as_str()).collect();
    let npc_names: Vec<&str> = turn.npcs.iter().map(|n| n.name.as_str()).collect();

    format!(
        "Scene: {}\nLog: {}\nLocal place: {}\nMap hint: {}\nTheme: {} ({})\n\
         Previous node id: {}\nKnown main places: {}\nInventory: {}\nNPCs: {}\n\
         Current map:\n{}",
        turn.scene_description,
        turn.log_message,
        turn.local_place,
        turn.map_hint,
        turn.theme_name,
        turn.theme_guidance,
        turn.previous_node_id.unwrap_or("none"),
        turn.known_main_place_names.join(", "),
        inventory_names.join(", "),
        npc_names.join(", "),
        render_map(store),
    )
}

impl MapUpdateOrchestrator {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Runs one full turn: dispatch, parse, apply. A null or invalid
    /// payload returns `(None, debug)` rather than an error; only an
    /// invalid credential terminates the turn.
    pub async fn run(
        &self,
        store: &mut GraphStore,
        turn: TurnInput<'_>,
        cancel: &CancellationToken,
    ) -> CartographyResult<(Option<ApplyOutcome>, DebugPacket)> {
        let mut debug = DebugPacket::default();

        let prompt = build_prompt(store, &turn);
        let system = system_instruction();
        debug.prompt = Some(prompt.clone());
        debug.system_instruction = Some(system.clone());

        let request = GenerationRequest {
            model: String::new(),
            prompt,
            system_instruction: Some(system),
            json_schema: None,
            thinking_budget: None,
            temperature: 0.7,
            label: "map-update".to_string(),
        };

        let outcome = match self.dispatcher.dispatch(request, cancel, &mut debug).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_invalid_credential() {
                    return Err(CartographyError::InvalidCredential);
                }
                debug.warn(format!("map-update dispatch failed, treating as null payload: {err}"));
                return Ok((None, debug));
            }
        };

        debug.raw_response = Some(outcome.response.text.clone());

        let update = match envelope::parse_map_update(&outcome.response.text) {
            Ok(update) => update,
            Err(err) => {
                debug.validation_errors.push(err.to_string());
                debug.warn(format!("map-update envelope failed to parse, treating as null payload: {err}"));
                return Ok((None, debug));
            }
        };
        debug.parsed_payload = serde_json::to_value(&update).ok();

        let ctx = ApplyContext {
            narrative_context: turn.scene_description,
            inventory: turn.inventory,
            npcs: turn.npcs,
            dispatcher: &self.dispatcher,
            current_node_id: turn.current_node_id,
            destination_node_id: turn.destination_node_id,
        };

        match applier::apply_map_update(store, update, &ctx, cancel, &mut debug).await {
            Ok(result) => Ok((Some(result), debug)),
            Err(ApplierError::Dispatch(err)) if err.is_invalid_credential() => Err(CartographyError::InvalidCredential),
            Err(ApplierError::Chain(ChainError::CorrectionFailed(err))) if err.is_invalid_credential() => {
                Err(CartographyError::InvalidCredential)
            }
            Err(err) => {
                debug.warn(format!("applier error, treating as null payload: {err}"));
                Ok((None, debug))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::RateLimiter;
    use async_trait::async_trait;
    use cartography_core::errors::DispatchError;
    use cartography_core::traits::{GenerationResponse, ModelBackend, ModelCapabilities};
    use std::sync::Arc;
    use std::time::Duration;

    struct ScriptedBackend {
        reply: String,
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }
        fn capabilities(&self) -> ModelCapabilities {
            ModelCapabilities { supports_system_instruction: true, supports_thinking: false, supports_json_schema: false }
        }
        async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, DispatchError> {
            Ok(GenerationResponse { text: self.reply.clone(), model: "scripted".to_string() })
        }
    }

    fn orchestrator_with_reply(reply: &str) -> MapUpdateOrchestrator {
        let backend = Arc::new(ScriptedBackend { reply: reply.to_string() });
        let dispatcher = Dispatcher::new(vec![backend], Arc::new(RateLimiter::new_with_floor(Duration::from_millis(1))));
        MapUpdateOrchestrator::new(dispatcher)
    }

    fn turn_input<'a>(known_places: &'a [String], inventory: &'a [InventoryItem], npcs: &'a [Npc]) -> TurnInput<'a> {
        TurnInput {
            scene_description: "A quiet clearing.",
            log_message: "You step into a clearing.",
            local_place: "Whispering Woods",
            map_hint: "forest",
            theme_name: "Fantasy",
            theme_guidance: "classic high fantasy",
            previous_node_id: None,
            known_main_place_names: known_places,
            inventory,
            npcs,
            current_node_id: None,
            destination_node_id: None,
        }
    }

    #[tokio::test]
    async fn null_payload_on_unparseable_reply_does_not_error() {
        let orchestrator = orchestrator_with_reply("not json at all");
        let mut store = GraphStore::new();
        let known_places: Vec<String> = Vec::new();
        let inventory: Vec<InventoryItem> = Vec::new();
        let npcs: Vec<Npc> = Vec::new();
        let cancel = CancellationToken::new();

        let (outcome, debug) =
            orchestrator.run(&mut store, turn_input(&known_places, &inventory, &npcs), &cancel).await.unwrap();
        assert!(outcome.is_none());
        assert!(!debug.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn valid_payload_adds_a_node() {
        let reply = r#"{"nodes_to_add":[{"place_name":"Stone Altar","node_type":"feature","parent_node_id":"Universe"}]}"#;
        let orchestrator = orchestrator_with_reply(reply);
        let mut store = GraphStore::new();
        let known_places: Vec<String> = Vec::new();
        let inventory: Vec<InventoryItem> = Vec::new();
        let npcs: Vec<Npc> = Vec::new();
        let cancel = CancellationToken::new();

        let (outcome, _debug) =
            orchestrator.run(&mut store, turn_input(&known_places, &inventory, &npcs), &cancel).await.unwrap();
        let outcome = outcome.unwrap();
        assert_eq!(outcome.added_node_ids.len(), 1);
        assert_eq!(store.nodes().len(), 1);
    }

    #[tokio::test]
    async fn invalid_credential_terminates_the_turn() {
        struct FailingBackend;
        #[async_trait]
        impl ModelBackend for FailingBackend {
            fn name(&self) -> &str {
                "failing"
            }
            fn capabilities(&self) -> ModelCapabilities {
                ModelCapabilities { supports_system_instruction: true, supports_thinking: false, supports_json_schema: false }
            }
            async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, DispatchError> {
                Err(DispatchError::InvalidCredential)
            }
        }

        let dispatcher =
            Dispatcher::new(vec![Arc::new(FailingBackend)], Arc::new(RateLimiter::new_with_floor(Duration::from_millis(1))));
        let orchestrator = MapUpdateOrchestrator::new(dispatcher);
        let mut store = GraphStore::new();
        let known_places: Vec<String> = Vec::new();
        let inventory: Vec<InventoryItem> = Vec::new();
        let npcs: Vec<Npc> = Vec::new();
        let cancel = CancellationToken::new();

        let result = orchestrator.run(&mut store, turn_input(&known_places, &inventory, &npcs), &cancel).await;
        assert!(matches!(result, Err(CartographyError::InvalidCredential)));
    }
}
