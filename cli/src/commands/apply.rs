//! `cartctl apply`: runs one full C8 → C7 turn against a map snapshot.

use crate::error::CliResult;
use cartography_core::types::{InventoryItem, Npc};
use cartography_engine::dispatcher::CancellationToken;
use cartography_engine::orchestrator::{MapUpdateOrchestrator, TurnInput};
use cartography_store::GraphStore;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// The on-disk shape of a narrative-context file, owned so `TurnInput`'s
/// borrowed fields can reference it for the duration of the call.
#[derive(Debug, Deserialize)]
pub struct NarrativeContextFile {
    pub scene_description: String,
    pub log_message: String,
    pub local_place: String,
    #[serde(default)]
    pub map_hint: String,
    #[serde(default)]
    pub theme_name: String,
    #[serde(default)]
    pub theme_guidance: String,
    #[serde(default)]
    pub previous_node_id: Option<String>,
    #[serde(default)]
    pub known_main_place_names: Vec<String>,
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    #[serde(default)]
    pub npcs: Vec<Npc>,
    #[serde(default)]
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub destination_node_id: Option<String>,
}

pub async fn handle_apply(
    orchestrator: &MapUpdateOrchestrator,
    map_path: &Path,
    context_path: &Path,
    out_path: &Path,
) -> CliResult<()> {
    let mut store = if map_path.exists() {
        let raw = std::fs::read_to_string(map_path)?;
        serde_json::from_str(&raw)?
    } else {
        info!("map snapshot {} does not exist, starting from an empty graph", map_path.display());
        GraphStore::new()
    };

    let raw_context = std::fs::read_to_string(context_path)?;
    let context: NarrativeContextFile = serde_json::from_str(&raw_context)?;

    let turn = TurnInput {
        scene_description: &context.scene_description,
        log_message: &context.log_message,
        local_place: &context.local_place,
        map_hint: &context.map_hint,
        theme_name: &context.theme_name,
        theme_guidance: &context.theme_guidance,
        previous_node_id: context.previous_node_id.as_deref(),
        known_main_place_names: &context.known_main_place_names,
        inventory: &context.inventory,
        npcs: &context.npcs,
        current_node_id: context.current_node_id.clone(),
        destination_node_id: context.destination_node_id.clone(),
    };

    let cancel = CancellationToken::new();
    let (outcome, debug) = orchestrator.run(&mut store, turn, &cancel).await?;

    let rendered = serde_json::to_string_pretty(&store)?;
    std::fs::write(out_path, rendered)?;

    match outcome {
        Some(result) => {
            println!("added {} node(s), {} edge(s)", result.added_node_ids.len(), result.added_edge_ids.len());
        }
        None => println!("turn produced no applicable update"),
    }
    if !debug.warnings.is_empty() {
        println!("warnings:");
        for warning in &debug.warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}
