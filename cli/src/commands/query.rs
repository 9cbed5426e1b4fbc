//! `cartctl query`: C9 pathfinding between two identifiers.

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};
use crate::output;
use cartography_core::pathfind::{self, Adjacency};
use cartography_store::GraphStore;
use std::path::Path;

pub fn handle_query(map_path: &Path, from: &str, to: &str, format: OutputFormat) -> CliResult<()> {
    let raw = std::fs::read_to_string(map_path)?;
    let store: GraphStore = serde_json::from_str(&raw)?;

    let from_id = store.find_node_by_identifier(from, None, None).map(|n| n.id.clone()).ok_or_else(|| CliError::NodeNotFound(from.to_string()))?;
    let to_id = store.find_node_by_identifier(to, None, None).map(|n| n.id.clone()).ok_or_else(|| CliError::NodeNotFound(to.to_string()))?;

    let adjacency = Adjacency::build(store.nodes(), store.edges());
    let steps = pathfind::shortest_path(&adjacency, &from_id, &to_id).ok_or(CliError::NoPath)?;

    output::display_path(&steps, format)
}
