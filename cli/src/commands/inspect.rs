//! `cartctl inspect`: prints a node, or the whole map, in human-readable
//! form. Grounded on `kgctl::output`'s table/JSON formatting split.

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};
use crate::output;
use cartography_store::GraphStore;
use std::path::Path;

pub fn handle_inspect(map_path: &Path, node: Option<&str>, format: OutputFormat) -> CliResult<()> {
    let raw = std::fs::read_to_string(map_path)?;
    let store: GraphStore = serde_json::from_str(&raw)?;

    match node {
        Some(identifier) => {
            let resolved =
                store.find_node_by_identifier(identifier, None, None).map(|n| n.id.clone()).ok_or_else(|| CliError::NodeNotFound(identifier.to_string()))?;
            output::display_node(&store, &resolved, format)
        }
        None => output::display_map(&store, format),
    }
}
