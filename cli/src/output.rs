//! Output formatting, grounded on `kgctl::output`'s table/JSON split.

use crate::cli::OutputFormat;
use crate::error::CliResult;
use cartography_core::pathfind::Step;
use cartography_store::GraphStore;
use colored::*;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    place_name: String,
    #[tabled(rename = "Type")]
    node_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Parent")]
    parent: String,
}

#[derive(Tabled)]
struct EdgeRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Type")]
    edge_type: String,
    #[tabled(rename = "Status")]
    status: String,
}

pub fn display_map(store: &GraphStore, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(store)?);
        }
        OutputFormat::Table => {
            let mut nodes: Vec<NodeRow> = store
                .nodes()
                .values()
                .map(|n| NodeRow {
                    id: n.id.clone(),
                    place_name: n.place_name.clone(),
                    node_type: format!("{:?}", n.node_type),
                    status: format!("{:?}", n.status),
                    parent: n.parent_node_id.clone().unwrap_or_else(|| "Universe".to_string()),
                })
                .collect();
            nodes.sort_by(|a, b| a.id.cmp(&b.id));
            println!("{}", "Nodes".bold().blue());
            println!("{}", Table::new(nodes));

            let mut edges: Vec<EdgeRow> = store
                .edges()
                .values()
                .map(|e| EdgeRow {
                    id: e.id.clone(),
                    source: e.source_node_id.clone(),
                    target: e.target_node_id.clone(),
                    edge_type: format!("{:?}", e.edge_type),
                    status: format!("{:?}", e.status),
                })
                .collect();
            edges.sort_by(|a, b| a.id.cmp(&b.id));
            println!();
            println!("{}", "Edges".bold().blue());
            println!("{}", Table::new(edges));
        }
    }
    Ok(())
}

pub fn display_node(store: &GraphStore, node_id: &str, format: OutputFormat) -> CliResult<()> {
    let node = store.node(node_id);
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&node)?);
        }
        OutputFormat::Table => match node {
            Some(node) => {
                println!("{:<12} {}", "ID:".bold(), node.id);
                println!("{:<12} {}", "Name:".bold(), node.place_name);
                println!("{:<12} {:?}", "Type:".bold(), node.node_type);
                println!("{:<12} {:?}", "Status:".bold(), node.status);
                println!("{:<12} {}", "Description:".bold(), node.description);
                println!("{:<12} {}", "Aliases:".bold(), node.aliases.join(", "));
                println!("{:<12} {}", "Parent:".bold(), node.parent_node_id.as_deref().unwrap_or("Universe"));
                println!("{:<12} {}", "Visited:".bold(), node.visited);
            }
            None => println!("{}", "node not found".red()),
        },
    }
    Ok(())
}

pub fn display_path(steps: &[Step], format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let rendered: Vec<String> = steps
                .iter()
                .map(|s| match s {
                    Step::Node(id) => format!("node:{id}"),
                    Step::Edge(id) => format!("edge:{id}"),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
        OutputFormat::Table => {
            for step in steps {
                match step {
                    Step::Node(id) => println!("{} {}", "node".blue(), id),
                    Step::Edge(id) => println!("{} {}", "edge".green(), id),
                }
            }
        }
    }
    Ok(())
}
