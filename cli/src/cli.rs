//! CLI argument definitions, grounded on `kgctl::cli`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cartctl")]
#[command(about = "Cartography engine control tool")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(short = 'f', long, global = true, value_enum)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply a narrative-context turn to a map snapshot
    Apply {
        /// Path to the GraphStore JSON snapshot to load (created if absent)
        #[arg(short, long)]
        map: PathBuf,
        /// Path to a narrative-context JSON file (one turn's input)
        #[arg(short, long)]
        context: PathBuf,
        /// Path to write the updated GraphStore snapshot
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Run pathfinding between two identifiers on a map snapshot
    Query {
        /// Path to the GraphStore JSON snapshot to load
        #[arg(short, long)]
        map: PathBuf,
        /// Source node identifier
        #[arg(long)]
        from: String,
        /// Destination node identifier
        #[arg(long)]
        to: String,
    },
    /// Inspect a node, or the whole map, in human-readable form
    Inspect {
        /// Path to the GraphStore JSON snapshot to load
        #[arg(short, long)]
        map: PathBuf,
        /// Node identifier to inspect; omit to print the whole map
        #[arg(short, long)]
        node: Option<String>,
    },
    /// Validate the configured model list
    Health,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum OutputFormat {
    Table,
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
