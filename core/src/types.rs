//! Core data types for the cartography engine: nodes, edges, and the
//! map-update payload shape the Storyteller sends us.

use serde::{Deserialize, Serialize};

/// Virtual parent used when a node has no concrete parent. Never
/// instantiated as a real node; resolved to `None` wherever a
/// `parentNodeId` literally equals this string.
pub const ROOT_SENTINEL: &str = "Universe";

/// The containment ranking. Lower depth is shallower (closer to the
/// root). `Feature` has no children of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Region,
    Location,
    Settlement,
    District,
    Exterior,
    Interior,
    Room,
    Feature,
}

impl NodeType {
    /// Index into the containment ranking; smaller is shallower.
    pub fn depth(self) -> u8 {
        match self {
            NodeType::Region => 0,
            NodeType::Location => 1,
            NodeType::Settlement => 2,
            NodeType::District => 3,
            NodeType::Exterior => 4,
            NodeType::Interior => 5,
            NodeType::Room => 6,
            NodeType::Feature => 7,
        }
    }

    /// True iff `self` strictly dominates (is shallower than) `other`.
    pub fn strictly_above(self, other: NodeType) -> bool {
        self.depth() < other.depth()
    }

    /// All ranks in increasing depth order, used by the hierarchy-rules
    /// search for a legal type under a given parent.
    pub const ALL_IN_DEPTH_ORDER: [NodeType; 8] = [
        NodeType::Region,
        NodeType::Location,
        NodeType::Settlement,
        NodeType::District,
        NodeType::Exterior,
        NodeType::Interior,
        NodeType::Room,
        NodeType::Feature,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Undiscovered,
    Discovered,
    Rumored,
    QuestTarget,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node (place) in the map graph. Identity is the `id` field: a slugged
/// place name with a short random suffix, e.g. `stone-altar-a1f2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapNode {
    pub id: String,
    pub place_name: String,
    pub node_type: NodeType,
    pub status: NodeStatus,
    pub description: String,
    /// Ordered, distinct alternate names this node is known by.
    pub aliases: Vec<String>,
    /// `None` means the node's parent is the root sentinel.
    pub parent_node_id: Option<String>,
    pub visited: bool,
    /// Layout hint. Not read by the engine; preserved on round-trip.
    pub position: Option<Position>,
}

impl MapNode {
    pub fn is_feature(&self) -> bool {
        self.node_type == NodeType::Feature
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Path,
    Road,
    SeaRoute,
    Door,
    Teleporter,
    SecretPassage,
    RiverCrossing,
    TemporaryBridge,
    BoardingHook,
    Shortcut,
}

impl EdgeType {
    /// Shortcut edges are exempt from the adjacency rule.
    pub fn is_shortcut(self) -> bool {
        matches!(self, EdgeType::Shortcut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    Open,
    Accessible,
    Closed,
    Locked,
    Blocked,
    Hidden,
    Rumored,
    OneWay,
    Collapsed,
    Removed,
    Active,
    Inactive,
}

impl EdgeStatus {
    /// Dijkstra edge weight used by the shortest-path search.
    pub fn travel_weight(self) -> Option<u32> {
        match self {
            EdgeStatus::Open
            | EdgeStatus::Accessible
            | EdgeStatus::Active
            | EdgeStatus::OneWay => Some(1),
            EdgeStatus::Rumored => Some(5),
            EdgeStatus::Blocked
            | EdgeStatus::Closed
            | EdgeStatus::Locked
            | EdgeStatus::Hidden
            | EdgeStatus::Collapsed
            | EdgeStatus::Removed
            | EdgeStatus::Inactive => None,
        }
    }
}

/// A connection between two feature nodes. Identity is the `id` field,
/// derived from the (ordered) endpoint ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapEdge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub edge_type: EdgeType,
    pub status: EdgeStatus,
    pub description: String,
    pub travel_time: String,
}

impl MapEdge {
    /// The unordered pair-plus-type key used for edge-add dedup and for
    /// the connector-chain processed-key set.
    pub fn pair_key(&self) -> (String, String, EdgeType) {
        if self.source_node_id <= self.target_node_id {
            (self.source_node_id.clone(), self.target_node_id.clone(), self.edge_type)
        } else {
            (self.target_node_id.clone(), self.source_node_id.clone(), self.edge_type)
        }
    }
}

/// A value that may arrive from an LLM reply as a single object or as an
/// array of objects. `fold` normalizes both shapes to a `Vec<T>` before
/// handing the result to the applier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn fold(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

fn default_empty_vec<T>() -> Vec<T> {
    Vec::new()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAdd {
    pub place_name: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub status: Option<NodeStatus>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// An identifier (id, name, or the root sentinel) for the intended
    /// parent; resolved during hierarchical node addition.
    #[serde(default)]
    pub parent_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUpdate {
    /// Identifier of the node to update, resolved via the identifier
    /// resolution chain.
    pub identifier: String,
    #[serde(default)]
    pub new_place_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<NodeStatus>,
    #[serde(default)]
    pub node_type: Option<NodeType>,
    #[serde(default)]
    pub parent_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRemove {
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeAdd {
    pub source_identifier: String,
    pub target_identifier: String,
    pub edge_type: EdgeType,
    #[serde(default)]
    pub status: Option<EdgeStatus>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub travel_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeUpdate {
    pub source_identifier: String,
    pub target_identifier: String,
    /// Narrows which edge between the endpoints is being targeted; if
    /// absent, any matching edge type is considered.
    #[serde(default)]
    pub edge_type: Option<EdgeType>,
    #[serde(default)]
    pub new_status: Option<EdgeStatus>,
    #[serde(default)]
    pub new_description: Option<String>,
    #[serde(default)]
    pub new_travel_time: Option<String>,
    #[serde(default)]
    pub new_edge_type: Option<EdgeType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRemove {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub source_identifier: Option<String>,
    #[serde(default)]
    pub target_identifier: Option<String>,
    #[serde(default)]
    pub edge_type: Option<EdgeType>,
}

/// The versionless payload the Storyteller's Cartographer reply decodes
/// into. Every field is optional; absent means "no change of that kind."
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MapUpdate {
    #[serde(default = "default_empty_vec")]
    pub nodes_to_add: Vec<NodeAdd>,
    #[serde(default = "default_empty_vec")]
    pub nodes_to_update: Vec<NodeUpdate>,
    #[serde(default = "default_empty_vec")]
    pub nodes_to_remove: Vec<NodeRemove>,
    #[serde(default = "default_empty_vec")]
    pub edges_to_add: Vec<EdgeAdd>,
    #[serde(default = "default_empty_vec")]
    pub edges_to_update: Vec<EdgeUpdate>,
    #[serde(default = "default_empty_vec")]
    pub edges_to_remove: Vec<EdgeRemove>,
    #[serde(default)]
    pub suggested_current_map_node_id: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Read-only inventory item snapshot, owned by the calling game state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    pub item_type: String,
    pub holder_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl InventoryItem {
    pub fn is_junk(&self) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case("junk"))
    }

    pub fn is_vehicle(&self) -> bool {
        self.item_type.eq_ignore_ascii_case("vehicle")
    }
}

/// Read-only NPC snapshot, owned by the calling game state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Npc {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub presence_status: String,
}
