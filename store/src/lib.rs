//! The in-memory graph store: nodes, edges, and the four derived indexes
//! the rest of the engine leans on for identifier resolution. A plain data
//! structure with indexes maintained incrementally on every mutation, but
//! synchronous: mutation of the live graph is serialized by the caller
//! (the engine's update-apply entry point).

use cartography_core::pathfind::{self, Adjacency};
use cartography_core::types::{MapEdge, MapNode};
use std::collections::HashMap;
use tracing::debug;

/// Normalize a display string for case/punctuation-insensitive matching
/// (id/name/alias lookups, name-collision checks).
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn slugify(s: &str) -> String {
    let mut slug = String::new();
    let mut last_was_dash = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..4].to_string()
}

/// Split `{base}-{4hex}` into `base` if the trailing segment looks like a
/// 4-hex pseudo-id suffix.
fn strip_suffix_pattern(raw: &str) -> Option<String> {
    let (base, suffix) = raw.rsplit_once('-')?;
    if suffix.len() == 4 && suffix.chars().all(|c| c.is_ascii_hexdigit()) && !base.is_empty() {
        Some(base.to_string())
    } else {
        None
    }
}

/// The live graph: nodes, edges, and indexes. `Clone` gives us a rollback
/// snapshot for free.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct GraphStore {
    nodes: HashMap<String, MapNode>,
    edges: HashMap<String, MapEdge>,
    #[serde(skip)]
    idx_name: HashMap<String, String>,
    #[serde(skip)]
    idx_alias: HashMap<String, String>,
    #[serde(skip)]
    idx_adjacency: HashMap<String, Vec<String>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &HashMap<String, MapNode> {
        &self.nodes
    }

    pub fn edges(&self) -> &HashMap<String, MapEdge> {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&MapNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut MapNode> {
        self.nodes.get_mut(id)
    }

    pub fn edges_touching(&self, node_id: &str) -> Vec<&MapEdge> {
        self.idx_adjacency
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|eid| self.edges.get(eid))
            .collect()
    }

    /// A full deep copy for rollback.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Rebuild all four indexes from scratch. Used after bulk operations
    /// (edge pruning, post-pass cleanup) where incremental maintenance
    /// would be error-prone.
    pub fn rebuild_indexes(&mut self) {
        self.idx_name.clear();
        self.idx_alias.clear();
        self.idx_adjacency.clear();

        for node in self.nodes.values() {
            self.idx_name.insert(normalize(&node.place_name), node.id.clone());
            for alias in &node.aliases {
                self.idx_alias.entry(normalize(alias)).or_insert_with(|| node.id.clone());
            }
        }
        for edge in self.edges.values() {
            self.idx_adjacency.entry(edge.source_node_id.clone()).or_default().push(edge.id.clone());
            self.idx_adjacency.entry(edge.target_node_id.clone()).or_default().push(edge.id.clone());
        }
    }

    /// Allocate a fresh, unique id for a new node: a slug of the place
    /// name with a short random suffix.
    pub fn fresh_node_id(&self, place_name: &str) -> String {
        loop {
            let candidate = format!("{}-{}", slugify(place_name), random_suffix());
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Allocate a fresh edge id derived from the (ordered) endpoint ids.
    pub fn fresh_edge_id(&self, a: &str, b: &str) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let base = format!("{}__{}", lo, hi);
        if !self.edges.contains_key(&base) {
            return base;
        }
        format!("{}-{}", base, random_suffix())
    }

    /// Insert a brand-new node and update indexes incrementally.
    pub fn insert_node(&mut self, node: MapNode) {
        debug!("inserting node {} ({})", node.id, node.place_name);
        self.idx_name.insert(normalize(&node.place_name), node.id.clone());
        for alias in &node.aliases {
            self.idx_alias.entry(normalize(alias)).or_insert_with(|| node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    /// Replace a node's stored value without touching its id; caller is
    /// responsible for calling `rebuild_indexes` if name/aliases changed.
    pub fn replace_node(&mut self, node: MapNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Delete a node and cascade: remove all touching edges and purge all
    /// index entries.
    pub fn remove_node(&mut self, id: &str) -> bool {
        let Some(node) = self.nodes.remove(id) else {
            return false;
        };
        self.idx_name.remove(&normalize(&node.place_name));
        self.idx_alias.retain(|_, v| v != id);

        let touching: Vec<String> = self
            .idx_adjacency
            .get(id)
            .cloned()
            .unwrap_or_default();
        for edge_id in touching {
            self.remove_edge(&edge_id);
        }
        self.idx_adjacency.remove(id);
        true
    }

    pub fn edge_mut(&mut self, id: &str) -> Option<&mut MapEdge> {
        self.edges.get_mut(id)
    }

    pub fn insert_edge(&mut self, edge: MapEdge) {
        self.idx_adjacency.entry(edge.source_node_id.clone()).or_default().push(edge.id.clone());
        self.idx_adjacency.entry(edge.target_node_id.clone()).or_default().push(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge);
    }

    pub fn remove_edge(&mut self, id: &str) -> bool {
        let Some(edge) = self.edges.remove(id) else {
            return false;
        };
        if let Some(list) = self.idx_adjacency.get_mut(&edge.source_node_id) {
            list.retain(|e| e != id);
        }
        if let Some(list) = self.idx_adjacency.get_mut(&edge.target_node_id) {
            list.retain(|e| e != id);
        }
        true
    }

    /// Drop any edge whose endpoints are not both live, then rebuild the
    /// adjacency index.
    pub fn prune_dangling_edges(&mut self) {
        let dangling: Vec<String> = self
            .edges
            .values()
            .filter(|e| !self.nodes.contains_key(&e.source_node_id) || !self.nodes.contains_key(&e.target_node_id))
            .map(|e| e.id.clone())
            .collect();
        for id in dangling {
            self.edges.remove(&id);
        }
        self.rebuild_indexes();
    }

    /// Find an existing live edge between the given endpoints (in either
    /// direction) of the given type, if any.
    pub fn find_edge(&self, a: &str, b: &str, edge_type: cartography_core::types::EdgeType) -> Option<&MapEdge> {
        self.edges.values().find(|e| {
            e.edge_type == edge_type
                && ((e.source_node_id == a && e.target_node_id == b)
                    || (e.source_node_id == b && e.target_node_id == a))
        })
    }

    /// Find any existing live edge between the given endpoints, regardless
    /// of type, used when an edge update doesn't specify a type.
    pub fn find_any_edge(&self, a: &str, b: &str) -> Option<&MapEdge> {
        self.edges.values().find(|e| {
            (e.source_node_id == a && e.target_node_id == b)
                || (e.source_node_id == b && e.target_node_id == a)
        })
    }

    fn candidates_by_name_or_alias(&self, base_norm: &str) -> Vec<&MapNode> {
        self.nodes
            .values()
            .filter(|n| {
                normalize(&n.place_name) == base_norm
                    || n.aliases.iter().any(|a| normalize(a) == base_norm)
            })
            .collect()
    }

    fn break_tie<'a>(
        &'a self,
        candidates: Vec<&'a MapNode>,
        current_node_id: Option<&str>,
        adjacency: Option<&Adjacency>,
    ) -> Option<&'a MapNode> {
        if candidates.is_empty() {
            return None;
        }
        if candidates.len() == 1 {
            return Some(candidates[0]);
        }
        match (current_node_id, adjacency) {
            (Some(current), Some(adj)) => candidates
                .into_iter()
                .min_by_key(|n| pathfind::hop_distance(adj, current, &n.id)),
            _ => {
                // No current node: arbitrary but stable order.
                let mut sorted = candidates;
                sorted.sort_by(|a, b| a.id.cmp(&b.id));
                sorted.into_iter().next()
            }
        }
    }

    /// Identifier resolution, tried in order: exact id; exact name; exact
    /// alias; `{base}-{4hex}` suffix pattern; substring on id; name/alias
    /// derived from `base` by dehyphenation.
    pub fn find_node_by_identifier(
        &self,
        raw: &str,
        current_node_id: Option<&str>,
        adjacency: Option<&Adjacency>,
    ) -> Option<&MapNode> {
        if let Some(n) = self.nodes.get(raw) {
            return Some(n);
        }

        let norm = normalize(raw);
        if let Some(id) = self.idx_name.get(&norm) {
            return self.nodes.get(id);
        }
        if let Some(id) = self.idx_alias.get(&norm) {
            return self.nodes.get(id);
        }

        if let Some(base) = strip_suffix_pattern(raw) {
            let base_norm = normalize(&base);
            let matches = self.candidates_by_name_or_alias(&base_norm);
            if matches.len() == 1 {
                return Some(matches[0]);
            }
        }

        let substring_matches: Vec<&MapNode> = self.nodes.values().filter(|n| n.id.contains(raw)).collect();
        if !substring_matches.is_empty() {
            return self.break_tie(substring_matches, current_node_id, adjacency);
        }

        let dehyphenated_norm = normalize(&raw.replace('-', " "));
        if let Some(id) = self.idx_name.get(&dehyphenated_norm) {
            return self.nodes.get(id);
        }
        if let Some(id) = self.idx_alias.get(&dehyphenated_norm) {
            return self.nodes.get(id);
        }

        None
    }

    pub fn build_adjacency(&self) -> Adjacency {
        Adjacency::build(&self.nodes, &self.edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartography_core::types::{EdgeStatus, EdgeType, NodeStatus, NodeType};

    fn node(id: &str, place_name: &str, node_type: NodeType, parent: Option<&str>) -> MapNode {
        MapNode {
            id: id.to_string(),
            place_name: place_name.to_string(),
            node_type,
            status: NodeStatus::Discovered,
            description: String::new(),
            aliases: Vec::new(),
            parent_node_id: parent.map(|p| p.to_string()),
            visited: false,
            position: None,
        }
    }

    #[test]
    fn identifier_resolution_is_idempotent() {
        let mut store = GraphStore::new();
        store.insert_node(node("whispering-woods-a1b2", "Whispering Woods", NodeType::Region, None));

        let found = store
            .find_node_by_identifier("whispering-woods-a1b2", None, None)
            .unwrap();
        assert_eq!(found.id, "whispering-woods-a1b2");
    }

    #[test]
    fn resolves_by_name_case_insensitively() {
        let mut store = GraphStore::new();
        store.insert_node(node("stone-altar-9f3c", "Stone Altar", NodeType::Feature, None));
        let found = store.find_node_by_identifier("STONE altar", None, None).unwrap();
        assert_eq!(found.id, "stone-altar-9f3c");
    }

    #[test]
    fn resolves_by_pseudo_id_suffix_when_unambiguous() {
        let mut store = GraphStore::new();
        store.insert_node(node("stone-altar-9f3c", "Stone Altar", NodeType::Feature, None));
        let found = store.find_node_by_identifier("stone-altar-ffff", None, None).unwrap();
        assert_eq!(found.id, "stone-altar-9f3c");
    }

    #[test]
    fn removing_a_node_cascades_its_edges() {
        let mut store = GraphStore::new();
        store.insert_node(node("a", "A", NodeType::Feature, None));
        store.insert_node(node("b", "B", NodeType::Feature, None));
        store.insert_edge(MapEdge {
            id: "e1".into(),
            source_node_id: "a".into(),
            target_node_id: "b".into(),
            edge_type: EdgeType::Path,
            status: EdgeStatus::Open,
            description: String::new(),
            travel_time: String::new(),
        });

        assert!(store.remove_node("a"));
        assert!(store.edges().is_empty());
    }

    #[test]
    fn prune_dangling_edges_drops_half_connected_edges() {
        let mut store = GraphStore::new();
        store.insert_node(node("a", "A", NodeType::Feature, None));
        store.insert_edge(MapEdge {
            id: "e1".into(),
            source_node_id: "a".into(),
            target_node_id: "ghost".into(),
            edge_type: EdgeType::Path,
            status: EdgeStatus::Open,
            description: String::new(),
            travel_time: String::new(),
        });
        store.prune_dangling_edges();
        assert!(store.edges().is_empty());
    }
}
