//! Pure, side-effect-free hierarchy predicates. These operate over a plain
//! node-id index so they can be run against either the live graph or a
//! cloned snapshot without borrowing the store's lock.

use crate::types::{EdgeType, MapNode, NodeType, ROOT_SENTINEL};
use std::collections::HashMap;

pub type NodeIndex = HashMap<String, MapNode>;

/// The effective parent type of a node: `None` means the root sentinel.
fn parent_type(nodes: &NodeIndex, node: &MapNode) -> Option<NodeType> {
    node.parent_node_id
        .as_deref()
        .and_then(|pid| nodes.get(pid))
        .map(|p| p.node_type)
}

/// Resolve a node's parent id, treating both `None` and the literal root
/// sentinel string as "no concrete parent."
pub fn resolved_parent_id(parent_node_id: Option<&str>) -> Option<&str> {
    match parent_node_id {
        None => None,
        Some(id) if id == ROOT_SENTINEL => None,
        Some(id) => Some(id),
    }
}

fn ancestors<'a>(nodes: &'a NodeIndex, mut node: &'a MapNode) -> Vec<&'a MapNode> {
    let mut out = Vec::new();
    while let Some(pid) = resolved_parent_id(node.parent_node_id.as_deref()) {
        match nodes.get(pid) {
            Some(p) => {
                out.push(p);
                node = p;
            }
            None => break,
        }
    }
    out
}

fn same_parent(nodes: &NodeIndex, a: &MapNode, b: &MapNode) -> bool {
    resolved_parent_id(a.parent_node_id.as_deref()) == resolved_parent_id(b.parent_node_id.as_deref())
}

fn parent_of<'a>(nodes: &'a NodeIndex, n: &MapNode) -> Option<&'a MapNode> {
    resolved_parent_id(n.parent_node_id.as_deref()).and_then(|pid| nodes.get(pid))
}

fn grandparent_of<'a>(nodes: &'a NodeIndex, n: &MapNode) -> Option<&'a MapNode> {
    parent_of(nodes, n).and_then(|p| parent_of(nodes, p))
}

fn same_grandparent(nodes: &NodeIndex, a: &MapNode, b: &MapNode) -> bool {
    match (grandparent_of(nodes, a), grandparent_of(nodes, b)) {
        (Some(ga), Some(gb)) => ga.id == gb.id,
        _ => false,
    }
}

/// Both nodes must be `feature` and satisfy the adjacency rule, unless the
/// edge type is `shortcut`, which is exempt from adjacency (but never from
/// the feature-ness requirement).
pub fn is_edge_connection_allowed(
    nodes: &NodeIndex,
    a: &MapNode,
    b: &MapNode,
    edge_type: EdgeType,
) -> bool {
    if !a.is_feature() || !b.is_feature() {
        return false;
    }
    if edge_type.is_shortcut() {
        return true;
    }

    if same_parent(nodes, a, b) {
        return true;
    }
    if same_grandparent(nodes, a, b) {
        return true;
    }
    if let Some(pa) = parent_of(nodes, a) {
        if let Some(gb) = grandparent_of(nodes, b) {
            if pa.id == gb.id {
                return true;
            }
        }
    }
    if let Some(pb) = parent_of(nodes, b) {
        if let Some(ga) = grandparent_of(nodes, a) {
            if pb.id == ga.id {
                return true;
            }
        }
    }
    false
}

/// Walk up from `candidate_parent` until the first ancestor whose type
/// strictly dominates `child_type`; returns `None` if the root is reached
/// without finding one.
pub fn find_closest_allowed_parent(
    nodes: &NodeIndex,
    candidate_parent: &str,
    child_type: NodeType,
) -> Option<String> {
    let mut current = nodes.get(candidate_parent)?;
    loop {
        if current.node_type.strictly_above(child_type) {
            return Some(current.id.clone());
        }
        match parent_of(nodes, current) {
            Some(p) => current = p,
            None => return None,
        }
    }
}

/// Propose the deepest type still legal under `parent_type` that does not
/// create a cycle (i.e. strictly below `parent_type`). `child` itself is
/// only used to avoid proposing its own current type.
pub fn suggest_node_type_downgrade(child: &MapNode, parent_type: NodeType) -> Option<NodeType> {
    NodeType::ALL_IN_DEPTH_ORDER
        .iter()
        .rev()
        .find(|t| t.depth() > parent_type.depth() && **t != child.node_type)
        .copied()
}

/// Propose the shallowest type that would make `parent` a legal parent of
/// its current children, i.e. strictly above the shallowest child.
pub fn suggest_node_type_upgrade(nodes: &NodeIndex, parent: &MapNode) -> Option<NodeType> {
    let shallowest_child_depth = nodes
        .values()
        .filter(|n| resolved_parent_id(n.parent_node_id.as_deref()) == Some(parent.id.as_str()))
        .map(|n| n.node_type.depth())
        .min()?;

    NodeType::ALL_IN_DEPTH_ORDER
        .iter()
        .find(|t| (t.depth() as i16) < shallowest_child_depth as i16 && **t != parent.node_type)
        .copied()
}

/// Scan all nodes for any (child, parent) pair where both are `feature`,
/// where the parent does not strictly dominate the child, or where a
/// `feature` is a parent at all.
pub fn map_has_hierarchy_conflict(nodes: &NodeIndex) -> bool {
    nodes.values().any(|child| {
        let Some(parent) = parent_of(nodes, child) else {
            return false;
        };
        if child.is_feature() && parent.is_feature() {
            return true;
        }
        if parent.is_feature() {
            return true;
        }
        !parent.node_type.strictly_above(child.node_type)
    })
}

/// Describes a candidate net in human-readable form for the
/// hierarchy-resolution correction service.
pub fn describe_ancestors(nodes: &NodeIndex, node: &MapNode) -> Vec<String> {
    ancestors(nodes, node).into_iter().map(|n| n.place_name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EdgeType, NodeStatus};

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

    fn settlement_with_two_gates() -> NodeIndex {
        let mut nodes = NodeIndex::new();
        nodes.insert("settlement-a".into(), node("settlement-a", "Settlement A", NodeType::Settlement, None));
        nodes.insert(
            "north-gate".into(),
            node("north-gate", "North Gate", NodeType::Feature, Some("settlement-a")),
        );
        nodes.insert(
            "south-gate".into(),
            node("south-gate", "South Gate", NodeType::Feature, Some("settlement-a")),
        );
        nodes
    }

    #[test]
    fn siblings_under_same_parent_are_allowed() {
        let nodes = settlement_with_two_gates();
        let a = nodes.get("north-gate").unwrap();
        let b = nodes.get("south-gate").unwrap();
        assert!(is_edge_connection_allowed(&nodes, a, b, EdgeType::Path));
    }

    #[test]
    fn region_to_room_edge_is_rejected() {
        let mut nodes = NodeIndex::new();
        nodes.insert("r".into(), node("r", "Region", NodeType::Region, None));
        nodes.insert("room".into(), node("room", "Room", NodeType::Room, Some("r")));
        let a = nodes.get("r").unwrap().clone();
        let b = nodes.get("room").unwrap().clone();
        assert!(!is_edge_connection_allowed(&nodes, &a, &b, EdgeType::Path));
    }

    #[test]
    fn shortcut_is_exempt_from_adjacency_but_not_feature_ness() {
        let mut nodes = NodeIndex::new();
        nodes.insert("sa".into(), node("sa", "Settlement A", NodeType::Settlement, None));
        nodes.insert("sb".into(), node("sb", "Settlement B", NodeType::Settlement, None));
        nodes.insert("fa".into(), node("fa", "Pier A", NodeType::Feature, Some("sa")));
        nodes.insert("fb".into(), node("fb", "Pier B", NodeType::Feature, Some("sb")));
        let a = nodes.get("fa").unwrap().clone();
        let b = nodes.get("fb").unwrap().clone();
        assert!(!is_edge_connection_allowed(&nodes, &a, &b, EdgeType::Path));
        assert!(is_edge_connection_allowed(&nodes, &a, &b, EdgeType::Shortcut));

        let sa = nodes.get("sa").unwrap().clone();
        assert!(!is_edge_connection_allowed(&nodes, &sa, &b, EdgeType::Shortcut));
    }

    #[test]
    fn find_closest_allowed_parent_walks_up_past_same_type() {
        let mut nodes = NodeIndex::new();
        nodes.insert("region".into(), node("region", "Region", NodeType::Region, None));
        nodes.insert(
            "loc".into(),
            node("loc", "Location", NodeType::Location, Some("region")),
        );
        nodes.insert(
            "loc2".into(),
            node("loc2", "Another Location", NodeType::Location, Some("loc")),
        );
        let closest = find_closest_allowed_parent(&nodes, "loc2", NodeType::Location);
        assert_eq!(closest, Some("region".to_string()));
    }

    #[test]
    fn no_conflict_in_clean_hierarchy() {
        let nodes = settlement_with_two_gates();
        assert!(!map_has_hierarchy_conflict(&nodes));
    }

    #[test]
    fn same_type_parent_is_a_conflict() {
        let mut nodes = NodeIndex::new();
        nodes.insert("a".into(), node("a", "A", NodeType::Settlement, None));
        nodes.insert("b".into(), node("b", "B", NodeType::Settlement, Some("a")));
        assert!(map_has_hierarchy_conflict(&nodes));
    }

    #[test]
    fn feature_as_parent_is_a_conflict() {
        let mut nodes = NodeIndex::new();
        nodes.insert("f".into(), node("f", "Feature", NodeType::Feature, None));
        nodes.insert("child".into(), node("child", "Child", NodeType::Room, Some("f")));
        assert!(map_has_hierarchy_conflict(&nodes));
    }
}
