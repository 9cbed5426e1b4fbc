//! Weighted shortest-path over the map, combining real edges and hierarchy
//! pseudo-edges. Used both to prioritize identifier-match candidates and
//! to form travel plans.

use crate::hierarchy::resolved_parent_id;
use crate::types::{MapEdge, MapNode};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

const HIERARCHY_PSEUDO_EDGE_WEIGHT: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Node(String),
    Edge(String),
}

#[derive(Debug, Clone)]
struct Link {
    to: String,
    weight: u32,
    /// `None` for a hierarchy pseudo-edge; there is no real `MapEdge` id
    /// to report as a step.
    edge_id: Option<String>,
}

/// A prebuilt adjacency that may be reused across multiple `shortest_path`
/// calls against the same graph snapshot.
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    links: HashMap<String, Vec<Link>>,
}

impl Adjacency {
    pub fn build(nodes: &HashMap<String, MapNode>, edges: &HashMap<String, MapEdge>) -> Self {
        let mut links: HashMap<String, Vec<Link>> = HashMap::new();

        for edge in edges.values() {
            let Some(weight) = edge.status.travel_weight() else {
                continue;
            };
            links.entry(edge.source_node_id.clone()).or_default().push(Link {
                to: edge.target_node_id.clone(),
                weight,
                edge_id: Some(edge.id.clone()),
            });
            links.entry(edge.target_node_id.clone()).or_default().push(Link {
                to: edge.source_node_id.clone(),
                weight,
                edge_id: Some(edge.id.clone()),
            });
        }

        // Group children by resolved parent id to evaluate the two
        // hierarchy pseudo-edge rules.
        let mut children_by_parent: HashMap<&str, Vec<&MapNode>> = HashMap::new();
        for node in nodes.values() {
            if let Some(pid) = resolved_parent_id(node.parent_node_id.as_deref()) {
                children_by_parent.entry(pid).or_default().push(node);
            }
        }

        for node in nodes.values() {
            let Some(parent_id) = resolved_parent_id(node.parent_node_id.as_deref()) else {
                continue;
            };
            let Some(parent) = nodes.get(parent_id) else {
                continue;
            };
            let siblings = children_by_parent.get(parent_id).cloned().unwrap_or_default();
            let has_other_traversable_child = siblings
                .iter()
                .any(|s| s.id != node.id);

            if has_other_traversable_child {
                push_pseudo_edge(&mut links, &node.id, &parent.id);
            }

            for sibling in &siblings {
                if sibling.id == node.id {
                    continue;
                }
                if node.is_feature() != sibling.is_feature() {
                    push_pseudo_edge(&mut links, &node.id, &sibling.id);
                }
            }
        }

        Self { links }
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

fn push_pseudo_edge(links: &mut HashMap<String, Vec<Link>>, a: &str, b: &str) {
    links.entry(a.to_string()).or_default().push(Link {
        to: b.to_string(),
        weight: HIERARCHY_PSEUDO_EDGE_WEIGHT,
        edge_id: None,
    });
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct HeapEntry {
    cost: u32,
    node: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for a min-heap on `cost`.
        other.cost.cmp(&self.cost).then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra over `adjacency` from `from` to `to`. Returns a sequence
/// alternating `Step::Node` and `Step::Edge` (pseudo-edges contribute no
/// `Step::Edge` entry), or `None` if unreachable.
pub fn shortest_path(adjacency: &Adjacency, from: &str, to: &str) -> Option<Vec<Step>> {
    if from == to {
        return Some(vec![Step::Node(from.to_string())]);
    }

    let mut dist: HashMap<String, u32> = HashMap::new();
    let mut prev: HashMap<String, (String, Option<String>)> = HashMap::new();
    let mut heap = BinaryHeap::new();

    dist.insert(from.to_string(), 0);
    heap.push(HeapEntry { cost: 0, node: from.to_string() });

    while let Some(HeapEntry { cost, node }) = heap.pop() {
        if node == to {
            break;
        }
        if cost > *dist.get(&node).unwrap_or(&u32::MAX) {
            continue;
        }
        let Some(neighbors) = adjacency.links.get(&node) else {
            continue;
        };
        for link in neighbors {
            let next_cost = cost.saturating_add(link.weight);
            if next_cost < *dist.get(&link.to).unwrap_or(&u32::MAX) {
                dist.insert(link.to.clone(), next_cost);
                prev.insert(link.to.clone(), (node.clone(), link.edge_id.clone()));
                heap.push(HeapEntry { cost: next_cost, node: link.to.clone() });
            }
        }
    }

    if !dist.contains_key(to) {
        return None;
    }

    let mut steps = Vec::new();
    let mut current = to.to_string();
    steps.push(Step::Node(current.clone()));
    while let Some((prev_node, edge_id)) = prev.get(&current) {
        if let Some(eid) = edge_id {
            steps.push(Step::Edge(eid.clone()));
        }
        steps.push(Step::Node(prev_node.clone()));
        current = prev_node.clone();
    }
    steps.reverse();
    Some(steps)
}

/// Number of hops from `current_node_id` to `candidate`, used by C3 to
/// break ties among name/alias match candidates. Returns `u32::MAX` if
/// unreachable or `current_node_id` is absent.
pub fn hop_distance(adjacency: &Adjacency, current_node_id: &str, candidate: &str) -> u32 {
    shortest_path(adjacency, current_node_id, candidate)
        .map(|steps| steps.iter().filter(|s| matches!(s, Step::Edge(_))).count() as u32)
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EdgeStatus, EdgeType, NodeStatus, NodeType};

    fn node(id: &str, node_type: NodeType, parent: Option<&str>) -> MapNode {
        MapNode {
            id: id.to_string(),
            place_name: id.to_string(),
            node_type,
            status: NodeStatus::Discovered,
            description: String::new(),
            aliases: Vec::new(),
            parent_node_id: parent.map(|p| p.to_string()),
            visited: false,
            position: None,
        }
    }

    fn edge(id: &str, src: &str, tgt: &str, status: EdgeStatus) -> MapEdge {
        MapEdge {
            id: id.to_string(),
            source_node_id: src.to_string(),
            target_node_id: tgt.to_string(),
            edge_type: EdgeType::Path,
            status,
            description: String::new(),
            travel_time: String::new(),
        }
    }

    #[test]
    fn finds_direct_open_edge() {
        let mut nodes = HashMap::new();
        nodes.insert("a".into(), node("a", NodeType::Feature, None));
        nodes.insert("b".into(), node("b", NodeType::Feature, None));
        let mut edges = HashMap::new();
        edges.insert("e1".into(), edge("e1", "a", "b", EdgeStatus::Open));

        let adj = Adjacency::build(&nodes, &edges);
        let path = shortest_path(&adj, "a", "b").unwrap();
        assert_eq!(path, vec![Step::Node("a".into()), Step::Edge("e1".into()), Step::Node("b".into())]);
    }

    #[test]
    fn blocked_edge_is_impassable() {
        let mut nodes = HashMap::new();
        nodes.insert("a".into(), node("a", NodeType::Feature, None));
        nodes.insert("b".into(), node("b", NodeType::Feature, None));
        let mut edges = HashMap::new();
        edges.insert("e1".into(), edge("e1", "a", "b", EdgeStatus::Blocked));

        let adj = Adjacency::build(&nodes, &edges);
        assert!(shortest_path(&adj, "a", "b").is_none());
    }

    #[test]
    fn hierarchy_pseudo_edge_connects_unlinked_siblings() {
        let mut nodes = HashMap::new();
        nodes.insert("parent".into(), node("parent", NodeType::Settlement, None));
        nodes.insert("a".into(), node("a", NodeType::Feature, Some("parent")));
        nodes.insert("b".into(), node("b", NodeType::Feature, Some("parent")));
        let edges = HashMap::new();

        let adj = Adjacency::build(&nodes, &edges);
        // No real edge between a and b, but both route through the
        // pseudo-edges to their shared parent.
        let path = shortest_path(&adj, "a", "b").unwrap();
        assert!(path.len() > 1);
    }

    #[test]
    fn unreachable_returns_none() {
        let mut nodes = HashMap::new();
        nodes.insert("a".into(), node("a", NodeType::Feature, None));
        nodes.insert("b".into(), node("b", NodeType::Feature, None));
        let edges = HashMap::new();

        let adj = Adjacency::build(&nodes, &edges);
        assert!(shortest_path(&adj, "a", "b").is_none());
    }
}
