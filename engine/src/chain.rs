//! Connector-chain refinement: when a requested edge would link two
//! `feature` nodes whose parents violate the adjacency rule, this
//! synthesizes a chain of intermediate `feature` siblings so a legal walk
//! exists between the original endpoints.

use crate::correction::CorrectionServices;
use crate::dispatcher::CancellationToken;
use cartography_core::debug::{ChainRoundDebug, DebugPacket};
use cartography_core::errors::ChainError;
use cartography_core::hierarchy::{self, is_edge_connection_allowed};
use cartography_core::types::{EdgeAdd, EdgeStatus, EdgeType, NodeAdd, NodeStatus, NodeType};
use cartography_store::{normalize, GraphStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

pub const MAX_CHAIN_REFINEMENT_ROUNDS: u32 = 2;
const MAX_CORRECTION_RETRIES: u32 = 3;

/// The structured description of an illegal edge and the ancestor walk
/// needed to repair it.
#[derive(Debug, Clone)]
pub struct ChainRequest {
    pub original_source_id: String,
    pub original_target_id: String,
    pub edge_type: EdgeType,
    pub edge_status: Option<EdgeStatus>,
    pub edge_description: String,
    pub edge_travel_time: String,
    /// Deduplicated ancestor ids: A-side order, then B-side reversed.
    pub ordered_parents: Vec<String>,
}

impl ChainRequest {
    /// `(parent_i, parent_i+1)` pairs that still need a connector feature
    /// between them.
    pub fn pending_pairs(&self) -> Vec<(String, String)> {
        self.ordered_parents.windows(2).map(|w| (w[0].clone(), w[1].clone())).collect()
    }

    /// True iff `self`'s ancestor walk is a (possibly reversed) contiguous
    /// sub-chain of `other`'s, by parent-id equality.
    pub fn is_subchain_of(&self, other: &ChainRequest) -> bool {
        is_contiguous_subsequence(&self.ordered_parents, &other.ordered_parents)
            || is_contiguous_subsequence(&self.ordered_parents, &reversed(&other.ordered_parents))
    }
}

fn reversed(v: &[String]) -> Vec<String> {
    let mut out = v.to_vec();
    out.reverse();
    out
}

fn is_contiguous_subsequence(needle: &[String], haystack: &[String]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn ancestor_ids(store: &GraphStore, node_id: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut current = store.node(node_id);
    while let Some(node) = current {
        match hierarchy::resolved_parent_id(node.parent_node_id.as_deref()) {
            Some(pid) => {
                ids.push(pid.to_string());
                current = store.node(pid);
            }
            None => break,
        }
    }
    ids
}

fn dedup_preserve_order(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

/// Build a `ChainRequest` for a single illegal edge.
pub fn build_chain_request(
    store: &GraphStore,
    source_id: &str,
    target_id: &str,
    edge_type: EdgeType,
    edge_status: Option<EdgeStatus>,
    edge_description: String,
    edge_travel_time: String,
) -> ChainRequest {
    let a_ancestors = ancestor_ids(store, source_id);
    let b_ancestors_reversed = reversed(&ancestor_ids(store, target_id));
    let ordered_parents = dedup_preserve_order(a_ancestors.into_iter().chain(b_ancestors_reversed));

    ChainRequest {
        original_source_id: source_id.to_string(),
        original_target_id: target_id.to_string(),
        edge_type,
        edge_status,
        edge_description,
        edge_travel_time,
        ordered_parents,
    }
}

/// Drop any request that is a sub-chain of another in the batch, by
/// parent-id equality.
pub fn aggregate(requests: Vec<ChainRequest>) -> Vec<ChainRequest> {
    let mut kept: Vec<ChainRequest> = Vec::new();
    'outer: for candidate in requests {
        for existing in &kept {
            if candidate.is_subchain_of(existing) {
                continue 'outer;
            }
        }
        kept.retain(|existing| !existing.is_subchain_of(&candidate));
        kept.push(candidate);
    }
    kept
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ChainReply {
    #[serde(default)]
    nodes_to_add: Vec<NodeAdd>,
    #[serde(default)]
    edges_to_add: Vec<EdgeAdd>,
}

/// Folds a reply that may have arrived as several fragments (the model
/// replying with an array instead of one combined object) into a single
/// `ChainReply` by concatenating each fragment's additions in order.
fn merge_chain_replies(replies: Vec<ChainReply>) -> ChainReply {
    let mut merged = ChainReply::default();
    for reply in replies {
        merged.nodes_to_add.extend(reply.nodes_to_add);
        merged.edges_to_add.extend(reply.edges_to_add);
    }
    merged
}

fn chain_reply_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "nodes_to_add": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "place_name": {"type": "string"},
                        "node_type": {"const": "feature"},
                        "parent_node_id": {"type": "string"},
                        "description": {"type": "string"},
                        "aliases": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["place_name", "node_type", "parent_node_id"]
                }
            },
            "edges_to_add": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "source_identifier": {"type": "string"},
                        "target_identifier": {"type": "string"},
                        "edge_type": {"type": "string"}
                    },
                    "required": ["source_identifier", "target_identifier", "edge_type"]
                }
            }
        }
    })
}

fn render_chain_context(store: &GraphStore, requests: &[ChainRequest]) -> String {
    let mut lines = Vec::new();
    for request in requests {
        let names: Vec<String> = request
            .ordered_parents
            .iter()
            .map(|id| store.node(id).map(|n| n.place_name.clone()).unwrap_or_else(|| id.clone()))
            .collect();
        lines.push(format!(
            "connect {} -> {} via: {}",
            store.node(&request.original_source_id).map(|n| n.place_name.as_str()).unwrap_or(&request.original_source_id),
            store.node(&request.original_target_id).map(|n| n.place_name.as_str()).unwrap_or(&request.original_target_id),
            names.join(" -> ")
        ));
    }
    lines.join("\n")
}

/// Calls the correction LLM for a batch of chain requests, retrying a
/// bounded number of times if no parseable reply arrives. The reply may
/// come back as a single object or an array of fragments; either shape is
/// folded into one `ChainReply` before the caller sees it.
async fn request_chain_reply(
    correction: &CorrectionServices<'_>,
    store: &GraphStore,
    requests: &[ChainRequest],
    cancel: &CancellationToken,
    debug: &mut DebugPacket,
) -> Result<ChainReply, ChainError> {
    let context = render_chain_context(store, requests);
    let schema = chain_reply_schema();

    for _ in 0..MAX_CORRECTION_RETRIES {
        let prompt = format!(
            "Synthesize feature nodes and edges to bridge these disconnected chains:\n{context}\n\
             Only propose feature-type nodes whose parent is one of the ids named above."
        );
        let replies = correction.rejson_one_or_many::<ChainReply>(&prompt, &schema, cancel, debug).await?;
        if let Some(replies) = replies {
            return Ok(merge_chain_replies(replies));
        }
    }

    Err(ChainError::RoundsExhausted)
}

/// Apply returned additions, reusing live nodes by (name, parent) and
/// deduplicating edges against `processed_keys`.
fn apply_additions(
    store: &mut GraphStore,
    reply: ChainReply,
    visible_parents: &HashSet<String>,
    processed_keys: &mut HashSet<(String, String, EdgeType)>,
    pending: &mut Vec<ChainRequest>,
) -> (usize, usize) {
    let mut nodes_added = 0;
    let mut edges_added = 0;

    for add in reply.nodes_to_add {
        if add.node_type != NodeType::Feature {
            warn!(place_name = %add.place_name, "chain refiner proposed a non-feature node, dropping");
            continue;
        }
        let Some(parent_id) = add.parent_node_id.clone() else {
            warn!(place_name = %add.place_name, "chain node proposal had no parent, dropping");
            continue;
        };
        if !visible_parents.contains(&parent_id) {
            warn!(place_name = %add.place_name, parent_id, "chain node proposal used a parent outside the visible chain, dropping");
            continue;
        }

        let norm_name = normalize(&add.place_name);
        let existing_id = store
            .nodes()
            .values()
            .find(|n| normalize(&n.place_name) == norm_name && n.parent_node_id.as_deref() == Some(parent_id.as_str()))
            .map(|n| n.id.clone());

        match existing_id {
            Some(id) => {
                if let Some(node) = store.node_mut(&id) {
                    if node.description.is_empty() {
                        node.description = add.description.unwrap_or_default();
                    }
                    for alias in add.aliases {
                        if !node.aliases.contains(&alias) {
                            node.aliases.push(alias);
                        }
                    }
                }
            }
            None => {
                let id = store.fresh_node_id(&add.place_name);
                store.insert_node(cartography_core::types::MapNode {
                    id,
                    place_name: add.place_name,
                    node_type: NodeType::Feature,
                    status: NodeStatus::Discovered,
                    description: add.description.unwrap_or_default(),
                    aliases: add.aliases,
                    parent_node_id: Some(parent_id),
                    visited: false,
                    position: None,
                });
                nodes_added += 1;
            }
        }
    }

    for add in reply.edges_to_add {
        let source = store.find_node_by_identifier(&add.source_identifier, None, None).map(|n| n.id.clone());
        let target = store.find_node_by_identifier(&add.target_identifier, None, None).map(|n| n.id.clone());
        let (Some(source_id), Some(target_id)) = (source, target) else {
            warn!(
                source = %add.source_identifier,
                target = %add.target_identifier,
                "chain edge proposal referenced an unresolvable endpoint, dropping"
            );
            continue;
        };

        let key = if source_id <= target_id {
            (source_id.clone(), target_id.clone(), add.edge_type)
        } else {
            (target_id.clone(), source_id.clone(), add.edge_type)
        };
        if !processed_keys.insert(key) {
            continue;
        }

        let allowed = {
            let (Some(a), Some(b)) = (store.node(&source_id), store.node(&target_id)) else {
                continue;
            };
            is_edge_connection_allowed(store.nodes(), a, b, add.edge_type)
        };

        if allowed {
            let status = add.status.unwrap_or(EdgeStatus::Open);
            let edge_id = store.fresh_edge_id(&source_id, &target_id);
            store.insert_edge(cartography_core::types::MapEdge {
                id: edge_id,
                source_node_id: source_id,
                target_node_id: target_id,
                edge_type: add.edge_type,
                status,
                description: add.description.unwrap_or_default(),
                travel_time: add.travel_time.unwrap_or_default(),
            });
            edges_added += 1;
        } else {
            pending.push(build_chain_request(
                store,
                &source_id,
                &target_id,
                add.edge_type,
                add.status,
                add.description.unwrap_or_default(),
                add.travel_time.unwrap_or_default(),
            ));
        }
    }

    (nodes_added, edges_added)
}

/// Drives the correction loop over `initial_requests` until the queue
/// drains or the round budget is exhausted. Unresolved requests after the
/// final round are dropped with a warning. A correction call that fails
/// because the model list is exhausted or rate-limited is itself tolerated
/// the same way; only an invalid credential is fatal and is propagated so
/// the turn can be terminated.
pub async fn refine(
    store: &mut GraphStore,
    dispatcher: &crate::dispatcher::Dispatcher,
    initial_requests: Vec<ChainRequest>,
    cancel: &CancellationToken,
    debug: &mut DebugPacket,
) -> Result<(), ChainError> {
    let mut pending = aggregate(initial_requests);
    let mut processed_keys: HashSet<(String, String, EdgeType)> = HashSet::new();
    let correction = CorrectionServices::new(dispatcher);

    for round in 0..MAX_CHAIN_REFINEMENT_ROUNDS {
        if pending.is_empty() {
            return Ok(());
        }

        let requests_in = pending.len();
        let visible_parents: HashSet<String> = pending.iter().flat_map(|r| r.ordered_parents.iter().cloned()).collect();
        let batch = std::mem::take(&mut pending);

        let reply = match request_chain_reply(&correction, store, &batch, cancel, debug).await {
            Ok(reply) => reply,
            Err(ChainError::CorrectionFailed(dispatch_err)) if dispatch_err.is_invalid_credential() => {
                return Err(ChainError::CorrectionFailed(dispatch_err));
            }
            Err(err) => {
                debug.warn(format!("connector-chain correction call failed: {err}"));
                continue;
            }
        };

        let mut next_pending = Vec::new();
        let (nodes_added, edges_added) = apply_additions(store, reply, &visible_parents, &mut processed_keys, &mut next_pending);

        debug.record_chain_round(ChainRoundDebug {
            round: round + 1,
            requests_in,
            nodes_added,
            edges_added,
            requests_remaining: next_pending.len(),
        });

        pending = aggregate(next_pending);
    }

    if !pending.is_empty() {
        debug.warn(format!("connector-chain refinement gave up with {} request(s) unresolved", pending.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subchain_detection_matches_contiguous_and_reversed() {
        let a = ChainRequest {
            original_source_id: "s".into(),
            original_target_id: "t".into(),
            edge_type: EdgeType::Path,
            edge_status: None,
            edge_description: String::new(),
            edge_travel_time: String::new(),
            ordered_parents: vec!["p1".into(), "p2".into()],
        };
        let b = ChainRequest {
            ordered_parents: vec!["p0".into(), "p1".into(), "p2".into(), "p3".into()],
            ..a.clone()
        };
        assert!(a.is_subchain_of(&b));

        let c = ChainRequest {
            ordered_parents: vec!["p3".into(), "p2".into(), "p1".into(), "p0".into()],
            ..a.clone()
        };
        assert!(a.is_subchain_of(&c));
    }

    #[test]
    fn aggregate_drops_subchains_and_keeps_superchain() {
        let short = ChainRequest {
            original_source_id: "s".into(),
            original_target_id: "t".into(),
            edge_type: EdgeType::Path,
            edge_status: None,
            edge_description: String::new(),
            edge_travel_time: String::new(),
            ordered_parents: vec!["p1".into(), "p2".into()],
        };
        let long = ChainRequest {
            ordered_parents: vec!["p0".into(), "p1".into(), "p2".into(), "p3".into()],
            ..short.clone()
        };

        let aggregated = aggregate(vec![short, long]);
        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].ordered_parents.len(), 4);
    }

    #[test]
    fn pending_pairs_are_consecutive_parents() {
        let request = ChainRequest {
            original_source_id: "s".into(),
            original_target_id: "t".into(),
            edge_type: EdgeType::Path,
            edge_status: None,
            edge_description: String::new(),
            edge_travel_time: String::new(),
            ordered_parents: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(
            request.pending_pairs(),
            vec![("a".to_string(), "b".to_string()), ("b".to_string(), "c".to_string())]
        );
    }
}
