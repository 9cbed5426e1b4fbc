//! The top-level pipeline that takes a validated `MapUpdate` and the
//! current graph and runs its phases in strict order, since each phase
//! depends on the index state the previous one leaves behind.

use crate::chain::{self, ChainRequest};
use crate::correction::CorrectionServices;
use crate::dispatcher::{CancellationToken, Dispatcher};
use cartography_core::debug::DebugPacket;
use cartography_core::errors::{ApplierResult, DispatchError};
use cartography_core::hierarchy::{self, map_has_hierarchy_conflict, NodeIndex};
use cartography_core::types::{
    EdgeAdd, EdgeRemove, EdgeStatus, EdgeType, EdgeUpdate, InventoryItem, MapEdge, MapNode, MapUpdate, NodeAdd, NodeRemove,
    NodeStatus, NodeType, NodeUpdate, Npc, ROOT_SENTINEL,
};
use cartography_store::{normalize, GraphStore};
use std::collections::{HashMap, HashSet};

pub struct ApplyContext<'a> {
    pub narrative_context: &'a str,
    pub inventory: &'a [InventoryItem],
    pub npcs: &'a [Npc],
    pub dispatcher: &'a Dispatcher,
    pub current_node_id: Option<String>,
    pub destination_node_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub added_node_ids: Vec<String>,
    pub added_edge_ids: Vec<String>,
    /// The inventory snapshot after the companion-item filter.
    pub filtered_inventory: Vec<InventoryItem>,
    /// `destination_node_id`, possibly cleared by the descendant check.
    pub destination_node_id: Option<String>,
}

fn token_set(s: &str) -> HashSet<String> {
    normalize(s).split_whitespace().map(|t| t.to_string()).collect()
}

/// Token-level Jaccard similarity on normalized whitespace tokens, used by
/// the name-collision check for incoming node adds.
fn jaccard(a: &str, b: &str) -> f64 {
    let ta = token_set(a);
    let tb = token_set(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn names_collide(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b) || jaccard(a, b) >= 0.6
}

fn render_node_list(store: &GraphStore) -> String {
    let mut lines: Vec<String> = store.nodes().values().map(|n| format!("{}: {}", n.id, n.place_name)).collect();
    lines.sort();
    lines.join("\n")
}

/// Drop add/remove pairs that name-match (the narrator "redrawing" a
/// node), then drop any remaining add that shadows a live inventory item
/// or NPC name.
fn annihilate(update: &mut MapUpdate, inventory: &[InventoryItem], npcs: &[Npc], debug: &mut DebugPacket) {
    let mut dropped_adds = HashSet::new();
    let mut dropped_removes = HashSet::new();

    for (ai, add) in update.nodes_to_add.iter().enumerate() {
        for (ri, remove) in update.nodes_to_remove.iter().enumerate() {
            if dropped_removes.contains(&ri) {
                continue;
            }
            if normalize(&add.place_name) == normalize(&remove.identifier) {
                dropped_adds.insert(ai);
                dropped_removes.insert(ri);
                debug.warn(format!("annihilated matching add/remove pair for \"{}\"", add.place_name));
                break;
            }
        }
    }

    for (ai, add) in update.nodes_to_add.iter().enumerate() {
        if dropped_adds.contains(&ai) {
            continue;
        }
        let shadows_item = inventory.iter().any(|item| !item.is_vehicle() && names_collide(&add.place_name, &item.name));
        let shadows_npc = npcs.iter().any(|npc| {
            names_collide(&add.place_name, &npc.name) || npc.aliases.iter().any(|alias| names_collide(&add.place_name, alias))
        });
        if shadows_item || shadows_npc {
            dropped_adds.insert(ai);
            debug.warn(format!("dropped add \"{}\": shadows an inventory item or NPC name", add.place_name));
        }
    }

    let mut i = 0;
    update.nodes_to_add.retain(|_| {
        let keep = !dropped_adds.contains(&i);
        i += 1;
        keep
    });
    let mut j = 0;
    update.nodes_to_remove.retain(|_| {
        let keep = !dropped_removes.contains(&j);
        j += 1;
        keep
    });
}

/// Collapse duplicate edge adds keyed by `(min(endpoint), max(endpoint), type)`.
fn dedup_edge_adds(edges_to_add: &mut Vec<EdgeAdd>) {
    let mut seen = HashSet::new();
    edges_to_add.retain(|e| {
        let key = if e.source_identifier <= e.target_identifier {
            (normalize(&e.source_identifier), normalize(&e.target_identifier), e.edge_type)
        } else {
            (normalize(&e.target_identifier), normalize(&e.source_identifier), e.edge_type)
        };
        seen.insert(key)
    });
}

/// A rename is not a destruction; drop remove ops targeting either the old
/// or new name of any node being renamed.
fn reconcile_renames(update: &mut MapUpdate) {
    let renamed_names: HashSet<String> = update
        .nodes_to_update
        .iter()
        .filter_map(|u| u.new_place_name.as_ref())
        .map(|n| normalize(n))
        .chain(update.nodes_to_update.iter().map(|u| normalize(&u.identifier)))
        .collect();

    update.nodes_to_remove.retain(|r| !renamed_names.contains(&normalize(&r.identifier)));
}

fn resolve_parent_ref(store: &GraphStore, batch_name_to_id: &HashMap<String, String>, parent_ref: &str) -> Option<String> {
    if parent_ref == ROOT_SENTINEL {
        return None;
    }
    if let Some(node) = store.node(parent_ref) {
        return Some(node.id.clone());
    }
    if let Some(id) = batch_name_to_id.get(&normalize(parent_ref)) {
        return Some(id.clone());
    }
    store.find_node_by_identifier(parent_ref, None, None).map(|n| n.id.clone())
}

fn strip_pseudo_suffix(raw: &str) -> Option<String> {
    let (base, suffix) = raw.rsplit_once('-')?;
    if suffix.len() == 4 && suffix.chars().all(|c| c.is_ascii_hexdigit()) && !base.is_empty() {
        Some(base.to_string())
    } else {
        None
    }
}

struct ResolvedAdd {
    add: NodeAdd,
    parent_id: Option<String>,
    same_type_parent_conflict: bool,
}

fn resolve_add_parent(store: &GraphStore, batch_name_to_id: &HashMap<String, String>, add: &NodeAdd) -> Option<ResolvedAdd> {
    let child_type = add.node_type;
    let parent_ref = add.parent_node_id.as_deref().unwrap_or(ROOT_SENTINEL);

    if parent_ref == ROOT_SENTINEL {
        return Some(ResolvedAdd { add: add.clone(), parent_id: None, same_type_parent_conflict: false });
    }

    if let Some(parent_id) = resolve_parent_ref(store, batch_name_to_id, parent_ref) {
        let parent = store.node(&parent_id)?;
        if parent.node_type == child_type {
            return Some(ResolvedAdd { add: add.clone(), parent_id: Some(parent_id), same_type_parent_conflict: true });
        }
        if parent.node_type.strictly_above(child_type) {
            return Some(ResolvedAdd { add: add.clone(), parent_id: Some(parent_id), same_type_parent_conflict: false });
        }
        let snapped = hierarchy::find_closest_allowed_parent(store.nodes(), &parent_id, child_type);
        return Some(ResolvedAdd { add: add.clone(), parent_id: snapped, same_type_parent_conflict: false });
    }

    if let Some(base) = strip_pseudo_suffix(parent_ref) {
        let base_norm = normalize(&base);
        if let Some(id) = batch_name_to_id.get(&base_norm) {
            return Some(ResolvedAdd { add: add.clone(), parent_id: Some(id.clone()), same_type_parent_conflict: false });
        }
    }

    None
}

fn create_or_merge_node(
    store: &mut GraphStore,
    resolved: ResolvedAdd,
    batch_name_to_id: &mut HashMap<String, String>,
    added_node_ids: &mut Vec<String>,
    pending_edges: &mut Vec<EdgeAdd>,
) {
    let ResolvedAdd { add, parent_id, same_type_parent_conflict } = resolved;
    let norm_name = normalize(&add.place_name);

    let existing_id = store
        .nodes()
        .values()
        .find(|n| normalize(&n.place_name) == norm_name && n.parent_node_id == parent_id)
        .map(|n| n.id.clone());

    let node_id = match existing_id {
        Some(id) => {
            if let Some(node) = store.node_mut(&id) {
                if node.description.is_empty() {
                    if let Some(desc) = &add.description {
                        node.description = desc.clone();
                    }
                }
                for alias in &add.aliases {
                    if !node.aliases.contains(alias) {
                        node.aliases.push(alias.clone());
                    }
                }
            }
            id
        }
        None => {
            let id = store.fresh_node_id(&add.place_name);
            store.insert_node(MapNode {
                id: id.clone(),
                place_name: add.place_name.clone(),
                node_type: add.node_type,
                status: add.status.unwrap_or(NodeStatus::Discovered),
                description: add.description.clone().unwrap_or_default(),
                aliases: add.aliases.clone(),
                parent_node_id: parent_id.clone(),
                visited: false,
                position: None,
            });
            added_node_ids.push(id.clone());
            id
        }
    };

    batch_name_to_id.insert(norm_name, node_id.clone());

    if same_type_parent_conflict {
        if let Some(parent_id) = parent_id {
            pending_edges.push(EdgeAdd {
                source_identifier: node_id,
                target_identifier: parent_id,
                edge_type: EdgeType::Path,
                status: None,
                description: None,
                travel_time: None,
            });
        }
    }
}

/// Hierarchical, iterative node addition, with a one-shot "guess parent"
/// correction pass when a full iteration makes no progress.
async fn add_nodes(
    store: &mut GraphStore,
    adds: Vec<NodeAdd>,
    ctx: &ApplyContext<'_>,
    batch_name_to_id: &mut HashMap<String, String>,
    added_node_ids: &mut Vec<String>,
    pending_edges: &mut Vec<EdgeAdd>,
    cancel: &CancellationToken,
    debug: &mut DebugPacket,
) -> Result<(), DispatchError> {
    let correction = CorrectionServices::new(ctx.dispatcher);
    let mut queue = adds;
    let mut guessed_once = false;

    loop {
        if queue.is_empty() {
            return Ok(());
        }

        let mut progressed = false;
        let mut still_unresolved = Vec::new();

        for add in queue {
            match resolve_add_parent(store, batch_name_to_id, &add) {
                Some(resolved) => {
                    progressed = true;
                    create_or_merge_node(store, resolved, batch_name_to_id, added_node_ids, pending_edges);
                }
                None => still_unresolved.push(add),
            }
        }

        queue = still_unresolved;
        if queue.is_empty() || progressed {
            continue;
        }

        if guessed_once {
            for add in &queue {
                debug.warn(format!("dropping add \"{}\": parent unresolved after guess pass", add.place_name));
            }
            return Ok(());
        }
        guessed_once = true;

        let rendering = render_node_list(store);
        let mut guessed = Vec::with_capacity(queue.len());
        for mut add in queue {
            let guess = correction.guess_parent(&add.place_name, ctx.narrative_context, &rendering, cancel, debug).await?;
            add.parent_node_id = guess.or_else(|| Some(ROOT_SENTINEL.to_string()));
            guessed.push(add);
        }
        queue = guessed;
    }
}

/// Resolve each update's target and apply field-wise changes.
async fn update_nodes(
    store: &mut GraphStore,
    updates: Vec<NodeUpdate>,
    ctx: &ApplyContext<'_>,
    batch_name_to_id: &mut HashMap<String, String>,
    cancel: &CancellationToken,
    debug: &mut DebugPacket,
) -> Result<(), DispatchError> {
    let correction = CorrectionServices::new(ctx.dispatcher);

    for update in updates {
        let adjacency = store.build_adjacency();
        let resolved_id = store
            .find_node_by_identifier(&update.identifier, ctx.current_node_id.as_deref(), Some(&adjacency))
            .map(|n| n.id.clone());

        let resolved_id = match resolved_id {
            Some(id) => Some(id),
            None => {
                let rendering = render_node_list(store);
                correction.resolve_identifier(&update.identifier, &rendering, cancel, debug).await?
            }
        };

        let Some(node_id) = resolved_id else {
            debug.warn(format!("node update target \"{}\" could not be resolved, skipping", update.identifier));
            continue;
        };

        if let Some(description) = update.description {
            if let Some(node) = store.node_mut(&node_id) {
                node.description = description;
            }
        }
        if let Some(aliases) = update.aliases {
            if let Some(node) = store.node_mut(&node_id) {
                node.aliases = aliases;
            }
        }
        if let Some(status) = update.status {
            if let Some(node) = store.node_mut(&node_id) {
                node.status = status;
            }
        }
        if let Some(node_type) = update.node_type {
            if let Some(node) = store.node_mut(&node_id) {
                node.node_type = node_type;
            }
        }

        if let Some(new_parent_ref) = update.parent_node_id {
            reparent_node(store, &node_id, &new_parent_ref, batch_name_to_id, debug);
        }

        if let Some(new_name) = update.new_place_name {
            rename_node(store, &node_id, &new_name, batch_name_to_id);
        }
    }
    Ok(())
}

fn reparent_node(store: &mut GraphStore, node_id: &str, new_parent_ref: &str, batch_name_to_id: &HashMap<String, String>, debug: &mut DebugPacket) {
    let Some(new_parent_id) = resolve_parent_ref(store, batch_name_to_id, new_parent_ref) else {
        if new_parent_ref == ROOT_SENTINEL {
            if let Some(node) = store.node_mut(node_id) {
                node.parent_node_id = None;
            }
        } else {
            debug.warn(format!("reparent target \"{new_parent_ref}\" could not be resolved, leaving parent unchanged"));
        }
        return;
    };

    let (child_type, parent_type) = match (store.node(node_id), store.node(&new_parent_id)) {
        (Some(c), Some(p)) => (c.node_type, p.node_type),
        _ => return,
    };

    if parent_type == child_type {
        let downgrade = store.node(node_id).and_then(|child| hierarchy::suggest_node_type_downgrade(child, parent_type));
        match downgrade {
            Some(new_type) => {
                if let Some(node) = store.node_mut(node_id) {
                    node.node_type = new_type;
                    node.parent_node_id = Some(new_parent_id);
                }
            }
            None => {
                let grandparent = store.node(&new_parent_id).and_then(|p| p.parent_node_id.clone());
                debug.warn("no legal downgrade for reparenting under a same-type parent; adopting grandparent instead");
                if let Some(node) = store.node_mut(node_id) {
                    node.parent_node_id = grandparent;
                }
            }
        }
    } else if let Some(node) = store.node_mut(node_id) {
        node.parent_node_id = Some(new_parent_id);
    }
}

fn rename_node(store: &mut GraphStore, node_id: &str, new_name: &str, batch_name_to_id: &mut HashMap<String, String>) {
    let old_name = match store.node(node_id) {
        Some(n) => n.place_name.clone(),
        None => return,
    };
    if normalize(&old_name) == normalize(new_name) {
        return;
    }
    if let Some(node) = store.node_mut(node_id) {
        if !node.aliases.iter().any(|a| normalize(a) == normalize(&old_name)) {
            node.aliases.push(old_name.clone());
        }
        node.place_name = new_name.to_string();
    }
    batch_name_to_id.remove(&normalize(&old_name));
    batch_name_to_id.insert(normalize(new_name), node_id.to_string());
    store.rebuild_indexes();
}

/// Honor the soft-refusal rule, otherwise cascade-delete.
async fn remove_nodes(
    store: &mut GraphStore,
    removes: Vec<NodeRemove>,
    ctx: &ApplyContext<'_>,
    cancel: &CancellationToken,
    debug: &mut DebugPacket,
) -> Result<(), DispatchError> {
    let correction = CorrectionServices::new(ctx.dispatcher);

    for remove in removes {
        let adjacency = store.build_adjacency();
        let resolved_id = store
            .find_node_by_identifier(&remove.identifier, ctx.current_node_id.as_deref(), Some(&adjacency))
            .map(|n| n.id.clone());
        let resolved_id = match resolved_id {
            Some(id) => Some(id),
            None => {
                let rendering = render_node_list(store);
                correction.resolve_identifier(&remove.identifier, &rendering, cancel, debug).await?
            }
        };
        let Some(node_id) = resolved_id else {
            debug.warn(format!("node removal target \"{}\" could not be resolved, skipping", remove.identifier));
            continue;
        };

        let holds_non_junk = ctx.inventory.iter().any(|item| item.holder_id.as_deref() == Some(node_id.as_str()) && !item.is_junk());
        if holds_non_junk {
            debug.warn(format!("soft refusal: node {node_id} holds a non-junk item, skipping removal"));
            continue;
        }

        store.remove_node(&node_id);
    }
    Ok(())
}

#[derive(Clone)]
enum Net {
    DowngradeChild(NodeType),
    ReparentToGrandparent(Option<String>),
    UpgradeParent(NodeType),
}

fn describe_net(nodes: &NodeIndex, child: &MapNode, net: &Net) -> String {
    match net {
        Net::DowngradeChild(t) => format!("downgrade \"{}\" to {:?}", child.place_name, t),
        Net::ReparentToGrandparent(gid) => {
            let name = gid.as_deref().and_then(|id| nodes.get(id)).map(|n| n.place_name.as_str()).unwrap_or(ROOT_SENTINEL);
            format!("reparent \"{}\" to \"{}\"", child.place_name, name)
        }
        Net::UpgradeParent(t) => format!("upgrade parent of \"{}\" to {:?}", child.place_name, t),
    }
}

fn simulate_net(nodes: &NodeIndex, child_id: &str, parent_id: &str, net: &Net) -> bool {
    let mut clone = nodes.clone();
    match net {
        Net::DowngradeChild(t) => {
            if let Some(c) = clone.get_mut(child_id) {
                c.node_type = *t;
            }
        }
        Net::ReparentToGrandparent(gid) => {
            if let Some(c) = clone.get_mut(child_id) {
                c.parent_node_id = gid.clone();
            }
        }
        Net::UpgradeParent(t) => {
            if let Some(p) = clone.get_mut(parent_id) {
                p.node_type = *t;
            }
        }
    }
    !map_has_hierarchy_conflict(&clone)
}

fn apply_net(store: &mut GraphStore, child_id: &str, parent_id: &str, net: &Net) {
    match net {
        Net::DowngradeChild(t) => {
            if let Some(c) = store.node_mut(child_id) {
                c.node_type = *t;
            }
        }
        Net::ReparentToGrandparent(gid) => {
            if let Some(c) = store.node_mut(child_id) {
                c.parent_node_id = gid.clone();
            }
        }
        Net::UpgradeParent(t) => {
            if let Some(p) = store.node_mut(parent_id) {
                p.node_type = *t;
            }
        }
    }
}

/// Resolve same-type-parent conflicts by simulating candidate nets and
/// keeping only the ones that leave the map conflict-free.
async fn resolve_hierarchy_conflicts(
    store: &mut GraphStore,
    ctx: &ApplyContext<'_>,
    cancel: &CancellationToken,
    debug: &mut DebugPacket,
) -> Result<(), DispatchError> {
    let correction = CorrectionServices::new(ctx.dispatcher);

    let conflicting_children: Vec<(String, String)> = store
        .nodes()
        .values()
        .filter_map(|child| {
            let parent_id = hierarchy::resolved_parent_id(child.parent_node_id.as_deref())?;
            let parent = store.node(parent_id)?;
            (parent.node_type == child.node_type).then(|| (child.id.clone(), parent.id.clone()))
        })
        .collect();

    for (child_id, parent_id) in conflicting_children {
        let nodes = store.nodes().clone();
        let (Some(child), Some(parent)) = (nodes.get(&child_id), nodes.get(&parent_id)) else { continue };

        let mut candidates = Vec::new();
        if let Some(t) = hierarchy::suggest_node_type_downgrade(child, parent.node_type) {
            candidates.push(Net::DowngradeChild(t));
        }
        candidates.push(Net::ReparentToGrandparent(
            hierarchy::resolved_parent_id(parent.parent_node_id.as_deref()).map(|s| s.to_string()),
        ));
        if let Some(t) = hierarchy::suggest_node_type_upgrade(&nodes, parent) {
            candidates.push(Net::UpgradeParent(t));
        }

        let surviving: Vec<&Net> = candidates.iter().filter(|net| simulate_net(&nodes, &child_id, &parent_id, net)).collect();

        match surviving.len() {
            0 => continue,
            1 => apply_net(store, &child_id, &parent_id, surviving[0]),
            _ => {
                let descriptions: Vec<String> = surviving.iter().map(|n| describe_net(&nodes, child, n)).collect();
                let chosen = correction.choose_hierarchy_resolution(&descriptions, cancel, debug).await?;
                let chosen_net = *surviving.get(chosen).unwrap_or(&surviving[0]);
                apply_net(store, &child_id, &parent_id, chosen_net);
            }
        }
    }
    Ok(())
}

fn edge_status_default(store: &GraphStore, source_id: &str, target_id: &str) -> EdgeStatus {
    let rumored = |id: &str| store.node(id).map(|n| n.status == NodeStatus::Rumored).unwrap_or(false);
    if rumored(source_id) || rumored(target_id) {
        EdgeStatus::Rumored
    } else {
        EdgeStatus::Open
    }
}

async fn resolve_endpoint(
    store: &GraphStore,
    correction: &CorrectionServices<'_>,
    identifier: &str,
    current_node_id: Option<&str>,
    cancel: &CancellationToken,
    debug: &mut DebugPacket,
) -> Result<Option<String>, DispatchError> {
    let adjacency = store.build_adjacency();
    if let Some(node) = store.find_node_by_identifier(identifier, current_node_id, Some(&adjacency)) {
        return Ok(Some(node.id.clone()));
    }
    let rendering = render_node_list(store);
    correction.resolve_identifier(identifier, &rendering, cancel, debug).await
}

/// Edge adds, updates, and removes.
async fn apply_edge_ops(
    store: &mut GraphStore,
    edges_to_add: Vec<EdgeAdd>,
    edges_to_update: Vec<EdgeUpdate>,
    edges_to_remove: Vec<EdgeRemove>,
    ctx: &ApplyContext<'_>,
    cancel: &CancellationToken,
    debug: &mut DebugPacket,
    added_edge_ids: &mut Vec<String>,
) -> Result<Vec<ChainRequest>, DispatchError> {
    let correction = CorrectionServices::new(ctx.dispatcher);
    let mut processed_keys: HashSet<(String, String, EdgeType)> = HashSet::new();
    let mut chain_requests = Vec::new();
    let current = ctx.current_node_id.as_deref();

    for add in edges_to_add {
        let source_id = resolve_endpoint(store, &correction, &add.source_identifier, current, cancel, debug).await?;
        let target_id = resolve_endpoint(store, &correction, &add.target_identifier, current, cancel, debug).await?;
        let (Some(source_id), Some(target_id)) = (source_id, target_id) else {
            debug.warn(format!(
                "edge add {} -> {} could not be resolved, skipping",
                add.source_identifier, add.target_identifier
            ));
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
        if store.find_edge(&source_id, &target_id, add.edge_type).is_some() {
            continue;
        }

        let allowed = match (store.node(&source_id), store.node(&target_id)) {
            (Some(a), Some(b)) => hierarchy::is_edge_connection_allowed(store.nodes(), a, b, add.edge_type),
            _ => false,
        };

        if allowed {
            let status = add.status.unwrap_or_else(|| edge_status_default(store, &source_id, &target_id));
            let edge_id = store.fresh_edge_id(&source_id, &target_id);
            store.insert_edge(MapEdge {
                id: edge_id.clone(),
                source_node_id: source_id,
                target_node_id: target_id,
                edge_type: add.edge_type,
                status,
                description: add.description.unwrap_or_default(),
                travel_time: add.travel_time.unwrap_or_default(),
            });
            added_edge_ids.push(edge_id);
        } else {
            chain_requests.push(chain::build_chain_request(
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

    for update in edges_to_update {
        let source_id = resolve_endpoint(store, &correction, &update.source_identifier, current, cancel, debug).await?;
        let target_id = resolve_endpoint(store, &correction, &update.target_identifier, current, cancel, debug).await?;
        let (Some(source_id), Some(target_id)) = (source_id, target_id) else {
            debug.warn(format!(
                "edge update {} -> {} could not be resolved, skipping",
                update.source_identifier, update.target_identifier
            ));
            continue;
        };

        let edge_id = match update.edge_type {
            Some(t) => store.find_edge(&source_id, &target_id, t).map(|e| e.id.clone()),
            None => store.find_any_edge(&source_id, &target_id).map(|e| e.id.clone()),
        };
        let Some(edge_id) = edge_id else {
            debug.warn(format!("edge update {source_id} -> {target_id} had no matching live edge, skipping"));
            continue;
        };

        if let Some(new_type) = update.new_edge_type {
            let allowed = match (store.node(&source_id), store.node(&target_id)) {
                (Some(a), Some(b)) => hierarchy::is_edge_connection_allowed(store.nodes(), a, b, new_type),
                _ => false,
            };
            if !allowed {
                debug.warn(format!("edge retype for {edge_id} to {new_type:?} would violate adjacency, skipping"));
                continue;
            }
        }

        if let Some(edge) = store.edge_mut(&edge_id) {
            if let Some(status) = update.new_status {
                edge.status = status;
            }
            if let Some(description) = update.new_description {
                edge.description = description;
            }
            if let Some(travel_time) = update.new_travel_time {
                edge.travel_time = travel_time;
            }
            if let Some(edge_type) = update.new_edge_type {
                edge.edge_type = edge_type;
            }
        }
    }

    for remove in edges_to_remove {
        let resolved_id = if let Some(identifier) = &remove.identifier {
            store
                .edges()
                .get(identifier)
                .map(|e| e.id.clone())
                .or_else(|| store.edges().values().find(|e| e.id.contains(identifier.as_str())).map(|e| e.id.clone()))
        } else {
            None
        };

        let resolved_id = match resolved_id {
            Some(id) => Some(id),
            None => match (&remove.source_identifier, &remove.target_identifier) {
                (Some(src), Some(tgt)) => {
                    let source_id = resolve_endpoint(store, &correction, src, current, cancel, debug).await?;
                    let target_id = resolve_endpoint(store, &correction, tgt, current, cancel, debug).await?;
                    match (source_id, target_id) {
                        (Some(source_id), Some(target_id)) => match remove.edge_type {
                            Some(t) => store.find_edge(&source_id, &target_id, t).map(|e| e.id.clone()),
                            None => store.find_any_edge(&source_id, &target_id).map(|e| e.id.clone()),
                        },
                        _ => None,
                    }
                }
                _ => None,
            },
        };

        match resolved_id {
            Some(id) => {
                store.remove_edge(&id);
            }
            None => debug.warn("edge remove op could not be resolved by id, substring, or endpoint pair, skipping"),
        }
    }

    Ok(chain_requests)
}

/// Delete any node whose name exactly matches an item or NPC.
fn sweep_item_npc_collisions(store: &mut GraphStore, inventory: &[InventoryItem], npcs: &[Npc], debug: &mut DebugPacket) {
    let colliding: Vec<String> = store
        .nodes()
        .values()
        .filter(|n| {
            inventory.iter().any(|item| normalize(&item.name) == normalize(&n.place_name))
                || npcs.iter().any(|npc| normalize(&npc.name) == normalize(&n.place_name))
        })
        .map(|n| n.id.clone())
        .collect();

    for id in colliding {
        debug.warn(format!("post-pass safety net: deleting node {id}, name collides with an item/NPC"));
        store.remove_node(&id);
    }
}

/// Remove any inventory item whose name matches a companion NPC.
fn filter_companion_items(inventory: &[InventoryItem], npcs: &[Npc]) -> Vec<InventoryItem> {
    inventory
        .iter()
        .filter(|item| !npcs.iter().any(|npc| normalize(&npc.name) == normalize(&item.name)))
        .cloned()
        .collect()
}

/// True iff `current` is `destination` or a descendant of it.
fn is_descendant_or_equal(store: &GraphStore, current: &str, destination: &str) -> bool {
    if current == destination {
        return true;
    }
    let mut node = store.node(current);
    while let Some(n) = node {
        match hierarchy::resolved_parent_id(n.parent_node_id.as_deref()) {
            Some(pid) if pid == destination => return true,
            Some(pid) => node = store.node(pid),
            None => return false,
        }
    }
    false
}

/// Runs the full apply pipeline and returns the newly added node and edge
/// ids plus the post-cleanup inventory and destination.
pub async fn apply_map_update(
    store: &mut GraphStore,
    mut update: MapUpdate,
    ctx: &ApplyContext<'_>,
    cancel: &CancellationToken,
    debug: &mut DebugPacket,
) -> ApplierResult<ApplyOutcome> {
    annihilate(&mut update, ctx.inventory, ctx.npcs, debug);
    dedup_edge_adds(&mut update.edges_to_add);
    reconcile_renames(&mut update);

    let mut batch_name_to_id: HashMap<String, String> = HashMap::new();
    let mut added_node_ids = Vec::new();
    let mut added_edge_ids = Vec::new();
    let mut pending_edges_from_adds = Vec::new();

    add_nodes(
        store,
        update.nodes_to_add,
        ctx,
        &mut batch_name_to_id,
        &mut added_node_ids,
        &mut pending_edges_from_adds,
        cancel,
        debug,
    )
    .await?;

    update_nodes(store, update.nodes_to_update, ctx, &mut batch_name_to_id, cancel, debug).await?;
    remove_nodes(store, update.nodes_to_remove, ctx, cancel, debug).await?;
    resolve_hierarchy_conflicts(store, ctx, cancel, debug).await?;

    let mut edges_to_add = update.edges_to_add;
    edges_to_add.extend(pending_edges_from_adds);

    let chain_requests = apply_edge_ops(
        store,
        edges_to_add,
        update.edges_to_update,
        update.edges_to_remove,
        ctx,
        cancel,
        debug,
        &mut added_edge_ids,
    )
    .await?;

    store.prune_dangling_edges();

    chain::refine(store, ctx.dispatcher, chain_requests, cancel, debug).await?;

    store.prune_dangling_edges();
    sweep_item_npc_collisions(store, ctx.inventory, ctx.npcs, debug);
    let filtered_inventory = filter_companion_items(ctx.inventory, ctx.npcs);

    let destination_node_id = match (&ctx.current_node_id, &ctx.destination_node_id) {
        (Some(current), Some(destination)) if is_descendant_or_equal(store, current, destination) => None,
        (_, other) => other.clone(),
    };

    Ok(ApplyOutcome { added_node_ids, added_edge_ids, filtered_inventory, destination_node_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::RateLimiter;
    use async_trait::async_trait;
    use cartography_core::errors::DispatchError;
    use cartography_core::traits::{GenerationRequest, GenerationResponse, ModelBackend, ModelCapabilities};
    use cartography_core::types::{NodeAdd, NodeStatus as NS, NodeType as NT};
    use std::sync::Arc;
    use std::time::Duration;

    struct SilentBackend;

    #[async_trait]
    impl ModelBackend for SilentBackend {
        fn name(&self) -> &str {
            "silent"
        }
        fn capabilities(&self) -> ModelCapabilities {
            ModelCapabilities { supports_system_instruction: true, supports_thinking: false, supports_json_schema: false }
        }
        async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, DispatchError> {
            Ok(GenerationResponse { text: String::new(), model: "silent".to_string() })
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(vec![Arc::new(SilentBackend)], Arc::new(RateLimiter::new_with_floor(Duration::from_millis(1))))
    }

    fn make_ctx<'a>(dispatcher: &'a Dispatcher, inventory: &'a [InventoryItem], npcs: &'a [Npc]) -> ApplyContext<'a> {
        ApplyContext { narrative_context: "", inventory, npcs, dispatcher, current_node_id: None, destination_node_id: None }
    }

    #[tokio::test]
    async fn adds_region_then_feature_under_it() {
        let dispatcher = dispatcher();
        let inventory = Vec::new();
        let npcs = Vec::new();
        let ctx = make_ctx(&dispatcher, &inventory, &npcs);
        let cancel = CancellationToken::new();
        let mut debug = DebugPacket::default();
        let mut store = GraphStore::new();

        let update = MapUpdate {
            nodes_to_add: vec![
                NodeAdd {
                    place_name: "Whispering Woods".to_string(),
                    node_type: NT::Region,
                    status: Some(NS::Discovered),
                    description: None,
                    aliases: Vec::new(),
                    parent_node_id: Some(ROOT_SENTINEL.to_string()),
                },
                NodeAdd {
                    place_name: "Stone Altar".to_string(),
                    node_type: NT::Feature,
                    status: Some(NS::Discovered),
                    description: None,
                    aliases: Vec::new(),
                    parent_node_id: Some("Whispering Woods".to_string()),
                },
            ],
            ..Default::default()
        };

        let outcome = apply_map_update(&mut store, update, &ctx, &cancel, &mut debug).await.unwrap();
        assert_eq!(outcome.added_node_ids.len(), 2);
        assert!(store.edges().is_empty());

        let altar = store.nodes().values().find(|n| n.place_name == "Stone Altar").unwrap();
        let woods = store.nodes().values().find(|n| n.place_name == "Whispering Woods").unwrap();
        assert_eq!(altar.parent_node_id.as_deref(), Some(woods.id.as_str()));
    }

    #[tokio::test]
    async fn annihilation_drops_matching_add_remove_pair() {
        let dispatcher = dispatcher();
        let inventory = Vec::new();
        let npcs = Vec::new();
        let ctx = make_ctx(&dispatcher, &inventory, &npcs);
        let cancel = CancellationToken::new();
        let mut debug = DebugPacket::default();
        let mut store = GraphStore::new();

        let update = MapUpdate {
            nodes_to_add: vec![NodeAdd {
                place_name: "Ghost Town".to_string(),
                node_type: NT::Settlement,
                status: None,
                description: None,
                aliases: Vec::new(),
                parent_node_id: None,
            }],
            nodes_to_remove: vec![NodeRemove { identifier: "Ghost Town".to_string() }],
            ..Default::default()
        };

        let outcome = apply_map_update(&mut store, update, &ctx, &cancel, &mut debug).await.unwrap();
        assert!(outcome.added_node_ids.is_empty());
        assert!(store.nodes().is_empty());
    }

    #[tokio::test]
    async fn soft_refusal_keeps_node_holding_non_junk_item() {
        let dispatcher = dispatcher();
        let mut inventory = vec![InventoryItem {
            id: "item-1".to_string(),
            name: "Rusty Dagger".to_string(),
            item_type: "weapon".to_string(),
            holder_id: None,
            tags: Vec::new(),
        }];
        let npcs: Vec<Npc> = Vec::new();

        let mut store = GraphStore::new();
        store.insert_node(MapNode {
            id: "shack-1".to_string(),
            place_name: "Shack".to_string(),
            node_type: NT::Feature,
            status: NS::Discovered,
            description: String::new(),
            aliases: Vec::new(),
            parent_node_id: None,
            visited: false,
            position: None,
        });
        inventory[0].holder_id = Some("shack-1".to_string());

        let cancel = CancellationToken::new();
        let mut debug = DebugPacket::default();
        let applier_ctx = make_ctx(&dispatcher, &inventory, &npcs);

        let update = MapUpdate { nodes_to_remove: vec![NodeRemove { identifier: "Shack".to_string() }], ..Default::default() };

        apply_map_update(&mut store, update, &applier_ctx, &cancel, &mut debug).await.unwrap();
        assert!(store.node("shack-1").is_some());
        assert!(debug.warnings.iter().any(|w| w.contains("soft refusal")));
    }

    #[tokio::test]
    async fn edge_between_adjacent_features_is_created() {
        let dispatcher = dispatcher();
        let inventory: Vec<InventoryItem> = Vec::new();
        let npcs: Vec<Npc> = Vec::new();

        let mut store = GraphStore::new();
        store.insert_node(MapNode {
            id: "settlement-a".to_string(),
            place_name: "Settlement A".to_string(),
            node_type: NT::Settlement,
            status: NS::Discovered,
            description: String::new(),
            aliases: Vec::new(),
            parent_node_id: None,
            visited: false,
            position: None,
        });
        store.insert_node(MapNode {
            id: "north-gate".to_string(),
            place_name: "North Gate".to_string(),
            node_type: NT::Feature,
            status: NS::Discovered,
            description: String::new(),
            aliases: Vec::new(),
            parent_node_id: Some("settlement-a".to_string()),
            visited: false,
            position: None,
        });
        store.insert_node(MapNode {
            id: "south-gate".to_string(),
            place_name: "South Gate".to_string(),
            node_type: NT::Feature,
            status: NS::Discovered,
            description: String::new(),
            aliases: Vec::new(),
            parent_node_id: Some("settlement-a".to_string()),
            visited: false,
            position: None,
        });

        let applier_ctx = make_ctx(&dispatcher, &inventory, &npcs);
        let cancel = CancellationToken::new();
        let mut debug = DebugPacket::default();

        let update = MapUpdate {
            edges_to_add: vec![EdgeAdd {
                source_identifier: "North Gate".to_string(),
                target_identifier: "South Gate".to_string(),
                edge_type: EdgeType::Path,
                status: None,
                description: None,
                travel_time: None,
            }],
            ..Default::default()
        };

        let outcome = apply_map_update(&mut store, update, &applier_ctx, &cancel, &mut debug).await.unwrap();
        assert_eq!(outcome.added_edge_ids.len(), 1);
        assert_eq!(store.edges().len(), 1);
    }
}
