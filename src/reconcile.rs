//! Graph view reconciliation: collapsing classification-level duplicates.
//!
//! The same real-world entity may be recorded at several classification
//! levels under one `logical_id`, each level a more detailed or more
//! sensitive version of the fact. A view projects the access-filtered
//! node/edge set three ways:
//!
//! - **Level**: exactly one classification level.
//! - **Overlay**: the union of several levels side by side.
//! - **Virtual** (default): one node per logical id (the highest-
//!   classification variant the requester may see) with edges re-pointed
//!   onto the chosen variants.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::CordonResult;
use crate::model::{ClearanceLevel, GraphEdge, GraphNode, User};
use crate::policy;
use crate::repo::GraphRepository;

/// Requested view projection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum ViewMode {
    #[default]
    Virtual,
    Level {
        level: ClearanceLevel,
    },
    Overlay {
        levels: Vec<ClearanceLevel>,
    },
}

/// The node/edge set to present.
#[derive(Debug, Clone, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Fetch a snapshot, access-filter it for the user, and reconcile.
pub fn view_for_user(
    user: &User,
    mode: &ViewMode,
    graph: &impl GraphRepository,
) -> CordonResult<GraphView> {
    let nodes = policy::filter_accessible_nodes(user, graph.all_nodes()?);
    let edges = policy::filter_accessible_edges(user, graph.all_edges()?);
    Ok(reconcile(user, mode, nodes, edges))
}

/// Reconcile an access-filtered node/edge set into the requested view.
pub fn reconcile(
    user: &User,
    mode: &ViewMode,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
) -> GraphView {
    match mode {
        ViewMode::Level { level } => level_view(user, *level, nodes, edges),
        ViewMode::Overlay { levels } => overlay_view(user, levels, nodes, edges),
        ViewMode::Virtual => virtual_view(nodes, edges),
    }
}

/// Levels the user's clearance dominates.
fn accessible_levels(user: &User) -> Vec<ClearanceLevel> {
    ClearanceLevel::all()
        .into_iter()
        .filter(|l| policy::clearance_sufficient(user.clearance, *l))
        .collect()
}

fn level_view(
    user: &User,
    requested: ClearanceLevel,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
) -> GraphView {
    // An out-of-reach request falls back to the user's highest level.
    let target = if policy::clearance_sufficient(user.clearance, requested) {
        requested
    } else {
        user.clearance
    };
    let nodes: Vec<GraphNode> = nodes
        .into_iter()
        .filter(|n| n.classification == target)
        .collect();
    let present: BTreeSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let edges = edges
        .into_iter()
        .filter(|e| {
            e.classification == target
                && present.contains(e.source_node_id.as_str())
                && present.contains(e.target_node_id.as_str())
        })
        .collect();
    GraphView {
        nodes,
        edges,
    }
}

fn overlay_view(
    user: &User,
    requested: &[ClearanceLevel],
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
) -> GraphView {
    let accessible = accessible_levels(user);
    let mut effective: Vec<ClearanceLevel> = requested
        .iter()
        .copied()
        .filter(|l| accessible.contains(l))
        .collect();
    if effective.is_empty() {
        effective = accessible;
    }
    let nodes: Vec<GraphNode> = nodes
        .into_iter()
        .filter(|n| effective.contains(&n.classification))
        .collect();
    let present: BTreeSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let edges = edges
        .into_iter()
        .filter(|e| {
            effective.contains(&e.classification)
                && present.contains(e.source_node_id.as_str())
                && present.contains(e.target_node_id.as_str())
        })
        .collect();
    GraphView {
        nodes,
        edges,
    }
}

/// Per-logical-id reduction: keep the highest-classification variant the
/// user may see, then re-point and deduplicate edges accordingly.
fn virtual_view(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> GraphView {
    // node id -> logical id, before the reduction consumes the node list.
    let logical_of: HashMap<String, String> = nodes
        .iter()
        .map(|n| (n.id.clone(), n.logical_id.clone()))
        .collect();

    // Choose the best (highest-rank) variant per logical id.
    let mut best: HashMap<String, GraphNode> = HashMap::new();
    for node in nodes {
        match best.get(&node.logical_id) {
            Some(existing) if existing.classification.rank() >= node.classification.rank() => {}
            _ => {
                best.insert(node.logical_id.clone(), node);
            }
        }
    }

    // Re-point edges onto the chosen variants; drop edges whose endpoint
    // has no chosen variant. Deduplicate by logical id (or a synthesized
    // endpoint key), keeping the higher-classification duplicate.
    let mut merged: HashMap<String, GraphEdge> = HashMap::new();
    for mut edge in edges {
        let Some(source) = logical_of
            .get(&edge.source_node_id)
            .and_then(|l| best.get(l))
        else {
            continue;
        };
        let Some(target) = logical_of
            .get(&edge.target_node_id)
            .and_then(|l| best.get(l))
        else {
            continue;
        };
        edge.source_node_id = source.id.clone();
        edge.target_node_id = target.id.clone();

        let key = if edge.logical_id.is_empty() {
            format!(
                "{}|{}|{}",
                edge.source_node_id, edge.target_node_id, edge.relation_type
            )
        } else {
            edge.logical_id.clone()
        };
        match merged.get(&key) {
            Some(existing) if existing.classification.rank() >= edge.classification.rank() => {}
            _ => {
                merged.insert(key, edge);
            }
        }
    }

    let mut nodes: Vec<GraphNode> = best.into_values().collect();
    nodes.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));
    let mut edges: Vec<GraphEdge> = merged.into_values().collect();
    edges.sort_by(|a, b| a.id.cmp(&b.id));
    GraphView { nodes, edges }
}
