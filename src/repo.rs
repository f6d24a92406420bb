//! Repository seams and the in-memory reference implementation.
//!
//! The engine consumes these traits and assumes nothing about storage
//! technology. The in-memory implementations back the CLI and the tests:
//! `DashMap` keeps the per-user read-check-modify budget update serialized
//! (entry locks), and graph reads are full snapshot clones so concurrent
//! queries never observe a half-applied mutation.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, Entry};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{CordonResult, RepoError, ValidationError};
use crate::model::{
    Attrs, AuditEntry, ClearanceLevel, GraphEdge, GraphNode, User, composite_id,
};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Creation payload for a node; the composite id is derived, never supplied.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub logical_id: String,
    pub classification: ClearanceLevel,
    pub entity_type: String,
    pub name: String,
    pub attrs: Attrs,
    pub at: DateTime<Utc>,
}

/// Creation payload for an edge. Endpoints must already exist at the edge's
/// classification level.
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub logical_id: String,
    pub classification: ClearanceLevel,
    pub source_node_id: String,
    pub target_node_id: String,
    pub relation_type: String,
    pub attrs: Attrs,
}

/// Full-snapshot graph reads plus validated mutation primitives.
pub trait GraphRepository {
    fn all_nodes(&self) -> CordonResult<Vec<GraphNode>>;
    fn all_edges(&self) -> CordonResult<Vec<GraphEdge>>;

    fn create_node(&self, spec: NodeSpec) -> CordonResult<GraphNode>;
    fn delete_node(&self, id: &str) -> CordonResult<()>;
    fn create_edge(&self, spec: EdgeSpec) -> CordonResult<GraphEdge>;
    fn delete_edge(&self, id: &str) -> CordonResult<()>;

    /// Bulk snapshot of one classification level, keyed by logical ids.
    fn export_level(&self, level: ClearanceLevel) -> CordonResult<LevelSnapshot>;
    /// Re-create a level snapshot, re-deriving node/edge ids from logical ids.
    fn import_level(&self, snapshot: LevelSnapshot) -> CordonResult<()>;
}

/// Outcome of an atomic budget reservation. Carries the post-operation
/// user record either way.
#[derive(Debug, Clone)]
pub enum BudgetReservation {
    /// One budget unit was taken.
    Taken(User),
    /// The budget was already empty; nothing was taken.
    Empty(User),
}

/// User reads trigger the lazy budget-reset check as a side effect.
pub trait UserRepository {
    fn find_by_id(&self, id: &str, now: DateTime<Utc>) -> CordonResult<Option<User>>;
    fn find_by_username(&self, username: &str, now: DateTime<Utc>) -> CordonResult<Option<User>>;
    /// Atomic per-user budget update.
    fn update_budget(
        &self,
        id: &str,
        new_budget: u32,
        new_reset_at: DateTime<Utc>,
    ) -> CordonResult<()>;
    /// Reset-then-check-then-decrement one budget unit as a single
    /// operation: with a budget of B, exactly B reservations are `Taken`
    /// per reset window no matter how the callers interleave.
    fn try_debit(&self, id: &str, now: DateTime<Utc>) -> CordonResult<BudgetReservation>;
}

/// Append-only audit store. Appends must never be reordered or dropped by
/// the implementation; the pipeline treats append failure as non-fatal.
pub trait AuditSink {
    fn append(&self, entry: AuditEntry) -> CordonResult<()>;
    fn entries(&self) -> CordonResult<Vec<AuditEntry>>;
}

// ---------------------------------------------------------------------------
// Level export/import payloads
// ---------------------------------------------------------------------------

/// Portable single-level snapshot. Node and edge ids are intentionally
/// absent: they are re-derived from logical ids on import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub level: ClearanceLevel,
    pub nodes: Vec<ExportedNode>,
    pub edges: Vec<ExportedEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedNode {
    pub logical_id: String,
    pub entity_type: String,
    pub name: String,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedEdge {
    pub logical_id: String,
    pub source_logical_id: String,
    pub target_logical_id: String,
    pub relation_type: String,
    pub attrs: Attrs,
}

// ---------------------------------------------------------------------------
// In-memory graph
// ---------------------------------------------------------------------------

/// In-memory graph store. Mutations validate before touching state, so each
/// call is all-or-nothing.
#[derive(Default)]
pub struct InMemoryGraph {
    nodes: DashMap<String, GraphNode>,
    edges: DashMap<String, GraphEdge>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphRepository for InMemoryGraph {
    fn all_nodes(&self) -> CordonResult<Vec<GraphNode>> {
        let mut nodes: Vec<GraphNode> = self.nodes.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    fn all_edges(&self) -> CordonResult<Vec<GraphEdge>> {
        let mut edges: Vec<GraphEdge> = self.edges.iter().map(|e| e.value().clone()).collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(edges)
    }

    fn create_node(&self, spec: NodeSpec) -> CordonResult<GraphNode> {
        let node = GraphNode::new(
            spec.logical_id,
            spec.classification,
            spec.entity_type,
            spec.name,
            spec.attrs,
            spec.at,
        );
        // Uniqueness check and insert share the entry lock.
        match self.nodes.entry(node.id.clone()) {
            Entry::Occupied(existing) => Err(ValidationError::DuplicateNode {
                id: existing.key().clone(),
            }
            .into()),
            Entry::Vacant(slot) => {
                slot.insert(node.clone());
                Ok(node)
            }
        }
    }

    fn delete_node(&self, id: &str) -> CordonResult<()> {
        if self.nodes.remove(id).is_none() {
            return Err(ValidationError::MissingNode { id: id.into() }.into());
        }
        // Incident edges cannot outlive an endpoint.
        self.edges
            .retain(|_, e| e.source_node_id != id && e.target_node_id != id);
        Ok(())
    }

    fn create_edge(&self, spec: EdgeSpec) -> CordonResult<GraphEdge> {
        let source = self
            .nodes
            .get(&spec.source_node_id)
            .ok_or_else(|| ValidationError::MissingNode {
                id: spec.source_node_id.clone(),
            })?
            .classification;
        let target = self
            .nodes
            .get(&spec.target_node_id)
            .ok_or_else(|| ValidationError::MissingNode {
                id: spec.target_node_id.clone(),
            })?
            .classification;
        if source != target {
            return Err(ValidationError::CrossLevelEdge {
                source_level: source.name().into(),
                target_level: target.name().into(),
            }
            .into());
        }
        if source != spec.classification {
            return Err(ValidationError::EdgeLevelMismatch {
                edge_level: spec.classification.name().into(),
                endpoint_level: source.name().into(),
            }
            .into());
        }
        let edge = GraphEdge::new(
            spec.logical_id,
            spec.classification,
            spec.source_node_id,
            spec.target_node_id,
            spec.relation_type,
            spec.attrs,
        );
        match self.edges.entry(edge.id.clone()) {
            Entry::Occupied(existing) => Err(ValidationError::DuplicateEdge {
                id: existing.key().clone(),
            }
            .into()),
            Entry::Vacant(slot) => {
                slot.insert(edge.clone());
                Ok(edge)
            }
        }
    }

    fn delete_edge(&self, id: &str) -> CordonResult<()> {
        if self.edges.remove(id).is_none() {
            return Err(ValidationError::MissingEdge { id: id.into() }.into());
        }
        Ok(())
    }

    fn export_level(&self, level: ClearanceLevel) -> CordonResult<LevelSnapshot> {
        let node_by_id = |id: &str| self.nodes.get(id).map(|n| n.logical_id.clone());
        let nodes = self
            .all_nodes()?
            .into_iter()
            .filter(|n| n.classification == level)
            .map(|n| ExportedNode {
                logical_id: n.logical_id,
                entity_type: n.entity_type,
                name: n.name,
                attrs: n.attrs,
            })
            .collect();
        let edges = self
            .all_edges()?
            .into_iter()
            .filter(|e| e.classification == level)
            .filter_map(|e| {
                let source_logical_id = node_by_id(&e.source_node_id)?;
                let target_logical_id = node_by_id(&e.target_node_id)?;
                Some(ExportedEdge {
                    logical_id: e.logical_id,
                    source_logical_id,
                    target_logical_id,
                    relation_type: e.relation_type,
                    attrs: e.attrs,
                })
            })
            .collect();
        Ok(LevelSnapshot {
            level,
            nodes,
            edges,
        })
    }

    fn import_level(&self, snapshot: LevelSnapshot) -> CordonResult<()> {
        let at = Utc::now();
        for n in snapshot.nodes {
            self.create_node(NodeSpec {
                logical_id: n.logical_id,
                classification: snapshot.level,
                entity_type: n.entity_type,
                name: n.name,
                attrs: n.attrs,
                at,
            })?;
        }
        for e in snapshot.edges {
            self.create_edge(EdgeSpec {
                logical_id: e.logical_id,
                classification: snapshot.level,
                source_node_id: composite_id(&e.source_logical_id, snapshot.level),
                target_node_id: composite_id(&e.target_logical_id, snapshot.level),
                relation_type: e.relation_type,
                attrs: e.attrs,
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory users
// ---------------------------------------------------------------------------

/// In-memory user store with lazy budget replenishment.
pub struct InMemoryUsers {
    users: DashMap<String, User>,
    config: EngineConfig,
}

impl InMemoryUsers {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            users: DashMap::new(),
            config,
        }
    }

    /// Seed or replace a user record.
    pub fn upsert(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// Replenish the budget if the reset timestamp has passed. Runs under
    /// the entry lock, so concurrent reads apply the reset exactly once.
    fn maybe_reset(&self, user: &mut User, now: DateTime<Utc>) {
        if now < user.budget_reset_at {
            return;
        }
        let max = self.config.budget_max(user.clearance);
        user.query_budget = max;
        user.budget_reset_at = now + Duration::seconds(self.config.budget_reset_secs);
        tracing::debug!(
            user = %user.id,
            budget = max,
            reset_at = %user.budget_reset_at,
            "query budget replenished"
        );
    }
}

impl UserRepository for InMemoryUsers {
    fn find_by_id(&self, id: &str, now: DateTime<Utc>) -> CordonResult<Option<User>> {
        let Some(mut entry) = self.users.get_mut(id) else {
            return Ok(None);
        };
        self.maybe_reset(entry.value_mut(), now);
        Ok(Some(entry.value().clone()))
    }

    fn find_by_username(&self, username: &str, now: DateTime<Utc>) -> CordonResult<Option<User>> {
        let id = self
            .users
            .iter()
            .find(|e| e.value().username == username)
            .map(|e| e.key().clone());
        match id {
            Some(id) => self.find_by_id(&id, now),
            None => Ok(None),
        }
    }

    fn update_budget(
        &self,
        id: &str,
        new_budget: u32,
        new_reset_at: DateTime<Utc>,
    ) -> CordonResult<()> {
        let mut entry = self
            .users
            .get_mut(id)
            .ok_or_else(|| RepoError::UserNotFound { id: id.into() })?;
        let user = entry.value_mut();
        user.query_budget = new_budget;
        user.budget_reset_at = new_reset_at;
        Ok(())
    }

    fn try_debit(&self, id: &str, now: DateTime<Utc>) -> CordonResult<BudgetReservation> {
        let mut entry = self
            .users
            .get_mut(id)
            .ok_or_else(|| RepoError::UserNotFound { id: id.into() })?;
        let user = entry.value_mut();
        // The check and the decrement share the entry lock, so a unit can
        // never be spent twice.
        self.maybe_reset(user, now);
        if user.query_budget == 0 {
            return Ok(BudgetReservation::Empty(user.clone()));
        }
        user.query_budget -= 1;
        Ok(BudgetReservation::Taken(user.clone()))
    }
}

// ---------------------------------------------------------------------------
// In-memory audit log
// ---------------------------------------------------------------------------

/// Append-only in-memory audit log.
#[derive(Default)]
pub struct InMemoryAudit {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditSink for InMemoryAudit {
    fn append(&self, entry: AuditEntry) -> CordonResult<()> {
        let mut entries = self.entries.write().map_err(|_| RepoError::AuditAppend {
            message: "audit log lock poisoned".into(),
        })?;
        entries.push(entry);
        Ok(())
    }

    fn entries(&self) -> CordonResult<Vec<AuditEntry>> {
        let entries = self.entries.read().map_err(|_| RepoError::Unavailable {
            message: "audit log lock poisoned".into(),
        })?;
        Ok(entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::error::CordonError;

    fn spec(logical: &str, level: ClearanceLevel) -> NodeSpec {
        NodeSpec {
            logical_id: logical.into(),
            classification: level,
            entity_type: "Target".into(),
            name: logical.to_uppercase(),
            attrs: Attrs::new(),
            at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_node_rejected() {
        let graph = InMemoryGraph::new();
        graph
            .create_node(spec("t1", ClearanceLevel::Secret))
            .expect("first create");
        let err = graph
            .create_node(spec("t1", ClearanceLevel::Secret))
            .expect_err("duplicate");
        assert!(matches!(
            err,
            CordonError::Validation(ValidationError::DuplicateNode { .. })
        ));
        // Same logical id at another level is a different fact.
        graph
            .create_node(spec("t1", ClearanceLevel::Confidential))
            .expect("other level");
    }

    #[test]
    fn concurrent_creates_accept_one_winner_per_id() {
        let graph = Arc::new(InMemoryGraph::new());
        let threads = 4;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let graph = Arc::clone(&graph);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    graph.create_node(spec("dup", ClearanceLevel::Secret)).is_ok()
                })
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(created, 1);
        assert_eq!(graph.all_nodes().expect("nodes").len(), 1);
    }

    #[test]
    fn cross_level_edge_rejected() {
        let graph = InMemoryGraph::new();
        let a = graph
            .create_node(spec("a", ClearanceLevel::Secret))
            .expect("a");
        let b = graph
            .create_node(spec("b", ClearanceLevel::Confidential))
            .expect("b");
        let err = graph
            .create_edge(EdgeSpec {
                logical_id: "e1".into(),
                classification: ClearanceLevel::Secret,
                source_node_id: a.id,
                target_node_id: b.id,
                relation_type: "tracks".into(),
                attrs: Attrs::new(),
            })
            .expect_err("cross-level");
        assert!(matches!(
            err,
            CordonError::Validation(ValidationError::CrossLevelEdge { .. })
        ));
    }

    #[test]
    fn delete_node_removes_incident_edges() {
        let graph = InMemoryGraph::new();
        let a = graph
            .create_node(spec("a", ClearanceLevel::Secret))
            .expect("a");
        let b = graph
            .create_node(spec("b", ClearanceLevel::Secret))
            .expect("b");
        graph
            .create_edge(EdgeSpec {
                logical_id: "e1".into(),
                classification: ClearanceLevel::Secret,
                source_node_id: a.id.clone(),
                target_node_id: b.id,
                relation_type: "tracks".into(),
                attrs: Attrs::new(),
            })
            .expect("edge");
        graph.delete_node(&a.id).expect("delete");
        assert!(graph.all_edges().expect("edges").is_empty());
        assert!(matches!(
            graph.delete_node(&a.id).expect_err("already gone"),
            CordonError::Validation(ValidationError::MissingNode { .. })
        ));
    }

    #[test]
    fn export_import_round_trip_preserves_logical_structure() {
        let graph = InMemoryGraph::new();
        let a = graph
            .create_node(spec("alpha", ClearanceLevel::Confidential))
            .expect("a");
        let b = graph
            .create_node(spec("bravo", ClearanceLevel::Confidential))
            .expect("b");
        // A node at another level must not leak into the export.
        graph
            .create_node(spec("charlie", ClearanceLevel::Secret))
            .expect("c");
        graph
            .create_edge(EdgeSpec {
                logical_id: "link-1".into(),
                classification: ClearanceLevel::Confidential,
                source_node_id: a.id,
                target_node_id: b.id,
                relation_type: "reports-to".into(),
                attrs: Attrs::new(),
            })
            .expect("edge");

        let snapshot = graph
            .export_level(ClearanceLevel::Confidential)
            .expect("export");
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.edges.len(), 1);

        let fresh = InMemoryGraph::new();
        fresh.import_level(snapshot).expect("import");
        let nodes = fresh.all_nodes().expect("nodes");
        let mut logical: Vec<&str> = nodes.iter().map(|n| n.logical_id.as_str()).collect();
        logical.sort();
        assert_eq!(logical, vec!["alpha", "bravo"]);
        let edges = fresh.all_edges().expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relation_type, "reports-to");
        assert_eq!(edges[0].source_node_id, "alpha_C");
    }

    #[test]
    fn budget_reset_applies_once_and_advances_window() {
        let config = EngineConfig::default();
        let users = InMemoryUsers::new(config.clone());
        let t0 = Utc::now();
        users.upsert(User {
            id: "u1".into(),
            username: "analyst".into(),
            clearance: ClearanceLevel::Confidential,
            attrs: Attrs::new(),
            query_budget: 0,
            budget_reset_at: t0,
        });

        let now = t0 + Duration::seconds(1);
        let user = users
            .find_by_id("u1", now)
            .expect("find")
            .expect("present");
        assert_eq!(user.query_budget, config.budget_confidential);
        assert_eq!(
            user.budget_reset_at,
            now + Duration::seconds(config.budget_reset_secs)
        );

        // A second read before the new deadline leaves the budget alone.
        assert!(matches!(
            users.try_debit("u1", now).expect("debit"),
            BudgetReservation::Taken(_)
        ));
        let again = users
            .find_by_id("u1", now + Duration::seconds(2))
            .expect("find")
            .expect("present");
        assert_eq!(again.query_budget, config.budget_confidential - 1);
    }

    #[test]
    fn try_debit_takes_exactly_the_budget() {
        let users = InMemoryUsers::new(EngineConfig::default());
        let now = Utc::now();
        users.upsert(User {
            id: "u1".into(),
            username: "analyst".into(),
            clearance: ClearanceLevel::Unclassified,
            attrs: Attrs::new(),
            query_budget: 1,
            budget_reset_at: now + Duration::hours(1),
        });
        match users.try_debit("u1", now).expect("debit") {
            BudgetReservation::Taken(user) => assert_eq!(user.query_budget, 0),
            other => panic!("expected a taken unit, got {other:?}"),
        }
        assert!(matches!(
            users.try_debit("u1", now).expect("debit"),
            BudgetReservation::Empty(_)
        ));
    }

    #[test]
    fn try_debit_is_atomic_under_contention() {
        let users = Arc::new(InMemoryUsers::new(EngineConfig::default()));
        let now = Utc::now();
        users.upsert(User {
            id: "u1".into(),
            username: "analyst".into(),
            clearance: ClearanceLevel::Unclassified,
            attrs: Attrs::new(),
            query_budget: 1,
            budget_reset_at: now + Duration::hours(1),
        });

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let users = Arc::clone(&users);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    matches!(
                        users.try_debit("u1", now).expect("debit"),
                        BudgetReservation::Taken(_)
                    )
                })
            })
            .collect();
        let taken = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|taken| *taken)
            .count();
        assert_eq!(taken, 1);
    }
}
