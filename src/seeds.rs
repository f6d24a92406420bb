//! Deterministic demo dataset: three users, a small multi-level graph.
//!
//! Node timestamps cluster around the configured reference instant so the
//! time-window queries in the CLI and tests behave the same on any machine.

use chrono::{Duration, Utc};

use crate::config::EngineConfig;
use crate::error::CordonResult;
use crate::model::{AttrValue, Attrs, ClearanceLevel, User};
use crate::pipeline::QueryEngine;
use crate::repo::{EdgeSpec, GraphRepository, InMemoryAudit, InMemoryGraph, InMemoryUsers, NodeSpec};

/// A fully seeded in-memory engine.
pub type DemoEngine = QueryEngine<InMemoryGraph, InMemoryUsers, InMemoryAudit>;

/// Build and seed the demo engine.
pub fn demo_engine(config: EngineConfig) -> CordonResult<DemoEngine> {
    let graph = InMemoryGraph::new();
    seed_graph(&graph, &config)?;
    let users = InMemoryUsers::new(config.clone());
    seed_users(&users, &config);
    Ok(QueryEngine::new(graph, users, InMemoryAudit::new(), config))
}

/// Seed the standard users: a sector-A analyst, a sector-B observer, and a
/// sector-blind commander.
pub fn seed_users(users: &InMemoryUsers, config: &EngineConfig) {
    let reset_at = Utc::now() + Duration::seconds(config.budget_reset_secs);
    let mut seed = |id: &str, clearance: ClearanceLevel, attrs: Attrs| {
        users.upsert(User {
            id: id.into(),
            username: id.into(),
            clearance,
            query_budget: config.budget_max(clearance),
            budget_reset_at: reset_at,
            attrs,
        });
    };

    seed(
        "analyst-a",
        ClearanceLevel::Confidential,
        attrs(&[("sector", AttrValue::Str("A".into()))]),
    );
    seed(
        "observer-b",
        ClearanceLevel::Unclassified,
        attrs(&[("sector", AttrValue::Str("B".into()))]),
    );
    // The commander's own sector must not matter: role wins.
    seed(
        "cmdr",
        ClearanceLevel::Secret,
        attrs(&[
            ("sector", AttrValue::Str("C".into())),
            ("role", AttrValue::Str("commander".into())),
        ]),
    );
}

/// Seed the demo graph: targets, sensors, events, and a command post across
/// three classification levels, with same-level edges.
pub fn seed_graph(graph: &impl GraphRepository, config: &EngineConfig) -> CordonResult<()> {
    let reference = config.reference_instant;
    let seen = |minutes_ago: i64| {
        AttrValue::Str(
            (reference - Duration::minutes(minutes_ago))
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        )
    };

    let node = |logical: &str,
                level: ClearanceLevel,
                entity: &str,
                name: &str,
                bag: Attrs|
     -> NodeSpec {
        NodeSpec {
            logical_id: logical.into(),
            classification: level,
            entity_type: entity.into(),
            name: name.into(),
            attrs: bag,
            at: reference - Duration::hours(6),
        }
    };

    // uav-201 is recorded at two levels: the CONFIDENTIAL record carries
    // the richer picture (threat assessment, tighter track).
    graph.create_node(node(
        "uav-201",
        ClearanceLevel::Unclassified,
        "Target",
        "UAV 201",
        attrs(&[
            ("sector", AttrValue::Str("A".into())),
            ("category", AttrValue::Str("uav".into())),
            ("speed", AttrValue::Num(80.0)),
            ("lat", AttrValue::Num(55.752)),
            ("lon", AttrValue::Num(37.615)),
            ("last_seen", seen(30)),
        ]),
    ))?;
    graph.create_node(node(
        "uav-201",
        ClearanceLevel::Confidential,
        "Target",
        "UAV 201",
        attrs(&[
            ("sector", AttrValue::Str("A".into())),
            ("category", AttrValue::Str("uav".into())),
            ("speed", AttrValue::Num(82.0)),
            ("threat_level", AttrValue::Str("medium".into())),
            ("lat", AttrValue::Num(55.7521)),
            ("lon", AttrValue::Num(37.6149)),
            ("last_seen", seen(12)),
        ]),
    ))?;
    graph.create_node(node(
        "uav-202",
        ClearanceLevel::Confidential,
        "Target",
        "UAV 202",
        attrs(&[
            ("sector", AttrValue::Str("A".into())),
            ("category", AttrValue::Str("uav".into())),
            ("speed", AttrValue::Num(130.0)),
            ("threat_level", AttrValue::Str("high".into())),
            ("lat", AttrValue::Num(55.81)),
            ("lon", AttrValue::Num(37.52)),
            ("last_seen", seen(8)),
        ]),
    ))?;
    graph.create_node(node(
        "heli-301",
        ClearanceLevel::Unclassified,
        "Target",
        "Helicopter 301",
        attrs(&[
            ("sector", AttrValue::Str("B".into())),
            ("category", AttrValue::Str("helicopter".into())),
            ("speed", AttrValue::Num(210.0)),
            ("last_seen", seen(95)),
        ]),
    ))?;

    graph.create_node(node(
        "sensor-101",
        ClearanceLevel::Unclassified,
        "Sensor",
        "Sensor 101",
        attrs(&[
            ("sector", AttrValue::Str("A".into())),
            ("status", AttrValue::Str("online".into())),
            ("rssi", AttrValue::Num(-62.0)),
            ("lat", AttrValue::Num(55.74)),
            ("lon", AttrValue::Num(37.63)),
        ]),
    ))?;
    graph.create_node(node(
        "sensor-102",
        ClearanceLevel::Confidential,
        "Sensor",
        "Sensor 102",
        attrs(&[
            ("sector", AttrValue::Str("A".into())),
            ("status", AttrValue::Str("offline".into())),
            ("rssi", AttrValue::Num(-88.0)),
        ]),
    ))?;
    graph.create_node(node(
        "sensor-103",
        ClearanceLevel::Secret,
        "Sensor",
        "Sensor 103",
        attrs(&[
            ("sector", AttrValue::Str("A".into())),
            ("status", AttrValue::Str("offline".into())),
        ]),
    ))?;

    graph.create_node(node(
        "event-401",
        ClearanceLevel::Confidential,
        "Event",
        "Perimeter detection",
        attrs(&[
            ("sector", AttrValue::Str("A".into())),
            ("category", AttrValue::Str("unknown".into())),
            ("event_time", seen(60)),
        ]),
    ))?;
    graph.create_node(node(
        "event-402",
        ClearanceLevel::Confidential,
        "Event",
        "Track correlation",
        attrs(&[
            ("sector", AttrValue::Str("A".into())),
            ("category", AttrValue::Str("uav".into())),
            ("event_time", seen(25)),
        ]),
    ))?;

    graph.create_node(node(
        "cp-501",
        ClearanceLevel::Secret,
        "CommandPost",
        "Command Post 501",
        attrs(&[("sector", AttrValue::Str("A".into()))]),
    ))?;

    // Same-level edges. The "trk-201" relation exists at two levels so the
    // virtual view has something to merge.
    let edge = |logical: &str,
                level: ClearanceLevel,
                source: &str,
                target: &str,
                relation: &str|
     -> EdgeSpec {
        EdgeSpec {
            logical_id: logical.into(),
            classification: level,
            source_node_id: source.into(),
            target_node_id: target.into(),
            relation_type: relation.into(),
            attrs: Attrs::new(),
        }
    };
    graph.create_edge(edge(
        "trk-201",
        ClearanceLevel::Unclassified,
        "sensor-101_U",
        "uav-201_U",
        "tracks",
    ))?;
    graph.create_edge(edge(
        "trk-201",
        ClearanceLevel::Confidential,
        "sensor-102_C",
        "uav-201_C",
        "tracks",
    ))?;
    graph.create_edge(edge(
        "trk-202",
        ClearanceLevel::Confidential,
        "sensor-102_C",
        "uav-202_C",
        "tracks",
    ))?;
    graph.create_edge(edge(
        "rep-103",
        ClearanceLevel::Secret,
        "sensor-103_S",
        "cp-501_S",
        "reports-to",
    ))?;

    Ok(())
}

fn attrs(pairs: &[(&str, AttrValue)]) -> Attrs {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_dataset_seeds_cleanly() {
        let engine = demo_engine(EngineConfig::default()).expect("seed");
        let nodes = engine.graph().all_nodes().expect("nodes");
        let edges = engine.graph().all_edges().expect("edges");
        assert_eq!(nodes.len(), 10);
        assert_eq!(edges.len(), 4);
        // Every edge joins same-level endpoints by construction.
        for e in &edges {
            let level_of = |id: &str| {
                nodes
                    .iter()
                    .find(|n| n.id == id)
                    .map(|n| n.classification)
                    .expect("endpoint exists")
            };
            assert_eq!(level_of(&e.source_node_id), e.classification);
            assert_eq!(level_of(&e.target_node_id), e.classification);
        }
    }
}
