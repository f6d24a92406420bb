//! Query execution pipeline: budget → parse → fetch → filter → k-anonymity
//! gate → audit → result.
//!
//! Terminal states are Success (full records, or an aggregate when the
//! k-anonymity gate fails, or an empty set), Denied (budget), and
//! Unrecognized (parser extracted nothing actionable). Every path that
//! touched data writes exactly one audit entry; unrecognized queries touch
//! no data and write none.
//!
//! Filtering is a fixed sequence of cumulative intersections. The parsed
//! OR flag never loosens anything: it only shapes the explanation text.
//! That asymmetry is inherited behavior, kept deliberately (see DESIGN.md).

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{CordonResult, RepoError};
use crate::model::{AuditEntry, DenialReason, GraphNode};
use crate::parser::{self, Explanation, ParsedQuery};
use crate::policy;
use crate::repo::{AuditSink, BudgetReservation, GraphRepository, UserRepository};

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Terminal outcome of one query execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Request refused before any data access.
    Denied { reason: DenialReason },
    /// Nothing actionable was extracted from the text.
    Unrecognized,
    /// Full records. An empty list is still a success.
    Records { nodes: Vec<GraphNode> },
    /// K-anonymity suppression: only the aggregate is disclosed.
    Aggregate { count: usize, message: String },
}

/// Outcome plus the descriptive explanation, returned on every path.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    #[serde(flatten)]
    pub outcome: QueryOutcome,
    pub explanation: Explanation,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The query engine: orchestrates parser, policy, repositories, and audit.
///
/// Request-scoped and side-effect-light: each execution reads a full graph
/// snapshot, computes purely, and performs at most one budget decrement and
/// one audit append.
pub struct QueryEngine<G, U, A> {
    graph: G,
    users: U,
    audit: A,
    config: EngineConfig,
}

impl<G, U, A> QueryEngine<G, U, A>
where
    G: GraphRepository,
    U: UserRepository,
    A: AuditSink,
{
    pub fn new(graph: G, users: U, audit: A, config: EngineConfig) -> Self {
        Self {
            graph,
            users,
            audit,
            config,
        }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn users(&self) -> &U {
        &self.users
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute one query on behalf of a user.
    pub fn execute(&self, user_id: &str, text: &str) -> CordonResult<QueryResponse> {
        let now = Utc::now();

        // 1. Reset-then-check budget. A denial here consumes nothing.
        let user = self
            .users
            .find_by_id(user_id, now)?
            .ok_or_else(|| RepoError::UserNotFound { id: user_id.into() })?;
        if !policy::budget_sufficient(&user) {
            tracing::info!(user = %user.id, "query denied: budget exhausted");
            self.write_audit(AuditEntry {
                user_id: user.id.clone(),
                query_text: text.into(),
                query_kind: "unparsed".into(),
                result_count: 0,
                granted: false,
                denial_reason: Some(DenialReason::BudgetExhausted),
                created_at: now,
            });
            let explanation = Explanation {
                intent: "denied".into(),
                warnings: vec!["query budget exhausted; it replenishes hourly".into()],
                ..Default::default()
            };
            return Ok(QueryResponse {
                outcome: QueryOutcome::Denied {
                    reason: DenialReason::BudgetExhausted,
                },
                explanation,
            });
        }

        // 2. Parse. Unrecognized queries touch no data: no audit, no debit.
        let Some(query) = parser::parse(text, &self.config) else {
            return Ok(QueryResponse {
                outcome: QueryOutcome::Unrecognized,
                explanation: Explanation::unrecognized(parser::guidance_tips()),
            });
        };

        // 3. Fetch, restrict to entity type.
        let mut nodes = self.graph.all_nodes()?;
        if let Some(entity) = &query.entity_type {
            nodes.retain(|n| n.entity_type.eq_ignore_ascii_case(entity));
        }

        // 4. Mandatory + attribute access filter. Runs before any query
        // filter, so an out-of-clearance record can never influence results.
        let nodes = policy::filter_accessible_nodes(&user, nodes);

        // 5. Query filters, fixed order, cumulative intersection.
        let mut nodes = apply_filters(&query, &self.config, nodes);

        // 6. Limit keeps the most recently observed items.
        if let Some(limit) = query.limit {
            if nodes.len() > limit {
                nodes.sort_by(|a, b| b.best_timestamp().cmp(&a.best_timestamp()));
                nodes.truncate(limit);
            }
        }

        // 7. One unit of budget per processed query, regardless of outcome.
        //    The check and the decrement share one entry lock; a concurrent
        //    query that takes the last unit turns this one into a denial.
        let mut explanation = Explanation::from_parsed(&query);
        if let BudgetReservation::Empty(_) = self.users.try_debit(&user.id, now)? {
            tracing::info!(user = %user.id, "query denied: budget exhausted");
            self.write_audit(AuditEntry {
                user_id: user.id.clone(),
                query_text: text.into(),
                query_kind: query.intent.as_str().into(),
                result_count: 0,
                granted: false,
                denial_reason: Some(DenialReason::BudgetExhausted),
                created_at: now,
            });
            explanation
                .warnings
                .push("query budget exhausted; it replenishes hourly".into());
            return Ok(QueryResponse {
                outcome: QueryOutcome::Denied {
                    reason: DenialReason::BudgetExhausted,
                },
                explanation,
            });
        }

        let count = nodes.len();

        // 8-10. Disclosure decision + audit.
        if count == 0 {
            self.write_audit(self.entry(&user.id, text, &query, 0, None, now));
            return Ok(QueryResponse {
                outcome: QueryOutcome::Records { nodes },
                explanation,
            });
        }
        if !policy::k_anonymity_sufficient(count, self.config.min_k) {
            tracing::info!(
                user = %user.id,
                count,
                min_k = self.config.min_k,
                "k-anonymity gate failed; suppressing individual records"
            );
            self.write_audit(self.entry(
                &user.id,
                text,
                &query,
                count,
                Some(DenialReason::KAnonymity),
                now,
            ));
            return Ok(QueryResponse {
                outcome: QueryOutcome::Aggregate {
                    count,
                    message: format!(
                        "{count} matching record(s); individual records are withheld \
                         below the k={} disclosure threshold",
                        self.config.min_k
                    ),
                },
                explanation,
            });
        }
        self.write_audit(self.entry(&user.id, text, &query, count, None, now));
        Ok(QueryResponse {
            outcome: QueryOutcome::Records { nodes },
            explanation,
        })
    }

    fn entry(
        &self,
        user_id: &str,
        text: &str,
        query: &ParsedQuery,
        result_count: usize,
        denial_reason: Option<DenialReason>,
        now: chrono::DateTime<Utc>,
    ) -> AuditEntry {
        AuditEntry {
            user_id: user_id.into(),
            query_text: text.into(),
            query_kind: query.intent.as_str().into(),
            result_count,
            granted: true,
            denial_reason,
            created_at: now,
        }
    }

    /// Audit append failure must not block the response.
    fn write_audit(&self, entry: AuditEntry) {
        if let Err(error) = self.audit.append(entry) {
            tracing::warn!(%error, "audit append failed; response not blocked");
        }
    }
}

// ---------------------------------------------------------------------------
// Filter sequence
// ---------------------------------------------------------------------------

/// Apply the parsed filters in their fixed declared order. Each filter is a
/// cumulative intersection over the candidate set.
fn apply_filters(
    query: &ParsedQuery,
    config: &EngineConfig,
    mut nodes: Vec<GraphNode>,
) -> Vec<GraphNode> {
    if !query.sectors.is_empty() {
        nodes.retain(|n| n.sector().is_some_and(|s| query.sectors.contains(&s)));
    }
    if let Some(level) = query.level {
        nodes.retain(|n| n.classification == level);
    }
    if let Some(hours) = query.window_hours {
        let reference = config.reference_instant;
        let start = reference - Duration::seconds((hours * 3600.0) as i64);
        nodes.retain(|n| {
            let ts = n.best_timestamp();
            ts >= start && ts <= reference
        });
    }
    if let Some((start, end)) = query.time_range {
        nodes.retain(|n| {
            let ts = n.best_timestamp();
            ts >= start && ts <= end
        });
    }
    if !query.statuses.is_empty() {
        nodes.retain(|n| n.status().is_some_and(|s| query.statuses.contains(&s)));
    }
    if !query.categories.is_empty() {
        nodes.retain(|n| {
            n.category()
                .map(|c| parser::normalize_category(&c))
                .is_some_and(|c| query.categories.contains(&c))
        });
    }
    if let Some(geo) = &query.geo {
        nodes.retain(|n| {
            n.coords()
                .is_some_and(|(lat, lon)| haversine_km(lat, lon, geo.lat, geo.lon) <= geo.radius_km)
        });
    }
    if !query.comparisons.is_empty() {
        nodes.retain(|n| query.comparisons.iter().all(|c| c.holds(&n.attrs)));
    }
    nodes
}

/// Great-circle distance in kilometres.
fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrValue, Attrs, ClearanceLevel, User};
    use crate::repo::{InMemoryAudit, InMemoryGraph, InMemoryUsers, NodeSpec};

    type TestEngine = QueryEngine<InMemoryGraph, InMemoryUsers, InMemoryAudit>;

    fn engine() -> TestEngine {
        let config = EngineConfig::default();
        let graph = InMemoryGraph::new();
        let users = InMemoryUsers::new(config.clone());
        QueryEngine::new(graph, users, InMemoryAudit::new(), config)
    }

    fn seed_user(
        engine: &TestEngine,
        id: &str,
        level: ClearanceLevel,
        sector: Option<&str>,
        budget: u32,
    ) {
        let mut attrs = Attrs::new();
        if let Some(s) = sector {
            attrs.insert("sector".into(), AttrValue::Str(s.into()));
        }
        engine.users().upsert(User {
            id: id.into(),
            username: id.into(),
            clearance: level,
            attrs,
            query_budget: budget,
            budget_reset_at: Utc::now() + Duration::hours(1),
        });
    }

    fn seed_node(
        engine: &TestEngine,
        logical: &str,
        level: ClearanceLevel,
        entity: &str,
        attrs: &[(&str, AttrValue)],
    ) {
        let mut bag = Attrs::new();
        for (k, v) in attrs {
            bag.insert((*k).to_string(), v.clone());
        }
        engine
            .graph()
            .create_node(NodeSpec {
                logical_id: logical.into(),
                classification: level,
                entity_type: entity.into(),
                name: logical.to_uppercase(),
                attrs: bag,
                at: engine.config().reference_instant,
            })
            .expect("seed node");
    }

    #[test]
    fn k_anonymity_satisfied_returns_both_records() {
        let e = engine();
        seed_user(&e, "analyst", ClearanceLevel::Confidential, Some("A"), 5);
        for logical in ["uav-1", "uav-2"] {
            seed_node(
                &e,
                logical,
                ClearanceLevel::Confidential,
                "Target",
                &[
                    ("sector", AttrValue::Str("A".into())),
                    ("category", AttrValue::Str("uav".into())),
                ],
            );
        }

        let resp = e
            .execute("analyst", "Сколько беспилотников в секторе A")
            .expect("execute");
        match resp.outcome {
            QueryOutcome::Records { nodes } => assert_eq!(nodes.len(), 2),
            other => panic!("expected records, got {other:?}"),
        }
        let audit = e.audit().entries().expect("audit");
        assert_eq!(audit.len(), 1);
        assert!(audit[0].granted);
        assert_eq!(audit[0].result_count, 2);
        assert_eq!(audit[0].denial_reason, None);
        assert_eq!(audit[0].query_kind, "count");
    }

    #[test]
    fn single_match_is_suppressed_with_true_count_audited() {
        let e = engine();
        seed_user(&e, "analyst", ClearanceLevel::Confidential, Some("A"), 5);
        seed_node(
            &e,
            "uav-1",
            ClearanceLevel::Confidential,
            "Target",
            &[
                ("sector", AttrValue::Str("A".into())),
                ("category", AttrValue::Str("uav".into())),
            ],
        );

        let resp = e
            .execute("analyst", "Сколько беспилотников в секторе A")
            .expect("execute");
        match resp.outcome {
            QueryOutcome::Aggregate { count, message } => {
                assert_eq!(count, 1);
                assert!(message.contains("k=2"));
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
        let audit = e.audit().entries().expect("audit");
        assert!(audit[0].granted);
        assert_eq!(audit[0].result_count, 1);
        assert_eq!(audit[0].denial_reason, Some(DenialReason::KAnonymity));
    }

    #[test]
    fn clearance_filter_runs_before_status_filter() {
        let e = engine();
        seed_user(&e, "analyst", ClearanceLevel::Confidential, Some("A"), 5);
        // A SECRET offline sensor matches the status but not the clearance.
        seed_node(
            &e,
            "s-1",
            ClearanceLevel::Secret,
            "Sensor",
            &[
                ("sector", AttrValue::Str("A".into())),
                ("status", AttrValue::Str("offline".into())),
            ],
        );

        let resp = e.execute("analyst", "сенсоры offline").expect("execute");
        match resp.outcome {
            QueryOutcome::Records { nodes } => assert!(nodes.is_empty()),
            other => panic!("expected empty records, got {other:?}"),
        }
        // Empty success still audits granted=true with count 0.
        let audit = e.audit().entries().expect("audit");
        assert_eq!(audit[0].result_count, 0);
        assert!(audit[0].granted);
        assert_eq!(audit[0].denial_reason, None);
    }

    #[test]
    fn budget_denial_audits_without_consuming() {
        let e = engine();
        seed_user(&e, "analyst", ClearanceLevel::Confidential, Some("A"), 0);

        let resp = e.execute("analyst", "дроны").expect("execute");
        assert!(matches!(
            resp.outcome,
            QueryOutcome::Denied {
                reason: DenialReason::BudgetExhausted
            }
        ));
        let audit = e.audit().entries().expect("audit");
        assert_eq!(audit.len(), 1);
        assert!(!audit[0].granted);
        assert_eq!(
            audit[0].denial_reason,
            Some(DenialReason::BudgetExhausted)
        );
        assert_eq!(audit[0].query_kind, "unparsed");
    }

    #[test]
    fn exactly_budget_many_queries_succeed() {
        let e = engine();
        seed_user(&e, "analyst", ClearanceLevel::Confidential, Some("A"), 3);
        for _ in 0..3 {
            let resp = e.execute("analyst", "дроны в секторе A").expect("execute");
            assert!(!matches!(resp.outcome, QueryOutcome::Denied { .. }));
        }
        let resp = e.execute("analyst", "дроны в секторе A").expect("execute");
        assert!(matches!(resp.outcome, QueryOutcome::Denied { .. }));
    }

    #[test]
    fn unrecognized_writes_no_audit_and_keeps_budget() {
        let e = engine();
        seed_user(&e, "analyst", ClearanceLevel::Confidential, Some("A"), 2);

        let resp = e.execute("analyst", "сделай что-нибудь").expect("execute");
        assert!(matches!(resp.outcome, QueryOutcome::Unrecognized));
        assert!(!resp.explanation.tips.is_empty());
        assert!(e.audit().entries().expect("audit").is_empty());

        let user = e
            .users()
            .find_by_id("analyst", Utc::now())
            .expect("find")
            .expect("present");
        assert_eq!(user.query_budget, 2);
    }

    #[test]
    fn limit_selects_most_recently_observed() {
        let e = engine();
        seed_user(&e, "cmdr", ClearanceLevel::Secret, None, 20);
        let reference = e.config().reference_instant;
        for (logical, minutes_ago) in [("t-old", 50i64), ("t-mid", 20), ("t-new", 5)] {
            let seen = reference - Duration::minutes(minutes_ago);
            seed_node(
                &e,
                logical,
                ClearanceLevel::Unclassified,
                "Target",
                &[
                    ("category", AttrValue::Str("uav".into())),
                    (
                        "last_seen",
                        AttrValue::Str(seen.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
                    ),
                ],
            );
        }
        // Sectorless nodes are visible to a sectorless user.
        let resp = e.execute("cmdr", "first 2 drones").expect("execute");
        match resp.outcome {
            QueryOutcome::Records { nodes } => {
                let ids: Vec<&str> = nodes.iter().map(|n| n.logical_id.as_str()).collect();
                assert_eq!(ids, vec!["t-new", "t-mid"]);
            }
            other => panic!("expected records, got {other:?}"),
        }
    }

    #[test]
    fn comparison_and_geo_filters_intersect() {
        let e = engine();
        seed_user(&e, "cmdr", ClearanceLevel::Secret, None, 20);
        seed_node(
            &e,
            "fast-near",
            ClearanceLevel::Unclassified,
            "Target",
            &[
                ("category", AttrValue::Str("uav".into())),
                ("speed", AttrValue::Num(140.0)),
                ("lat", AttrValue::Num(55.76)),
                ("lon", AttrValue::Num(37.62)),
            ],
        );
        seed_node(
            &e,
            "fast-far",
            ClearanceLevel::Unclassified,
            "Target",
            &[
                ("category", AttrValue::Str("uav".into())),
                ("speed", AttrValue::Num(150.0)),
                ("lat", AttrValue::Num(59.93)),
                ("lon", AttrValue::Num(30.31)),
            ],
        );
        seed_node(
            &e,
            "slow-near",
            ClearanceLevel::Unclassified,
            "Target",
            &[
                ("category", AttrValue::Str("uav".into())),
                ("speed", AttrValue::Num(40.0)),
                ("lat", AttrValue::Num(55.74)),
                ("lon", AttrValue::Num(37.60)),
            ],
        );

        // min_k=2 would suppress the single survivor; use a wider radius
        // query to check the intersection itself.
        let resp = e
            .execute("cmdr", "дроны скорость > 100 рядом с 55.75, 37.61 радиус 20 км")
            .expect("execute");
        match resp.outcome {
            QueryOutcome::Aggregate { count, .. } => assert_eq!(count, 1),
            other => panic!("expected aggregate of 1, got {other:?}"),
        }
    }

    #[test]
    fn haversine_sanity() {
        // Moscow to St. Petersburg is roughly 635 km.
        let d = haversine_km(55.7558, 37.6173, 59.9311, 30.3609);
        assert!((600.0..680.0).contains(&d), "d = {d}");
        assert!(haversine_km(10.0, 20.0, 10.0, 20.0) < 1e-9);
    }
}
