//! Access policy evaluator: MLS clearance dominance, ABAC sector rules,
//! k-anonymity, and budget sufficiency.
//!
//! Every function here is pure. Denials are decided locally and never
//! default-allow: a record is visible only when *both* the mandatory check
//! (clearance rank dominates classification rank) and the attribute check
//! (sector compatibility) pass.

use crate::model::{ClearanceLevel, GraphEdge, GraphNode, User};

/// True iff the user's clearance dominates the data's classification.
pub fn clearance_sufficient(user_level: ClearanceLevel, data_level: ClearanceLevel) -> bool {
    user_level.rank() >= data_level.rank()
}

/// Sector compatibility between a user and a data item.
///
/// Rules, in order:
/// - a `commander` role is sector-blind: always allowed;
/// - a user with no sector assignment sees no sectored data;
/// - sector-agnostic data (no sector attribute) is visible to everyone
///   meeting clearance;
/// - otherwise exact sector-code match (no hierarchical containment).
pub fn sector_allowed(user: &User, data_sector: Option<&str>) -> bool {
    if user.is_commander() {
        return true;
    }
    let user_sectors = user.sectors();
    match data_sector {
        None => true,
        Some(_) if user_sectors.is_empty() => false,
        Some(sector) => {
            let sector = sector.trim().to_uppercase();
            user_sectors.iter().any(|s| *s == sector)
        }
    }
}

/// Keep nodes the user may see: clearance AND sector. Order-preserving.
pub fn filter_accessible_nodes(user: &User, nodes: Vec<GraphNode>) -> Vec<GraphNode> {
    nodes
        .into_iter()
        .filter(|n| {
            clearance_sufficient(user.clearance, n.classification)
                && sector_allowed(user, n.sector().as_deref())
        })
        .collect()
}

/// Keep edges the user may see: clearance AND sector. Order-preserving.
pub fn filter_accessible_edges(user: &User, edges: Vec<GraphEdge>) -> Vec<GraphEdge> {
    edges
        .into_iter()
        .filter(|e| {
            clearance_sufficient(user.clearance, e.classification)
                && sector_allowed(user, e.sector().as_deref())
        })
        .collect()
}

/// The sole disclosure gate against singling out a lone matching entity.
pub fn k_anonymity_sufficient(result_count: usize, min_k: usize) -> bool {
    result_count >= min_k
}

/// True iff the user has budget left. The caller must have applied the lazy
/// reset check first (a repository read side effect).
pub fn budget_sufficient(user: &User) -> bool {
    user.query_budget > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrValue, Attrs};
    use chrono::Utc;

    fn user(level: ClearanceLevel, sector: Option<&str>, role: Option<&str>) -> User {
        let mut attrs = Attrs::new();
        if let Some(s) = sector {
            attrs.insert("sector".into(), AttrValue::Str(s.into()));
        }
        if let Some(r) = role {
            attrs.insert("role".into(), AttrValue::Str(r.into()));
        }
        User {
            id: "u1".into(),
            username: "test".into(),
            clearance: level,
            attrs,
            query_budget: 5,
            budget_reset_at: Utc::now(),
        }
    }

    fn node(level: ClearanceLevel, sector: Option<&str>) -> GraphNode {
        let mut attrs = Attrs::new();
        if let Some(s) = sector {
            attrs.insert("sector".into(), AttrValue::Str(s.into()));
        }
        GraphNode::new("n1", level, "Target", "N-1", attrs, Utc::now())
    }

    #[test]
    fn clearance_dominance() {
        use ClearanceLevel::*;
        assert!(clearance_sufficient(Secret, Unclassified));
        assert!(clearance_sufficient(Secret, Secret));
        assert!(clearance_sufficient(Confidential, Confidential));
        assert!(!clearance_sufficient(Confidential, Secret));
        assert!(!clearance_sufficient(Unclassified, Confidential));
    }

    #[test]
    fn commander_is_sector_blind() {
        // Even with a declared sector of their own.
        let cmdr = user(ClearanceLevel::Secret, Some("B"), Some("commander"));
        assert!(sector_allowed(&cmdr, Some("A")));
        assert!(sector_allowed(&cmdr, None));
    }

    #[test]
    fn sectorless_user_sees_only_sectorless_data() {
        let u = user(ClearanceLevel::Secret, None, None);
        assert!(sector_allowed(&u, None));
        assert!(!sector_allowed(&u, Some("A")));
    }

    #[test]
    fn sector_exact_match_only() {
        let u = user(ClearanceLevel::Confidential, Some("a"), None);
        assert!(sector_allowed(&u, Some("A")));
        assert!(sector_allowed(&u, Some(" a ")));
        assert!(!sector_allowed(&u, Some("AB")));
        assert!(!sector_allowed(&u, Some("B")));
    }

    #[test]
    fn sectors_list_matches_any_member() {
        let mut attrs = Attrs::new();
        attrs.insert(
            "sectors".into(),
            AttrValue::List(vec!["a".into(), "c".into()]),
        );
        let u = User {
            attrs,
            ..user(ClearanceLevel::Secret, None, None)
        };
        assert!(sector_allowed(&u, Some("C")));
        assert!(!sector_allowed(&u, Some("B")));
    }

    #[test]
    fn node_filter_requires_both_checks() {
        let u = user(ClearanceLevel::Confidential, Some("A"), None);
        let nodes = vec![
            node(ClearanceLevel::Unclassified, Some("A")), // visible
            node(ClearanceLevel::Secret, Some("A")),       // clearance fails
            node(ClearanceLevel::Confidential, Some("B")), // sector fails
            node(ClearanceLevel::Confidential, None),      // sector-agnostic, visible
        ];
        let kept = filter_accessible_nodes(&u, nodes);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].classification, ClearanceLevel::Unclassified);
        assert_eq!(kept[1].sector(), None);
    }

    #[test]
    fn k_anonymity_boundary_is_inclusive() {
        assert!(!k_anonymity_sufficient(0, 2));
        assert!(!k_anonymity_sufficient(1, 2));
        assert!(k_anonymity_sufficient(2, 2));
        assert!(k_anonymity_sufficient(3, 2));
    }

    #[test]
    fn budget_check() {
        let mut u = user(ClearanceLevel::Unclassified, None, None);
        assert!(budget_sufficient(&u));
        u.query_budget = 0;
        assert!(!budget_sufficient(&u));
    }
}
