//! Core data model: classification levels, attribute bags, users, graph
//! nodes and edges, audit entries.
//!
//! Nodes are *classified facts*: the same real-world entity may be recorded
//! several times at different classification levels, all instances sharing a
//! `logical_id`. The composite `id` is derived deterministically from
//! `(logical_id, classification)` so duplicates are structurally impossible.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Classification levels
// ---------------------------------------------------------------------------

/// Ordered classification / clearance level.
///
/// The derive order gives `Unclassified < Confidential < Secret`, which is
/// exactly the MLS dominance order used by the policy evaluator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClearanceLevel {
    #[default]
    Unclassified,
    Confidential,
    Secret,
}

impl ClearanceLevel {
    /// Ordinal rank: UNCLASSIFIED=0, CONFIDENTIAL=1, SECRET=2.
    pub fn rank(self) -> u8 {
        match self {
            Self::Unclassified => 0,
            Self::Confidential => 1,
            Self::Secret => 2,
        }
    }

    /// Single-letter code used in composite ids ("U", "C", "S").
    pub fn code(self) -> &'static str {
        match self {
            Self::Unclassified => "U",
            Self::Confidential => "C",
            Self::Secret => "S",
        }
    }

    /// Canonical wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unclassified => "UNCLASSIFIED",
            Self::Confidential => "CONFIDENTIAL",
            Self::Secret => "SECRET",
        }
    }

    /// Parse a level string leniently. Unknown strings rank lowest, so a
    /// malformed level on a record can never widen access.
    pub fn parse_loose(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "SECRET" | "S" => Self::Secret,
            "CONFIDENTIAL" | "C" => Self::Confidential,
            _ => Self::Unclassified,
        }
    }

    /// All levels in ascending rank order.
    pub fn all() -> [Self; 3] {
        [Self::Unclassified, Self::Confidential, Self::Secret]
    }
}

impl fmt::Display for ClearanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Attribute bags
// ---------------------------------------------------------------------------

/// A single attribute value in an open per-entity key/value bag.
///
/// Records arrive with mixed representations (numbers as strings, comma
/// decimal separators, coordinates as either two numeric keys or one
/// parsable string), so accessors are tolerant rather than strict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Num(f64),
    Str(String),
    List(Vec<String>),
}

impl AttrValue {
    /// Numeric view: native numbers, or strings that parse as numbers
    /// (comma accepted as decimal separator).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(s) => s.trim().replace(',', ".").parse().ok(),
            Self::List(_) => None,
        }
    }

    /// String view. Numbers render with their shortest display form.
    pub fn as_str(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Num(n) => Some(n.to_string()),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

/// Ordered string-keyed attribute bag.
pub type Attrs = BTreeMap<String, AttrValue>;

/// Case-tolerant string attribute lookup.
pub fn attr_str(attrs: &Attrs, key: &str) -> Option<String> {
    attrs.get(key).and_then(AttrValue::as_str)
}

/// Numeric attribute lookup tolerating string-encoded numbers.
pub fn attr_f64(attrs: &Attrs, key: &str) -> Option<f64> {
    attrs.get(key).and_then(AttrValue::as_f64)
}

/// Extract a (lat, lon) pair from an attribute bag.
///
/// Accepts either two numeric keys (`lat`/`lon`, with `latitude`/`longitude`
/// fallbacks) or a single `coordinates` string of the form "lat,lon". The
/// comma is the pair separator, so the components must use dot decimals.
pub fn attr_coords(attrs: &Attrs) -> Option<(f64, f64)> {
    let lat = attr_f64(attrs, "lat").or_else(|| attr_f64(attrs, "latitude"));
    let lon = attr_f64(attrs, "lon").or_else(|| attr_f64(attrs, "longitude"));
    if let (Some(lat), Some(lon)) = (lat, lon) {
        return Some((lat, lon));
    }
    let raw = attr_str(attrs, "coordinates")?;
    let mut parts = raw.split(',').map(str::trim);
    let lat = parts.next()?.parse().ok()?;
    let lon = parts.next()?.parse().ok()?;
    // A third component means the string used comma decimals; reject it
    // rather than return a half-parsed pair.
    if parts.next().is_some() {
        return None;
    }
    Some((lat, lon))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A cleared user with an attribute bag and a rate-limiting query budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub clearance: ClearanceLevel,
    pub attrs: Attrs,
    /// Remaining queries in the current window. Never negative.
    pub query_budget: u32,
    /// When the budget replenishes to the clearance-dependent maximum.
    pub budget_reset_at: DateTime<Utc>,
}

impl User {
    /// Sector codes this user is assigned to, from either the single
    /// `sector` attribute or the `sectors` list. Uppercased.
    pub fn sectors(&self) -> Vec<String> {
        if let Some(list) = self.attrs.get("sectors").and_then(AttrValue::as_list) {
            return list.iter().map(|s| s.trim().to_uppercase()).collect();
        }
        attr_str(&self.attrs, "sector")
            .map(|s| vec![s.trim().to_uppercase()])
            .unwrap_or_default()
    }

    /// Role attribute, lowercased ("commander" is the sector-blind superuser).
    pub fn role(&self) -> Option<String> {
        attr_str(&self.attrs, "role").map(|r| r.trim().to_lowercase())
    }

    pub fn is_commander(&self) -> bool {
        self.role().as_deref() == Some("commander")
    }
}

// ---------------------------------------------------------------------------
// Graph nodes and edges
// ---------------------------------------------------------------------------

/// Deterministic composite node/edge id from (logical_id, level).
pub fn composite_id(logical_id: &str, level: ClearanceLevel) -> String {
    format!("{}_{}", logical_id, level.code())
}

/// A classified fact about one real-world entity at one classification level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Composite id, `{logical_id}_{level code}`.
    pub id: String,
    /// Stable identifier shared across classification-level duplicates.
    pub logical_id: String,
    pub classification: ClearanceLevel,
    /// Open taxonomy: Target, Sensor, Event, CommandPost, Sector, ...
    pub entity_type: String,
    pub name: String,
    pub attrs: Attrs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GraphNode {
    pub fn new(
        logical_id: impl Into<String>,
        classification: ClearanceLevel,
        entity_type: impl Into<String>,
        name: impl Into<String>,
        attrs: Attrs,
        at: DateTime<Utc>,
    ) -> Self {
        let logical_id = logical_id.into();
        Self {
            id: composite_id(&logical_id, classification),
            logical_id,
            classification,
            entity_type: entity_type.into(),
            name: name.into(),
            attrs,
            created_at: at,
            updated_at: at,
        }
    }

    /// Sector attribute, uppercased. `None` means sector-agnostic data.
    pub fn sector(&self) -> Option<String> {
        attr_str(&self.attrs, "sector").map(|s| s.trim().to_uppercase())
    }

    /// Status attribute, lowercased.
    pub fn status(&self) -> Option<String> {
        attr_str(&self.attrs, "status").map(|s| s.trim().to_lowercase())
    }

    /// Category attribute, lowercased.
    pub fn category(&self) -> Option<String> {
        attr_str(&self.attrs, "category").map(|s| s.trim().to_lowercase())
    }

    pub fn coords(&self) -> Option<(f64, f64)> {
        attr_coords(&self.attrs)
    }

    /// Best-available observation timestamp: the `last_seen` / `event_time`
    /// attribute when present and parsable, else `updated_at`, else
    /// `created_at`. Used for time-window filters and recency ordering.
    pub fn best_timestamp(&self) -> DateTime<Utc> {
        for key in ["last_seen", "event_time", "timestamp"] {
            if let Some(raw) = attr_str(&self.attrs, key) {
                if let Ok(ts) = DateTime::parse_from_rfc3339(raw.trim()) {
                    return ts.with_timezone(&Utc);
                }
            }
        }
        if self.updated_at > self.created_at {
            self.updated_at
        } else {
            self.created_at
        }
    }
}

/// A classified relation between two nodes recorded at the same level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Composite id, `{logical_id}_{level code}`.
    pub id: String,
    pub logical_id: String,
    pub classification: ClearanceLevel,
    pub source_node_id: String,
    pub target_node_id: String,
    pub relation_type: String,
    pub attrs: Attrs,
}

impl GraphEdge {
    pub fn new(
        logical_id: impl Into<String>,
        classification: ClearanceLevel,
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
        relation_type: impl Into<String>,
        attrs: Attrs,
    ) -> Self {
        let logical_id = logical_id.into();
        Self {
            id: composite_id(&logical_id, classification),
            logical_id,
            classification,
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            relation_type: relation_type.into(),
            attrs,
        }
    }

    /// Sector attribute, uppercased.
    pub fn sector(&self) -> Option<String> {
        attr_str(&self.attrs, "sector").map(|s| s.trim().to_uppercase())
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Fixed denial-reason codes recorded in audit entries and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    BudgetExhausted,
    KAnonymity,
}

impl DenialReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::BudgetExhausted => "BUDGET_EXHAUSTED",
            Self::KAnonymity => "K_ANONYMITY",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Append-only record of one query attempt. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub user_id: String,
    pub query_text: String,
    /// Query type tag: the parsed intent, or "unparsed" for pre-parse denials.
    pub query_kind: String,
    pub result_count: usize,
    pub granted: bool,
    pub denial_reason: Option<DenialReason>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_rank() {
        assert!(ClearanceLevel::Unclassified < ClearanceLevel::Confidential);
        assert!(ClearanceLevel::Confidential < ClearanceLevel::Secret);
        assert_eq!(ClearanceLevel::Secret.rank(), 2);
    }

    #[test]
    fn unknown_level_ranks_lowest() {
        assert_eq!(
            ClearanceLevel::parse_loose("TOP-BANANA"),
            ClearanceLevel::Unclassified
        );
        assert_eq!(ClearanceLevel::parse_loose("s"), ClearanceLevel::Secret);
        assert_eq!(
            ClearanceLevel::parse_loose(" confidential "),
            ClearanceLevel::Confidential
        );
    }

    #[test]
    fn composite_id_is_deterministic() {
        assert_eq!(composite_id("uav-7", ClearanceLevel::Secret), "uav-7_S");
        assert_eq!(
            composite_id("uav-7", ClearanceLevel::Unclassified),
            "uav-7_U"
        );
    }

    #[test]
    fn attr_numeric_tolerates_comma_decimal() {
        let v = AttrValue::Str("12,5".into());
        assert_eq!(v.as_f64(), Some(12.5));
        assert_eq!(AttrValue::Num(3.0).as_f64(), Some(3.0));
        assert_eq!(AttrValue::Str("fast".into()).as_f64(), None);
    }

    #[test]
    fn coords_from_pair_or_string() {
        let mut attrs = Attrs::new();
        attrs.insert("lat".into(), AttrValue::Num(55.75));
        attrs.insert("lon".into(), AttrValue::Num(37.61));
        assert_eq!(attr_coords(&attrs), Some((55.75, 37.61)));

        let mut attrs = Attrs::new();
        attrs.insert("coordinates".into(), AttrValue::Str("48.1, 11.5".into()));
        assert_eq!(attr_coords(&attrs), Some((48.1, 11.5)));

        assert_eq!(attr_coords(&Attrs::new()), None);
    }

    #[test]
    fn coordinate_strings_require_dot_decimals() {
        // The comma separates lat from lon, so comma-decimal components
        // must not half-parse into a bogus pair.
        let mut attrs = Attrs::new();
        attrs.insert("coordinates".into(), AttrValue::Str("48,1, 11,5".into()));
        assert_eq!(attr_coords(&attrs), None);
    }

    #[test]
    fn user_sectors_from_single_or_list() {
        let mut attrs = Attrs::new();
        attrs.insert("sector".into(), AttrValue::Str("a".into()));
        let user = User {
            id: "u1".into(),
            username: "analyst".into(),
            clearance: ClearanceLevel::Confidential,
            attrs,
            query_budget: 5,
            budget_reset_at: Utc::now(),
        };
        assert_eq!(user.sectors(), vec!["A".to_string()]);

        let mut attrs = Attrs::new();
        attrs.insert(
            "sectors".into(),
            AttrValue::List(vec!["a".into(), "b".into()]),
        );
        let user = User { attrs, ..user };
        assert_eq!(user.sectors(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn best_timestamp_prefers_observation_attr() {
        let created = Utc::now();
        let mut attrs = Attrs::new();
        attrs.insert(
            "last_seen".into(),
            AttrValue::Str("2024-06-15T11:45:00Z".into()),
        );
        let node = GraphNode::new(
            "t1",
            ClearanceLevel::Unclassified,
            "Target",
            "T-1",
            attrs,
            created,
        );
        assert_eq!(
            node.best_timestamp(),
            DateTime::parse_from_rfc3339("2024-06-15T11:45:00Z")
                .expect("static timestamp")
                .with_timezone(&Utc)
        );
    }
}
