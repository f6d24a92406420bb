//! Query language parser: free text in, structured filter set out.
//!
//! No language model anywhere: the parser is a cascade of deterministic
//! matcher stages (keyword tables and regexes) over the lowercased input,
//! with a mixed Russian/English vocabulary. Stages run in a fixed order and
//! are independent: each accumulates its fragment onto the [`ParsedQuery`]
//! and records what it recognized for the explanation. The recognized-token
//! list, tips, and warnings are diagnostics only; they never affect
//! filtering.
//!
//! A parse "fails" (returns `None`) only when no actionable filter at all
//! was extracted: no entity type, no categories, no statuses, no
//! comparisons. That is not an error; the caller surfaces static guidance
//! tips instead.

pub mod explain;
mod matchers;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::model::{Attrs, ClearanceLevel};

pub use explain::Explanation;
pub use matchers::normalize_category;

// ---------------------------------------------------------------------------
// Parsed fragments
// ---------------------------------------------------------------------------

/// What the user wants done with the matching set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    Count,
    #[default]
    List,
    Timeline,
}

impl QueryIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::List => "list",
            Self::Timeline => "timeline",
        }
    }
}

/// Comparison operator extracted from `<field> <op> <value>` phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ne => "!=",
        }
    }

    fn holds_f64(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => (lhs - rhs).abs() < 1e-9,
            Self::Ne => (lhs - rhs).abs() >= 1e-9,
        }
    }
}

/// Comparison value: numeric when it parses as a number, else a lowercased
/// string (ordering operators are meaningless for strings and never hold).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CmpValue {
    Num(f64),
    Text(String),
}

/// One attribute comparison. The field name is already canonical: the
/// matcher maps surface aliases through its table and discards unknowns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub field: String,
    pub op: CmpOp,
    pub value: CmpValue,
}

impl Comparison {
    /// Does the comparison hold for this attribute bag? A missing attribute
    /// never satisfies a comparison.
    pub fn holds(&self, attrs: &Attrs) -> bool {
        let Some(attr) = attrs.get(&self.field) else {
            return false;
        };
        match &self.value {
            CmpValue::Num(rhs) => attr.as_f64().is_some_and(|lhs| self.op.holds_f64(lhs, *rhs)),
            CmpValue::Text(rhs) => {
                let Some(lhs) = attr.as_str() else {
                    return false;
                };
                let lhs = lhs.trim().to_lowercase();
                match self.op {
                    CmpOp::Eq => lhs == *rhs,
                    CmpOp::Ne => lhs != *rhs,
                    _ => false,
                }
            }
        }
    }

    pub fn render(&self) -> String {
        let value = match &self.value {
            CmpValue::Num(n) => n.to_string(),
            CmpValue::Text(t) => t.clone(),
        };
        format!("{} {} {}", self.field, self.op.symbol(), value)
    }
}

/// Geographic radius filter (haversine distance in km).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoFilter {
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

/// A recognized input fragment with its matcher-category tag. Diagnostics
/// only.
#[derive(Debug, Clone, Serialize)]
pub struct RecognizedToken {
    pub text: String,
    pub tag: &'static str,
}

// ---------------------------------------------------------------------------
// ParsedQuery
// ---------------------------------------------------------------------------

/// Structured output of the parser cascade.
#[derive(Debug, Clone, Default)]
pub struct ParsedQuery {
    pub intent: QueryIntent,
    pub entity_type: Option<String>,
    pub sectors: BTreeSet<String>,
    pub level: Option<ClearanceLevel>,
    /// Relative window in hours, counted back from the reference instant.
    pub window_hours: Option<f64>,
    /// Absolute inclusive range resolved against the reference date.
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub statuses: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    /// OR was requested. Advisory only: filtering is always flat AND (see
    /// the pipeline docs); this flag only shapes the explanation text.
    pub use_or: bool,
    pub geo: Option<GeoFilter>,
    pub limit: Option<usize>,
    pub comparisons: Vec<Comparison>,
    // Diagnostics. Never consulted by any filter.
    pub tokens: Vec<RecognizedToken>,
    pub tips: Vec<String>,
    pub warnings: Vec<String>,
}

impl ParsedQuery {
    pub(crate) fn recognize(&mut self, text: impl Into<String>, tag: &'static str) {
        self.tokens.push(RecognizedToken {
            text: text.into(),
            tag,
        });
    }

    /// An actionable filter was extracted somewhere in the cascade.
    fn actionable(&self) -> bool {
        self.entity_type.is_some()
            || !self.categories.is_empty()
            || !self.statuses.is_empty()
            || !self.comparisons.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Cascade driver
// ---------------------------------------------------------------------------

/// Parse a free-text query. Returns `None` when nothing actionable was
/// recognized; the caller should answer with [`guidance_tips`].
pub fn parse(text: &str, config: &EngineConfig) -> Option<ParsedQuery> {
    let lower = text.to_lowercase();
    let mut query = ParsedQuery::default();

    // Fixed stage order; each stage is independent and cumulative.
    matchers::match_entity(&lower, &mut query);
    matchers::match_logic(&lower, &mut query);
    matchers::match_sectors(&lower, &mut query);
    matchers::match_statuses(&lower, &mut query);
    matchers::match_categories(&lower, &mut query);
    matchers::match_level(&lower, &mut query);
    matchers::match_relative_window(&lower, &mut query);
    matchers::match_absolute_range(&lower, config.reference_instant, &mut query);
    matchers::match_limit(&lower, &mut query);
    matchers::match_comparisons(&lower, &mut query);
    matchers::match_geo(&lower, config.default_radius_km, &mut query);

    if !query.actionable() {
        return None;
    }

    // Known ambiguous combinations get diagnostic warnings; advisory only.
    let disjuncts =
        query.statuses.len() + query.categories.len() + query.comparisons.len();
    if query.use_or && disjuncts < 2 {
        query.warnings.push(
            "OR was requested but fewer than two alternatives were recognized; \
             filters are combined with AND"
                .into(),
        );
    }
    if query.window_hours.is_some() && query.time_range.is_some() {
        query.warnings.push(
            "both a relative window and an absolute time range were given; \
             their intersection applies"
                .into(),
        );
    }
    if query.sectors.is_empty() {
        query
            .tips
            .push("add a sector filter (e.g. \"sector A\" / \"сектор A\") to narrow results".into());
    }

    Some(query)
}

/// Static guidance returned when nothing in the query was recognized.
pub fn guidance_tips() -> Vec<String> {
    vec![
        "name an entity type: дроны / БПЛА / drones, сенсоры / sensors, события / events"
            .into(),
        "narrow by sector: \"в секторе A\" / \"in sector A\"".into(),
        "filter by status: online / offline, активны / неактивны".into(),
        "add a time window: \"за последние 2 часа\" / \"last 2 hours\", \
         or \"с 10:00 до 12:00\""
            .into(),
        "compare attributes: \"скорость > 100\", \"altitude <= 500\"".into(),
    ]
}
