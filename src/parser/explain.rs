//! Human-readable explanation of what the parser understood.
//!
//! The explanation is purely descriptive: it is assembled *from* the parsed
//! query after filtering has been decided, and nothing here feeds back into
//! the pipeline.

use serde::Serialize;

use super::{ParsedQuery, RecognizedToken};

/// Structured account of a query: what was recognized, how it was filtered,
/// and any tips or warnings. Returned on every pipeline path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Explanation {
    /// Recognized entity label, if any.
    pub entity: Option<String>,
    /// The interpreted intent ("count" / "list" / "timeline").
    pub intent: String,
    /// Rendered filter summary, one line per active filter.
    pub filters: Vec<String>,
    /// Rendered attribute comparisons.
    pub comparisons: Vec<String>,
    /// Time window / range description.
    pub time: Option<String>,
    /// Geo filter description.
    pub geo: Option<String>,
    pub limit: Option<usize>,
    /// Deduplicated suggestions for sharper queries.
    pub tips: Vec<String>,
    pub warnings: Vec<String>,
    /// Raw recognized tokens with their matcher-category tags.
    pub tokens: Vec<RecognizedToken>,
}

impl Explanation {
    /// Build the explanation for a successfully parsed query.
    pub fn from_parsed(query: &ParsedQuery) -> Self {
        let mut filters = Vec::new();
        if !query.sectors.is_empty() {
            let sectors: Vec<&str> = query.sectors.iter().map(String::as_str).collect();
            filters.push(format!("sector in [{}]", sectors.join(", ")));
        }
        if let Some(level) = query.level {
            filters.push(format!("classification = {level}"));
        }
        if !query.statuses.is_empty() {
            let statuses: Vec<&str> = query.statuses.iter().map(String::as_str).collect();
            filters.push(format!("status in [{}]", statuses.join(", ")));
        }
        if !query.categories.is_empty() {
            let categories: Vec<&str> = query.categories.iter().map(String::as_str).collect();
            filters.push(format!("category in [{}]", categories.join(", ")));
        }
        if query.use_or {
            filters.push("logic: OR requested (combined as AND)".into());
        }

        let time = match (query.window_hours, query.time_range) {
            (Some(h), Some((start, end))) => Some(format!(
                "last {h} h intersected with {}..{}",
                start.format("%H:%M"),
                end.format("%H:%M")
            )),
            (Some(h), None) => Some(format!("last {h} h")),
            (None, Some((start, end))) => Some(format!(
                "{}..{} inclusive",
                start.format("%H:%M"),
                end.format("%H:%M")
            )),
            (None, None) => None,
        };

        let geo = query.geo.as_ref().map(|g| {
            format!(
                "within {} km of ({:.4}, {:.4})",
                g.radius_km, g.lat, g.lon
            )
        });

        Self {
            entity: query.entity_type.clone(),
            intent: query.intent.as_str().to_string(),
            filters,
            comparisons: query.comparisons.iter().map(|c| c.render()).collect(),
            time,
            geo,
            limit: query.limit,
            tips: dedup(query.tips.clone()),
            warnings: query.warnings.clone(),
            tokens: query.tokens.clone(),
        }
    }

    /// Explanation for a query nothing could be made of.
    pub fn unrecognized(tips: Vec<String>) -> Self {
        Self {
            intent: "unrecognized".into(),
            tips: dedup(tips),
            ..Self::default()
        }
    }

    /// One-line-per-item plain text rendering for terminal output.
    pub fn render_text(&self) -> String {
        let mut lines = Vec::new();
        match &self.entity {
            Some(entity) => lines.push(format!("understood: {} of {entity}", self.intent)),
            None => lines.push(format!("understood: {}", self.intent)),
        }
        for f in &self.filters {
            lines.push(format!("  filter: {f}"));
        }
        for c in &self.comparisons {
            lines.push(format!("  where: {c}"));
        }
        if let Some(time) = &self.time {
            lines.push(format!("  time: {time}"));
        }
        if let Some(geo) = &self.geo {
            lines.push(format!("  geo: {geo}"));
        }
        if let Some(limit) = self.limit {
            lines.push(format!("  limit: {limit} most recent"));
        }
        for w in &self.warnings {
            lines.push(format!("  warning: {w}"));
        }
        for t in &self.tips {
            lines.push(format!("  tip: {t}"));
        }
        lines.join("\n")
    }
}

/// Order-preserving dedup.
fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}
