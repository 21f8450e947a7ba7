use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The structured plan produced by the query processor (§4.4 ProcessQuery)
/// and consumed by the hybrid retriever (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryPlan {
    pub refined_text: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub locations: Option<Vec<String>>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default = "default_min_credibility")]
    pub min_credibility: f32,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Set by the pipeline after `ProcessQuery` returns, never by the
    /// LLM — excluded from both the generated JSON Schema and the wire
    /// format so a model is never asked to emit raw embedding floats.
    #[serde(skip)]
    pub image_vector: Option<Vec<f32>>,
}

fn default_min_credibility() -> f32 {
    0.0
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_range_contains_bounds_inclusive() {
        let start = Utc::now();
        let end = start + chrono::Duration::hours(1);
        let range = TimeRange { start, end };
        assert!(range.contains(start));
        assert!(range.contains(end));
        assert!(!range.contains(end + chrono::Duration::seconds(1)));
    }
}
