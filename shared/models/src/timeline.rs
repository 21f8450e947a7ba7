use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::point::PointId;

/// A single synthesized timeline entry. Produced by the structured
/// generator (§4.4 GenerateTimeline) and therefore derives `JsonSchema`
/// so it can be embedded in the function-call/response-format contract.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub sources: Vec<PointId>,
    #[serde(default)]
    pub location: Option<String>,
    pub credibility_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Timeline {
    pub topic: String,
    pub events: Vec<Event>,
    #[serde(default)]
    pub predictions: Vec<String>,
}

impl Timeline {
    /// Events are required to be in non-decreasing timestamp order (§4.6
    /// invariant); this checks rather than enforces, since the generator
    /// is expected to produce them sorted and the pipeline validates.
    pub fn is_chronological(&self) -> bool {
        self.events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpCategory {
    DeepDive,
    RelatedTopic,
    Verification,
    Prediction,
    Comparison,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FollowUpQuestion {
    pub category: FollowUpCategory,
    pub priority: u8,
    pub question: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MisinformationAnalysis {
    pub is_suspicious: bool,
    #[serde(default)]
    pub suspicious_patterns: Vec<String>,
    pub risk_level: RiskLevel,
    pub recommendation: String,
}

/// Response payload for `/api/verify` (§6). Not an LLM structured-output
/// target itself — it's assembled by the pipeline from retrieval and
/// generator results — so it doesn't need `JsonSchema`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredibilityAssessment {
    pub claim: String,
    pub credibility_score: f32,
    pub supporting_posts: Vec<PointId>,
    pub contradicting_posts: Vec<PointId>,
    pub misinformation: Option<MisinformationAnalysis>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_at(hour: i64) -> Event {
        Event {
            timestamp: Utc::now() + chrono::Duration::hours(hour),
            summary: "event".into(),
            sources: vec![],
            location: None,
            credibility_score: 0.8,
        }
    }

    #[test]
    fn chronological_timeline_passes() {
        let timeline = Timeline {
            topic: "flood".into(),
            events: vec![event_at(0), event_at(1), event_at(2)],
            predictions: vec![],
        };
        assert!(timeline.is_chronological());
    }

    #[test]
    fn out_of_order_timeline_fails() {
        let timeline = Timeline {
            topic: "flood".into(),
            events: vec![event_at(2), event_at(0)],
            predictions: vec![],
        };
        assert!(!timeline.is_chronological());
    }
}
