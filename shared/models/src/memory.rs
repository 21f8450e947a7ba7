use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::point::PointId;

/// An evolving unit of per-session recall, stored in the `memories`
/// collection (§3, §4.7). `relevance_score` decays over time and is
/// reinforced on access; it is never read directly as a ranking score
/// without first applying decay for elapsed time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub memory_id: PointId,
    pub session_id: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    pub relevance_score: f64,
    pub decay_rate: f64,
    #[serde(default)]
    pub is_consolidated: bool,
    #[serde(default)]
    pub parent_memories: HashSet<PointId>,
}

impl Memory {
    pub fn new(session_id: impl Into<String>, content: impl Into<String>, memory_type: MemoryType) -> Self {
        let now = Utc::now();
        let decay_rate = memory_type.default_decay_rate();
        Self {
            memory_id: PointId::new(),
            session_id: session_id.into(),
            content: content.into(),
            memory_type,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            relevance_score: 1.0,
            decay_rate,
            is_consolidated: false,
            parent_memories: HashSet::new(),
        }
    }

    /// Applies exponential decay for the elapsed time since `last_accessed`
    /// without mutating `last_accessed` itself (§4.7: decay is evaluated at
    /// read/sweep time, access bumps happen separately via `reinforce`).
    pub fn decayed_score(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_days = (now - self.last_accessed).num_seconds() as f64 / 86_400.0;
        if elapsed_days <= 0.0 {
            return self.relevance_score;
        }
        self.relevance_score * (-self.decay_rate * elapsed_days).exp()
    }

    /// Reinforces on access: `score = min(1, score + beta * (1 - score))`,
    /// applied to the currently stored score directly — decay is a
    /// separate read/sweep-time concern and must not be folded in here,
    /// or a long-untouched memory could net *lose* relevance on access.
    pub fn reinforce(&mut self, beta: f64, now: DateTime<Utc>) {
        self.relevance_score = (self.relevance_score + beta * (1.0 - self.relevance_score)).min(1.0);
        self.last_accessed = now;
        self.access_count += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Interaction,
    Fact,
    Preference,
}

impl MemoryType {
    /// Facts decay slowest, preferences fastest, matching §4.7's per-type
    /// default decay rates (fact=0.005, interaction=0.02, preference=0.01).
    pub fn default_decay_rate(self) -> f64 {
        match self {
            MemoryType::Interaction => 0.02,
            MemoryType::Fact => 0.005,
            MemoryType::Preference => 0.01,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn decay_reduces_score_over_time() {
        let memory = Memory::new("session-1", "user prefers concise timelines", MemoryType::Preference);
        let later = memory.last_accessed + Duration::days(30);
        let decayed = memory.decayed_score(later);
        assert!(decayed < memory.relevance_score);
        assert!(decayed > 0.0);
    }

    #[test]
    fn reinforce_increases_score_and_resets_clock() {
        let mut memory = Memory::new("session-1", "flooding is a recurring topic", MemoryType::Fact);
        let later = memory.last_accessed + Duration::days(10);
        let pre = memory.relevance_score;
        memory.reinforce(0.1, later);
        assert!(memory.relevance_score >= pre);
        assert_eq!(memory.access_count, 1);
        assert_eq!(memory.last_accessed, later);
    }

    #[test]
    fn reinforce_never_exceeds_one() {
        let mut memory = Memory::new("session-1", "repeated topic", MemoryType::Interaction);
        let now = memory.last_accessed;
        for _ in 0..100 {
            memory.reinforce(0.5, now);
        }
        assert!(memory.relevance_score <= 1.0);
    }
}
