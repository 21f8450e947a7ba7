use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::point::PointId;

/// A claim that has been extracted and cross-referenced, stored in the
/// `facts` collection (§3). Distinct from `Post`: a `Fact` is a
/// de-duplicated statement that may be corroborated by many posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub fact_id: PointId,
    pub statement: String,
    pub sources: HashSet<String>,
    pub verification_status: VerificationStatus,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
}

impl Fact {
    pub fn corroboration_count(&self) -> usize {
        self.sources.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Disputed,
    Unverified,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corroboration_counts_unique_sources() {
        let mut sources = HashSet::new();
        sources.insert("reporter1".to_string());
        sources.insert("reporter2".to_string());
        let fact = Fact {
            fact_id: PointId::new(),
            statement: "a bridge collapsed".into(),
            sources,
            verification_status: VerificationStatus::Disputed,
            verified_at: None,
        };
        assert_eq!(fact.corroboration_count(), 2);
    }
}
