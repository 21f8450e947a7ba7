use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::point::PointId;

/// The unit of retrieval, stored in the `x_posts` collection (§3).
///
/// `credibility_score` is persisted at ingestion time and never
/// recomputed at query time; `text` is the only named vector guaranteed
/// to be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub post_id: PointId,
    pub text: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub credibility_score: f64,

    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub fave_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub image_caption: Option<String>,
}

impl Post {
    pub fn has_media(&self) -> bool {
        !self.media_urls.is_empty()
    }

    /// Best-effort domain extraction for the diversity pass (§4.3 step 8).
    /// Falls back to the author handle when no media URL is present, since
    /// posts without media have no other notion of "source domain".
    pub fn source_domain(&self) -> String {
        for url in &self.media_urls {
            if let Some(domain) = extract_domain(url) {
                return domain;
            }
        }
        self.author.clone()
    }
}

fn extract_domain(url: &str) -> Option<String> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host = without_scheme.split('/').next()?;
    Some(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_domain_from_media_url() {
        let post = Post {
            post_id: PointId::new(),
            text: "flooding reported".into(),
            author: "reporter1".into(),
            timestamp: Utc::now(),
            credibility_score: 0.9,
            location: None,
            is_verified: true,
            fave_count: 0,
            retweet_count: 0,
            media_urls: vec!["https://cdn.example.com/a.jpg".into()],
            image_caption: None,
        };
        assert_eq!(post.source_domain(), "cdn.example.com");
    }

    #[test]
    fn source_domain_falls_back_to_author() {
        let post = Post {
            post_id: PointId::new(),
            text: "text only".into(),
            author: "reporter2".into(),
            timestamp: Utc::now(),
            credibility_score: 0.5,
            location: None,
            is_verified: false,
            fave_count: 0,
            retweet_count: 0,
            media_urls: vec![],
            image_caption: None,
        };
        assert_eq!(post.source_domain(), "reporter2");
    }
}
