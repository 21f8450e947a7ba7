use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chronofact_config::RetrievalWeights;
use chronofact_models::{Post, PointId, QueryPlan};
use serde_json::Value;

use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::payload::payload_to_post;
use crate::vector_store::{Filter, SharedVectorStore};

pub const POSTS_COLLECTION: &str = "x_posts";

#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentScores {
    pub dense: f32,
    pub sparse: f32,
    pub multimodal: f32,
    pub credibility: f32,
}

#[derive(Debug, Clone)]
pub struct RetrievedPost {
    pub post: Post,
    pub fused_score: f32,
    pub components: ComponentScores,
}

#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    pub results: Vec<RetrievedPost>,
    /// Set when at least one but not all sub-queries failed (§4.3
    /// "Failure semantics"). The caller still gets the surviving results.
    pub partial: bool,
}

pub struct HybridRetriever {
    store: SharedVectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    weights: RetrievalWeights,
    rrf_k: u32,
}

impl HybridRetriever {
    pub fn new(store: SharedVectorStore, embedder: Arc<dyn EmbeddingProvider>, weights: RetrievalWeights, rrf_k: u32) -> Self {
        Self { store, embedder, weights, rrf_k }
    }

    fn build_filter(plan: &QueryPlan) -> Option<Filter> {
        let mut clauses = vec![Filter::Range {
            field: "credibility_score".into(),
            gte: Some(plan.min_credibility as f64),
            lte: None,
        }];
        if let Some(locations) = &plan.locations {
            if !locations.is_empty() {
                clauses.push(Filter::In(
                    "location".into(),
                    locations.iter().cloned().map(Value::String).collect(),
                ));
            }
        }
        if let Some(range) = &plan.time_range {
            clauses.push(Filter::Range {
                field: "timestamp_unix".into(),
                gte: Some(range.start.timestamp() as f64),
                lte: Some(range.end.timestamp() as f64),
            });
        }
        Filter::and(clauses)
    }

    /// Reciprocal-rank normalization of a score list: `1/(k+rank)`,
    /// rank is 1-based position in the caller's already-sorted-by-score
    /// list. Ids absent from the list get 0 in the caller's merge step.
    fn rrf_scores(&self, ranked_ids: &[PointId]) -> HashMap<PointId, f32> {
        ranked_ids
            .iter()
            .enumerate()
            .map(|(rank, id)| (*id, 1.0 / (self.rrf_k as f32 + (rank + 1) as f32)))
            .collect()
    }

    pub async fn retrieve(&self, plan: &QueryPlan, deadline: Instant) -> Result<RetrievalOutcome, RetrievalError> {
        let started = Instant::now();
        let filter = Self::build_filter(plan);
        let fan_out_limit = 3 * plan.limit;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RetrievalError::DeadlineExceeded);
        }

        let dense_vector = self
            .embedder
            .embed_text(&[plan.refined_text.clone()])
            .await
            .ok()
            .and_then(|v| v.into_iter().next());

        let dense_fut = async {
            match &dense_vector {
                Some(v) => self
                    .store
                    .query(POSTS_COLLECTION, "text", v, filter.as_ref(), fan_out_limit)
                    .await
                    .ok(),
                None => None,
            }
        };
        let sparse_fut = self.store.sparse_query(
            POSTS_COLLECTION,
            "text",
            &plan.refined_text,
            filter.as_ref(),
            fan_out_limit,
        );
        let multimodal_fut = async {
            match &plan.image_vector {
                Some(v) => self
                    .store
                    .query(POSTS_COLLECTION, "multimodal", v, filter.as_ref(), fan_out_limit)
                    .await
                    .ok(),
                None => None,
            }
        };

        let fan_out = tokio::time::timeout(remaining, async { tokio::join!(dense_fut, sparse_fut, multimodal_fut) });
        let (dense, sparse, multimodal) = fan_out.await.map_err(|_| RetrievalError::DeadlineExceeded)?;
        let sparse = sparse.ok();

        let mut attempted = 2; // dense + sparse are always attempted
        let mut succeeded = 0;
        if dense.is_some() {
            succeeded += 1;
        }
        if sparse.is_some() {
            succeeded += 1;
        }
        if plan.image_vector.is_some() {
            attempted += 1;
            if multimodal.is_some() {
                succeeded += 1;
            }
        }
        if succeeded == 0 {
            return Err(RetrievalError::Unavailable);
        }
        let partial = succeeded < attempted;

        let dense_points = dense.unwrap_or_default();
        let sparse_points = sparse.unwrap_or_default();
        let multimodal_points = multimodal.unwrap_or_default();

        let dense_ids: Vec<PointId> = dense_points.iter().map(|p| p.id).collect();
        let sparse_ids: Vec<PointId> = sparse_points.iter().map(|p| p.id).collect();
        let multimodal_ids: Vec<PointId> = multimodal_points.iter().map(|p| p.id).collect();

        let dense_rrf = self.rrf_scores(&dense_ids);
        let sparse_rrf = self.rrf_scores(&sparse_ids);
        let multimodal_rrf = self.rrf_scores(&multimodal_ids);

        let mut merged: HashMap<PointId, RetrievedPost> = HashMap::new();
        for point in dense_points.into_iter().chain(sparse_points).chain(multimodal_points) {
            merged.entry(point.id).or_insert_with(|| {
                let post = payload_to_post(point.id, &point.payload);
                RetrievedPost {
                    post: post.unwrap_or_else(|| placeholder_post(point.id)),
                    fused_score: 0.0,
                    components: ComponentScores::default(),
                }
            });
        }

        let mut results: Vec<RetrievedPost> = merged
            .into_values()
            .map(|mut rp| {
                let id = rp.post.post_id;
                let dense_score = *dense_rrf.get(&id).unwrap_or(&0.0);
                let sparse_score = *sparse_rrf.get(&id).unwrap_or(&0.0);
                let mm_score = *multimodal_rrf.get(&id).unwrap_or(&0.0);
                let credibility = rp.post.credibility_score as f32;

                rp.components = ComponentScores {
                    dense: dense_score,
                    sparse: sparse_score,
                    multimodal: mm_score,
                    credibility,
                };
                rp.fused_score = self.weights.w_d * dense_score
                    + self.weights.w_s * sparse_score
                    + self.weights.w_m * mm_score
                    + self.weights.w_c * credibility;
                rp
            })
            .collect();

        // Tie-break: (score desc, timestamp desc, id asc) — §4.3 step 6.
        results.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.post.timestamp.cmp(&a.post.timestamp))
                .then_with(|| a.post.post_id.cmp(&b.post.post_id))
        });

        let results = apply_diversity_pass(results, plan.limit);

        chronofact_observability::log_retrieval_executed(
            "chronofact-core",
            results.len(),
            partial,
            started.elapsed().as_millis() as u64,
        );

        Ok(RetrievalOutcome { results, partial })
    }
}

fn placeholder_post(id: PointId) -> Post {
    Post {
        post_id: id,
        text: String::new(),
        author: String::new(),
        timestamp: chrono::Utc::now(),
        credibility_score: 0.0,
        location: None,
        is_verified: false,
        fave_count: 0,
        retweet_count: 0,
        media_urls: Vec::new(),
        image_caption: None,
    }
}

/// Greedy diversity pass (§4.3 step 8): rejects a candidate if it would
/// push any author above 30% or any source-domain above 40% of the
/// output, provided a replacement scoring >= 0.85*best_remaining exists.
fn apply_diversity_pass(ranked: Vec<RetrievedPost>, limit: usize) -> Vec<RetrievedPost> {
    if ranked.is_empty() || limit == 0 {
        return ranked;
    }

    let max_per_author = ((limit as f32) * 0.30).ceil() as usize;
    let max_per_domain = ((limit as f32) * 0.40).ceil() as usize;

    let mut selected: Vec<RetrievedPost> = Vec::with_capacity(limit);
    let mut author_counts: HashMap<String, usize> = HashMap::new();
    let mut domain_counts: HashMap<String, usize> = HashMap::new();
    let mut rejected: Vec<RetrievedPost> = Vec::new();

    for candidate in ranked {
        if selected.len() >= limit {
            rejected.push(candidate);
            continue;
        }

        let author_count = *author_counts.get(&candidate.post.author).unwrap_or(&0);
        let domain = candidate.post.source_domain();
        let domain_count = *domain_counts.get(&domain).unwrap_or(&0);

        let would_exceed_author = author_count + 1 > max_per_author.max(1);
        let would_exceed_domain = domain_count + 1 > max_per_domain.max(1);

        if would_exceed_author || would_exceed_domain {
            let best_remaining_score = rejected
                .iter()
                .map(|r| r.fused_score)
                .fold(candidate.fused_score, f32::max);
            let feasible_replacement_exists = best_remaining_score >= 0.85 * candidate.fused_score;
            if feasible_replacement_exists {
                rejected.push(candidate);
                continue;
            }
        }

        *author_counts.entry(candidate.post.author.clone()).or_insert(0) += 1;
        *domain_counts.entry(domain).or_insert(0) += 1;
        selected.push(candidate);
    }

    // Backfill from rejected (by score) if diversity constraints left room
    // unfilled — a feasible assignment may still need every surviving point.
    if selected.len() < limit {
        rejected.sort_by(|a, b| b.fused_score.partial_cmp(&a.fused_score).unwrap_or(std::cmp::Ordering::Equal));
        for candidate in rejected {
            if selected.len() >= limit {
                break;
            }
            selected.push(candidate);
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post_with(author: &str, score: f32) -> RetrievedPost {
        RetrievedPost {
            post: Post {
                post_id: PointId::new(),
                text: "x".into(),
                author: author.into(),
                timestamp: Utc::now(),
                credibility_score: 0.5,
                location: None,
                is_verified: false,
                fave_count: 0,
                retweet_count: 0,
                media_urls: vec![],
                image_caption: None,
            },
            fused_score: score,
            components: ComponentScores::default(),
        }
    }

    #[test]
    fn diversity_pass_prefers_diverse_authors_when_feasible() {
        let ranked = vec![
            post_with("a1", 0.95),
            post_with("a1", 0.94),
            post_with("a2", 0.93),
            post_with("a3", 0.92),
            post_with("a4", 0.91),
        ];
        let selected = apply_diversity_pass(ranked, 5);
        let a1_count = selected.iter().filter(|p| p.post.author == "a1").count();
        assert!(a1_count <= 2, "feasible assignment exists with 4 other authors, should cap a1");
        assert_eq!(selected.len(), 5);
    }

    #[test]
    fn diversity_pass_is_noop_when_already_diverse() {
        let ranked = vec![
            post_with("a1", 0.9),
            post_with("a2", 0.8),
            post_with("a3", 0.7),
        ];
        let selected = apply_diversity_pass(ranked.clone(), 3);
        assert_eq!(selected.len(), 3);
    }
}
