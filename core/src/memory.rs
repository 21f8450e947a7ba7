use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use chronofact_models::{Memory, MemoryType, OptimizedVector, PointId};
use serde_json::{Map, Value};

use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, VectorStoreError};
use crate::vector_store::{
    Filter, PayloadFieldKind, PayloadIndexSpec, PointRecord, ScoredPoint, SharedVectorStore, VectorSpec,
};

pub const MEMORIES_COLLECTION: &str = "chronofact_memories";

/// §6 `memory.tau_delete` / `memory.reinforce_beta` defaults.
pub const DEFAULT_TAU_DELETE: f64 = 0.2;
pub const DEFAULT_REINFORCE_BETA: f64 = 0.1;
pub const CONSOLIDATION_THRESHOLD: f64 = 0.85;

/// C7 — the per-session memory evolution engine (§4.7). Wraps the shared
/// vector store's `memories` collection with decay, reinforcement, and
/// consolidation semantics; holds no state of its own beyond the handles
/// it was constructed with (§5's "global mutable state is confined to
/// the vector-store handle, the rate limiter, and configuration").
pub struct MemoryEngine {
    store: SharedVectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    tau_delete: f64,
    reinforce_beta: f64,
}

fn memory_to_payload(memory: &Memory) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("session_id".into(), Value::String(memory.session_id.clone()));
    payload.insert("content".into(), Value::String(memory.content.clone()));
    payload.insert(
        "memory_type".into(),
        serde_json::to_value(memory.memory_type).unwrap_or(Value::Null),
    );
    payload.insert("created_at".into(), Value::String(memory.created_at.to_rfc3339()));
    payload.insert("last_accessed".into(), Value::String(memory.last_accessed.to_rfc3339()));
    payload.insert("access_count".into(), Value::from(memory.access_count));
    payload.insert("relevance_score".into(), Value::from(memory.relevance_score));
    payload.insert("decay_rate".into(), Value::from(memory.decay_rate));
    payload.insert("is_consolidated".into(), Value::from(memory.is_consolidated));
    payload.insert(
        "parent_memories".into(),
        Value::Array(memory.parent_memories.iter().map(|id| Value::String(id.to_string())).collect()),
    );
    payload
}

fn payload_to_memory(id: PointId, payload: &Map<String, Value>) -> Option<Memory> {
    let session_id = payload.get("session_id")?.as_str()?.to_string();
    let content = payload.get("content")?.as_str()?.to_string();
    let memory_type: MemoryType = serde_json::from_value(payload.get("memory_type")?.clone()).ok()?;
    let created_at = payload.get("created_at")?.as_str()?.parse().ok()?;
    let last_accessed = payload.get("last_accessed")?.as_str()?.parse().ok()?;
    let access_count = payload.get("access_count").and_then(|v| v.as_u64()).unwrap_or(0);
    let relevance_score = payload.get("relevance_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let decay_rate = payload.get("decay_rate").and_then(|v| v.as_f64()).unwrap_or(memory_type.default_decay_rate());
    let is_consolidated = payload.get("is_consolidated").and_then(|v| v.as_bool()).unwrap_or(false);
    let parent_memories = payload
        .get("parent_memories")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()?.parse().ok()).collect())
        .unwrap_or_default();

    Some(Memory {
        memory_id: id,
        session_id,
        content,
        memory_type,
        created_at,
        last_accessed,
        access_count,
        relevance_score,
        decay_rate,
        is_consolidated,
        parent_memories,
    })
}

impl MemoryEngine {
    pub fn new(store: SharedVectorStore, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            tau_delete: DEFAULT_TAU_DELETE,
            reinforce_beta: DEFAULT_REINFORCE_BETA,
        }
    }

    pub fn with_thresholds(mut self, tau_delete: f64, reinforce_beta: f64) -> Self {
        self.tau_delete = tau_delete;
        self.reinforce_beta = reinforce_beta;
        self
    }

    pub async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        let dim = self.embedder.text_dimension();
        self.store
            .ensure_collection(
                MEMORIES_COLLECTION,
                &[VectorSpec { name: "text".into(), dimension: dim }],
                &[
                    PayloadIndexSpec { field: "session_id".into(), kind: PayloadFieldKind::Keyword },
                    PayloadIndexSpec { field: "relevance_score".into(), kind: PayloadFieldKind::Float },
                ],
            )
            .await
    }

    /// `store(session_id, content, type) → memory_id` (§4.7).
    pub async fn store(&self, session_id: &str, content: &str, memory_type: MemoryType) -> Result<PointId, EmbeddingError> {
        let memory = Memory::new(session_id, content, memory_type);
        let vector = self
            .embedder
            .embed_text(std::slice::from_ref(&content.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Unavailable("embedder returned no vector".into()))?;
        let record = PointRecord {
            id: memory.memory_id,
            vectors: HashMap::from([("text".to_string(), vector)]),
            payload: memory_to_payload(&memory),
        };
        self.store
            .upsert(MEMORIES_COLLECTION, vec![record])
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        Ok(memory.memory_id)
    }

    /// `retrieve_and_reinforce(session_id, query_vector, limit,
    /// min_relevance) → Memory[]`. Never decreases `relevance_score` or
    /// `access_count` (testable property 6).
    pub async fn retrieve_and_reinforce(
        &self,
        session_id: &str,
        query_vector: &[f32],
        limit: usize,
        min_relevance: f64,
    ) -> Result<Vec<Memory>, VectorStoreError> {
        let filter = Filter::and(vec![
            Filter::Eq("session_id".into(), Value::String(session_id.to_string())),
            Filter::Range { field: "relevance_score".into(), gte: Some(min_relevance), lte: None },
        ]);

        let scored = self.store.query(MEMORIES_COLLECTION, "text", query_vector, filter.as_ref(), limit).await?;
        let now = Utc::now();

        let mut reinforced = Vec::with_capacity(scored.len());
        for ScoredPoint { id, payload, .. } in scored {
            let Some(mut memory) = payload_to_memory(id, &payload) else { continue };
            memory.reinforce(self.reinforce_beta, now);
            self.store
                .set_payload(MEMORIES_COLLECTION, id, memory_to_payload(&memory))
                .await?;
            chronofact_observability::log_memory_reinforced(
                "chronofact-core",
                session_id,
                id.as_uuid(),
                memory.relevance_score,
            );
            reinforced.push(memory);
        }
        Ok(reinforced)
    }

    /// `apply_global_decay()`: scrolls the whole collection in batches
    /// (§5: "holds no locks across the whole collection"), applying decay
    /// per point and deleting anything falling below `tau_delete`.
    pub async fn apply_global_decay(&self) -> Result<DecaySummary, VectorStoreError> {
        let started = std::time::Instant::now();
        let mut summary = DecaySummary::default();
        let now = Utc::now();
        let mut cursor = None;

        loop {
            let page = self.store.scroll(MEMORIES_COLLECTION, None, cursor, 200).await?;
            let mut to_delete = Vec::new();

            for point in &page.points {
                let Some(mut memory) = payload_to_memory(point.id, &point.payload) else { continue };
                let decayed = memory.decayed_score(now);
                memory.relevance_score = decayed;
                memory.last_accessed = now;
                summary.evaluated += 1;

                if decayed < self.tau_delete {
                    to_delete.push(point.id);
                    summary.deleted += 1;
                } else {
                    self.store
                        .set_payload(MEMORIES_COLLECTION, point.id, memory_to_payload(&memory))
                        .await?;
                }
            }

            if !to_delete.is_empty() {
                self.store.delete(MEMORIES_COLLECTION, &to_delete).await?;
            }

            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        chronofact_observability::log_memory_sweep(
            "chronofact-core",
            "apply_global_decay",
            summary.deleted,
            started.elapsed().as_millis() as u64,
        );
        Ok(summary)
    }

    /// `consolidate_similar(threshold=0.85)`: clusters same-session
    /// memories by pairwise cosine similarity, replacing clusters of size
    /// ≥2 with a single consolidated memory. Re-checks `last_accessed`
    /// immediately before deleting children, skipping the cluster if any
    /// member was touched since it was read (§4.7 consolidation safety
    /// invariant).
    pub async fn consolidate_similar(&self, session_id: &str, threshold: f64) -> Result<usize, VectorStoreError> {
        let started = std::time::Instant::now();
        let filter = Filter::Eq("session_id".into(), Value::String(session_id.to_string()));
        let mut all_points = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.store.scroll(MEMORIES_COLLECTION, Some(&filter), cursor, 200).await?;
            all_points.extend(page.points);
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        // The store interface exposes payloads, not raw stored vectors, so
        // similarity is computed by re-embedding content; session-scoped
        // memory sets are small enough that this is cheap.
        let mut entries: Vec<(Memory, Vec<f32>)> = Vec::new();
        for point in &all_points {
            if let Some(memory) = payload_to_memory(point.id, &point.payload) {
                let vector = self
                    .embedder
                    .embed_text(std::slice::from_ref(&memory.content))
                    .await
                    .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?
                    .into_iter()
                    .next()
                    .ok_or_else(|| VectorStoreError::Unavailable("embedder returned no vector".into()))?;
                entries.push((memory, vector));
            }
        }

        let clusters = cluster_by_similarity(&entries, threshold);
        let mut consolidated_count = 0;

        for cluster in clusters {
            if cluster.len() < 2 {
                continue;
            }

            let snapshot_last_accessed: Vec<_> = cluster.iter().map(|idx| entries[*idx].0.last_accessed).collect();
            let refreshed_ok = {
                let mut ok = true;
                for (idx, original_accessed) in cluster.iter().zip(&snapshot_last_accessed) {
                    let current = &entries[*idx].0;
                    if current.last_accessed != *original_accessed {
                        ok = false;
                        break;
                    }
                }
                ok
            };
            if !refreshed_ok {
                continue;
            }

            let members: Vec<&Memory> = cluster.iter().map(|idx| &entries[*idx].0).collect();
            let longest = members.iter().max_by_key(|m| m.content.len()).unwrap();
            let max_relevance = members.iter().map(|m| m.relevance_score).fold(0.0_f64, f64::max);

            let mut consolidated = Memory::new(session_id, longest.content.clone(), longest.memory_type);
            consolidated.relevance_score = max_relevance;
            consolidated.is_consolidated = true;
            consolidated.parent_memories = members.iter().map(|m| m.memory_id).collect();

            let vector = self
                .embedder
                .embed_text(std::slice::from_ref(&consolidated.content))
                .await
                .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| VectorStoreError::Unavailable("embedder returned no vector".into()))?;
            let record = PointRecord {
                id: consolidated.memory_id,
                vectors: HashMap::from([("text".to_string(), vector)]),
                payload: memory_to_payload(&consolidated),
            };
            self.store.upsert(MEMORIES_COLLECTION, vec![record]).await?;

            let child_ids: Vec<PointId> = members.iter().map(|m| m.memory_id).collect();
            self.store.delete(MEMORIES_COLLECTION, &child_ids).await?;
            consolidated_count += 1;
        }

        chronofact_observability::log_memory_sweep(
            "chronofact-core",
            "consolidate_similar",
            consolidated_count,
            started.elapsed().as_millis() as u64,
        );
        Ok(consolidated_count)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DecaySummary {
    pub evaluated: usize,
    pub deleted: usize,
}

/// Greedy single-pass clustering: each unclustered entry seeds a new
/// cluster, absorbing every remaining entry whose cosine similarity to
/// the seed exceeds `threshold`. Good enough for the small per-session
/// memory sets this operates over; not a general clustering algorithm.
fn cluster_by_similarity(entries: &[(Memory, Vec<f32>)], threshold: f64) -> Vec<Vec<usize>> {
    let mut remaining: Vec<usize> = (0..entries.len()).collect();
    let mut clusters = Vec::new();

    while let Some(seed) = remaining.first().copied() {
        remaining.retain(|&i| i != seed);
        let seed_vector = OptimizedVector::new(entries[seed].1.clone());
        let mut cluster = vec![seed];

        remaining.retain(|&i| {
            let candidate_vector = OptimizedVector::new(entries[i].1.clone());
            let similarity = seed_vector.cosine_similarity(&candidate_vector);
            if similarity as f64 >= threshold {
                cluster.push(i);
                false
            } else {
                true
            }
        });

        clusters.push(cluster);
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn payload_round_trips_through_memory() {
        let memory = Memory::new("session-1", "flooding discussion", MemoryType::Fact);
        let payload = memory_to_payload(&memory);
        let restored = payload_to_memory(memory.memory_id, &payload).unwrap();
        assert_eq!(restored.session_id, memory.session_id);
        assert_eq!(restored.content, memory.content);
        assert_eq!(restored.memory_type, memory.memory_type);
    }

    #[test]
    fn cluster_by_similarity_groups_near_identical_vectors() {
        let a = Memory::new("s1", "short", MemoryType::Interaction);
        let b = Memory::new("s1", "short duplicate phrasing", MemoryType::Interaction);
        let c = Memory::new("s1", "unrelated content entirely", MemoryType::Interaction);
        let entries = vec![
            (a, vec![1.0, 0.0, 0.0]),
            (b, vec![0.99, 0.01, 0.0]),
            (c, vec![0.0, 1.0, 0.0]),
        ];
        let clusters = cluster_by_similarity(&entries, 0.85);
        assert_eq!(clusters.len(), 2);
        let sizes: Vec<usize> = clusters.iter().map(|c| c.len()).collect();
        assert!(sizes.contains(&2));
        assert!(sizes.contains(&1));
    }

    #[test]
    fn decay_and_reinforce_are_idempotent_at_zero_elapsed_time() {
        let mut memory = Memory::new("s1", "content", MemoryType::Fact);
        let now = memory.last_accessed;
        let first = memory.decayed_score(now);
        memory.relevance_score = first;
        memory.last_accessed = now;
        let second = memory.decayed_score(now);
        assert!((first - second).abs() < 1e-9);
    }

    #[test]
    fn decay_never_increases_relevance_or_access_count() {
        let memory = Memory::new("s1", "content", MemoryType::Interaction);
        let later = memory.last_accessed + Duration::days(5);
        let decayed = memory.decayed_score(later);
        assert!(decayed <= memory.relevance_score);
    }
}
