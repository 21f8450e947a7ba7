use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chronofact_models::PointId;
use qdrant_client::qdrant::{
    vectors_config::Config as VectorsConfigOneOf, CreateCollectionBuilder,
    CreateFieldIndexCollectionBuilder, Distance, FieldType, Filter as QFilter, PointStruct,
    ScrollPointsBuilder, SearchPointsBuilder, SetPayloadPointsBuilder, UpsertPointsBuilder,
    VectorParams, VectorParamsMap, VectorsConfig,
};
use qdrant_client::Qdrant;
use serde_json::{Map, Value};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, STORED, TEXT};
use tantivy::{doc, Index, TantivyDocument};
use tokio::sync::Mutex;

use crate::error::VectorStoreError;

/// A point as handed to `upsert` — one or more named vectors plus a
/// JSON payload (§4.2).
#[derive(Debug, Clone)]
pub struct PointRecord {
    pub id: PointId,
    pub vectors: HashMap<String, Vec<f32>>,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: PointId,
    pub score: f32,
    pub payload: Map<String, Value>,
}

pub struct ScrollPage {
    pub points: Vec<ScoredPoint>,
    pub next_cursor: Option<String>,
}

/// A named-vector dimension declaration for `ensure_collection`.
pub struct VectorSpec {
    pub name: String,
    pub dimension: usize,
}

/// The Qdrant field-index type a payload field should be created with.
#[derive(Debug, Clone, Copy)]
pub enum PayloadFieldKind {
    Keyword,
    Integer,
    Float,
}

/// A per-field payload index declaration for `ensure_collection` (§4.2:
/// collections are created "with declared named-vector dimensions and
/// per-field payload indexes"). Every field a `Filter` is built over
/// needs one of these or Qdrant falls back to an unindexed scan.
pub struct PayloadIndexSpec {
    pub field: String,
    pub kind: PayloadFieldKind,
}

/// A filter tree over indexed payload fields (§4.2): conjunctions,
/// disjunctions, equality, numeric range, and set membership.
#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Eq(String, Value),
    Range { field: String, gte: Option<f64>, lte: Option<f64> },
    In(String, Vec<Value>),
}

impl Filter {
    pub fn and(filters: Vec<Filter>) -> Option<Filter> {
        let filters: Vec<Filter> = filters.into_iter().collect();
        if filters.is_empty() {
            None
        } else {
            Some(Filter::And(filters))
        }
    }
}

/// The vector store capability surface of §4.2. Backend-agnostic so the
/// hybrid retriever (C3) and memory engine (C7) can run against either
/// the Qdrant-backed client or an in-memory test double.
#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    async fn ensure_collection(
        &self,
        name: &str,
        vectors: &[VectorSpec],
        payload_indexes: &[PayloadIndexSpec],
    ) -> Result<(), VectorStoreError>;

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<(), VectorStoreError>;

    async fn query(
        &self,
        collection: &str,
        using: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError>;

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        cursor: Option<String>,
        batch: usize,
    ) -> Result<ScrollPage, VectorStoreError>;

    async fn delete(&self, collection: &str, ids: &[PointId]) -> Result<(), VectorStoreError>;

    async fn set_payload(
        &self,
        collection: &str,
        id: PointId,
        patch: Map<String, Value>,
    ) -> Result<(), VectorStoreError>;

    /// BM25-style sparse query over the `text` payload field (§4.2
    /// `sparse_query`). Implemented once, on top of `scroll`, with an
    /// ephemeral in-process tantivy index — Qdrant has no native lexical
    /// scoring, so the sparse list is computed client-side from a bounded
    /// scroll of the collection rather than faked with a hand-rolled TF-IDF.
    async fn sparse_query(
        &self,
        collection: &str,
        text_field: &str,
        query_text: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        const SCAN_CAP: usize = 10_000;

        let mut by_id: HashMap<String, Map<String, Value>> = HashMap::new();
        let mut cursor = None;
        loop {
            let page = self.scroll(collection, filter, cursor, 500).await?;
            for point in page.points {
                by_id.insert(point.id.to_string(), point.payload);
            }
            cursor = page.next_cursor;
            if cursor.is_none() || by_id.len() >= SCAN_CAP {
                break;
            }
        }

        if by_id.is_empty() {
            return Ok(Vec::new());
        }

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("point_id", STORED);
        let text_tantivy_field = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema.clone());
        let mut writer = index
            .writer(15_000_000)
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        for (id, payload) in &by_id {
            let text = payload
                .get(text_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            writer
                .add_document(doc!(id_field => id.as_str(), text_tantivy_field => text))
                .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
        }
        writer
            .commit()
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        let reader = index
            .reader()
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
        let searcher = reader.searcher();
        let query_parser = QueryParser::for_index(&index, vec![text_tantivy_field]);
        let parsed = query_parser
            .parse_query(query_text)
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(addr)
                .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
            if let Some(id_value) = retrieved.get_first(id_field).and_then(|v| v.as_str()) {
                if let Ok(id) = id_value.parse::<PointId>() {
                    let payload = by_id.get(id_value).cloned().unwrap_or_default();
                    results.push(ScoredPoint { id, score, payload });
                }
            }
        }
        Ok(results)
    }
}

/// Qdrant-backed implementation, grounded on the teacher's
/// `VectorStoreService` (embedding crate) and its collection-management
/// calls, generalized to the builder API and named-vector collections
/// Chronofact's three-collection data model needs.
pub struct QdrantVectorStore {
    client: Qdrant,
}

impl QdrantVectorStore {
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }

    fn build_filter(filter: Option<&Filter>) -> Option<QFilter> {
        filter.map(Self::translate_filter)
    }

    fn translate_filter(filter: &Filter) -> QFilter {
        use qdrant_client::qdrant::{Condition, Range};

        match filter {
            Filter::And(children) => {
                QFilter::all(children.iter().map(Self::translate_condition))
            }
            Filter::Or(children) => QFilter::any(children.iter().map(Self::translate_condition)),
            Filter::Eq(field, value) => QFilter::all([Self::eq_condition(field, value)]),
            Filter::Range { field, gte, lte } => {
                let mut range = Range::default();
                range.gte = *gte;
                range.lte = *lte;
                QFilter::all([Condition::range(field, range)])
            }
            Filter::In(field, values) => {
                let strings: Vec<String> = values
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect();
                QFilter::all([Condition::matches(field, strings)])
            }
        }
    }

    fn translate_condition(filter: &Filter) -> qdrant_client::qdrant::Condition {
        use qdrant_client::qdrant::Condition;
        match filter {
            Filter::Eq(field, value) => Self::eq_condition(field, value),
            Filter::In(field, values) => {
                let strings: Vec<String> = values
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect();
                Condition::matches(field, strings)
            }
            other => Condition::filter(Self::translate_filter(other)),
        }
    }

    fn eq_condition(field: &str, value: &Value) -> qdrant_client::qdrant::Condition {
        use qdrant_client::qdrant::Condition;
        match value {
            Value::String(s) => Condition::matches(field, s.clone()),
            Value::Bool(b) => Condition::matches(field, *b),
            Value::Number(n) if n.is_i64() => Condition::matches(field, n.as_i64().unwrap()),
            _ => Condition::matches(field, value.to_string()),
        }
    }
}

#[async_trait]
impl VectorStoreClient for QdrantVectorStore {
    async fn ensure_collection(
        &self,
        name: &str,
        vectors: &[VectorSpec],
        payload_indexes: &[PayloadIndexSpec],
    ) -> Result<(), VectorStoreError> {
        if self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?
        {
            return Ok(());
        }

        let map = vectors
            .iter()
            .map(|v| {
                (
                    v.name.clone(),
                    VectorParams {
                        size: v.dimension as u64,
                        distance: Distance::Cosine.into(),
                        ..Default::default()
                    },
                )
            })
            .collect();

        self.client
            .create_collection(CreateCollectionBuilder::new(name).vectors_config(VectorsConfig {
                config: Some(VectorsConfigOneOf::ParamsMap(VectorParamsMap { map })),
            }))
            .await
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        for spec in payload_indexes {
            let field_type = match spec.kind {
                PayloadFieldKind::Keyword => FieldType::Keyword,
                PayloadFieldKind::Integer => FieldType::Integer,
                PayloadFieldKind::Float => FieldType::Float,
            };
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(name, spec.field.clone(), field_type))
                .await
                .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let qpoints: Vec<PointStruct> = points
            .into_iter()
            .map(|p| {
                let payload: Map<String, Value> = p.payload;
                PointStruct::new(p.id.to_string(), p.vectors, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, qpoints).wait(true))
            .await
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        using: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let mut builder = SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64)
            .vector_name(using)
            .with_payload(true);
        if let Some(qfilter) = Self::build_filter(filter) {
            builder = builder.filter(qfilter);
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point_id_from_qdrant(&point.id)?;
                let payload = payload_to_json_map(point.payload);
                Some(ScoredPoint { id, score: point.score, payload })
            })
            .collect())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        cursor: Option<String>,
        batch: usize,
    ) -> Result<ScrollPage, VectorStoreError> {
        let mut builder = ScrollPointsBuilder::new(collection)
            .limit(batch as u32)
            .with_payload(true);
        if let Some(qfilter) = Self::build_filter(filter) {
            builder = builder.filter(qfilter);
        }
        if let Some(cursor) = cursor {
            if let Ok(uuid) = cursor.parse() {
                builder = builder.offset(qdrant_client::qdrant::PointId::from(uuid));
            }
        }

        let response = self
            .client
            .scroll(builder)
            .await
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        let next_cursor = response
            .next_page_offset
            .as_ref()
            .and_then(point_id_from_qdrant)
            .map(|id| id.to_string());

        let points = response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point_id_from_qdrant(point.id.as_ref()?)?;
                let payload = payload_to_json_map(point.payload);
                Some(ScoredPoint { id, score: 1.0, payload })
            })
            .collect();

        Ok(ScrollPage { points, next_cursor })
    }

    async fn delete(&self, collection: &str, ids: &[PointId]) -> Result<(), VectorStoreError> {
        use qdrant_client::qdrant::{DeletePointsBuilder, PointsIdsList};

        let point_ids: Vec<qdrant_client::qdrant::PointId> =
            ids.iter().map(|id| id.to_string().into()).collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: PointId,
        patch: Map<String, Value>,
    ) -> Result<(), VectorStoreError> {
        use qdrant_client::qdrant::PointsIdsList;

        let point_ids = PointsIdsList {
            ids: vec![id.to_string().into()],
        };

        self.client
            .set_payload(
                SetPayloadPointsBuilder::new(collection, patch)
                    .points_selector(point_ids)
                    .wait(true),
            )
            .await
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

fn point_id_from_qdrant(id: &qdrant_client::qdrant::PointId) -> Option<PointId> {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match &id.point_id_options {
        Some(PointIdOptions::Uuid(s)) => s.parse().ok(),
        Some(PointIdOptions::Num(_)) => None,
        None => None,
    }
}

fn payload_to_json_map(payload: HashMap<String, qdrant_client::qdrant::Value>) -> Map<String, Value> {
    payload
        .into_iter()
        .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|v| (k, v)))
        .collect()
}

/// In-process test double implementing the same trait as the
/// Qdrant-backed client (§A.4), used for C3/C7 determinism and
/// monotonicity property tests without a live Qdrant instance.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: Mutex<HashMap<String, HashMap<String, PointRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(filter: &Filter, payload: &Map<String, Value>) -> bool {
        match filter {
            Filter::And(children) => children.iter().all(|c| Self::matches(c, payload)),
            Filter::Or(children) => children.iter().any(|c| Self::matches(c, payload)),
            Filter::Eq(field, value) => payload.get(field) == Some(value),
            Filter::Range { field, gte, lte } => payload
                .get(field)
                .and_then(|v| v.as_f64())
                .map(|v| gte.map_or(true, |g| v >= g) && lte.map_or(true, |l| v <= l))
                .unwrap_or(false),
            Filter::In(field, values) => payload
                .get(field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
        }
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            dot / (na * nb)
        }
    }
}

#[async_trait]
impl VectorStoreClient for InMemoryVectorStore {
    async fn ensure_collection(
        &self,
        name: &str,
        _vectors: &[VectorSpec],
        _payload_indexes: &[PayloadIndexSpec],
    ) -> Result<(), VectorStoreError> {
        self.collections
            .lock()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.lock().await;
        let store = collections.entry(collection.to_string()).or_default();
        for point in points {
            store.insert(point.id.to_string(), point);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        using: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let collections = self.collections.lock().await;
        let Some(store) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredPoint> = store
            .values()
            .filter(|p| filter.map_or(true, |f| Self::matches(f, &p.payload)))
            .filter_map(|p| {
                p.vectors.get(using).map(|v| ScoredPoint {
                    id: p.id,
                    score: Self::cosine(vector, v),
                    payload: p.payload.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        cursor: Option<String>,
        batch: usize,
    ) -> Result<ScrollPage, VectorStoreError> {
        let collections = self.collections.lock().await;
        let Some(store) = collections.get(collection) else {
            return Ok(ScrollPage { points: Vec::new(), next_cursor: None });
        };

        let mut ids: Vec<&String> = store.keys().collect();
        ids.sort();

        let start = cursor
            .and_then(|c| ids.iter().position(|id| **id == c))
            .map(|pos| pos + 1)
            .unwrap_or(0);

        let page_ids: Vec<&String> = ids.into_iter().skip(start).take(batch).collect();
        let next_cursor = page_ids.last().map(|s| s.to_string());

        let points = page_ids
            .into_iter()
            .filter_map(|id| store.get(id))
            .filter(|p| filter.map_or(true, |f| Self::matches(f, &p.payload)))
            .map(|p| ScoredPoint { id: p.id, score: 1.0, payload: p.payload.clone() })
            .collect();

        Ok(ScrollPage { points, next_cursor })
    }

    async fn delete(&self, collection: &str, ids: &[PointId]) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.lock().await;
        if let Some(store) = collections.get_mut(collection) {
            for id in ids {
                store.remove(&id.to_string());
            }
        }
        Ok(())
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: PointId,
        patch: Map<String, Value>,
    ) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.lock().await;
        let store = collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::NotFound(collection.to_string()))?;
        let point = store
            .get_mut(&id.to_string())
            .ok_or_else(|| VectorStoreError::NotFound(id.to_string()))?;
        for (k, v) in patch {
            point.payload.insert(k, v);
        }
        Ok(())
    }
}

pub type SharedVectorStore = Arc<dyn VectorStoreClient>;
