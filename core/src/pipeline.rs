use std::sync::Arc;
use std::time::{Duration, Instant};

use chronofact_models::{
    FollowUpQuestion, MemoryType, MisinformationAnalysis, Post, QueryPlan, Timeline,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embedding::{EmbeddingProvider, MultimodalFusion, MultimodalInput};
use crate::error::{EmbeddingError, PipelineError, PipelineResult};
use crate::generator::{ImageContext, LlmClient, StructuredGenerator};
use crate::image_analyzer::ImageAnalyzer;
use crate::memory::MemoryEngine;
use crate::retrieval::HybridRetriever;

/// §6 `/api/timeline` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineRequest {
    pub topic: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub location: Option<String>,
    #[serde(default = "default_min_credibility")]
    pub min_credibility: f32,
    #[serde(default)]
    pub include_media_only: bool,
    pub image_base64: Option<String>,
    /// Carries the session across requests for C7 memory continuity;
    /// not part of the wire schema table but required to address memories.
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default)]
    pub previous_questions: Vec<String>,
}

fn default_limit() -> usize {
    10
}
fn default_min_credibility() -> f32 {
    0.3
}
fn default_session_id() -> String {
    "anonymous".to_string()
}

impl TimelineRequest {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let has_topic = self.topic.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_image = self.image_base64.is_some();
        if !has_topic && !has_image {
            return Err(PipelineError::InvalidRequest(
                "topic must be non-empty or image_base64 must be present".into(),
            ));
        }
        if !(1..=50).contains(&self.limit) {
            return Err(PipelineError::InvalidRequest("limit must be in 1..=50".into()));
        }
        if !(0.0..=1.0).contains(&self.min_credibility) {
            return Err(PipelineError::InvalidRequest("min_credibility must be in 0.0..=1.0".into()));
        }
        Ok(())
    }
}

/// §6 `/api/timeline` response body.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineResponse {
    pub topic: String,
    pub events: Vec<chronofact_models::Event>,
    pub predictions: Vec<String>,
    pub total_sources: usize,
    pub avg_credibility: f64,
    pub misinformation: Option<MisinformationAnalysis>,
    pub follow_ups: Option<Vec<FollowUpQuestion>>,
}

impl TimelineResponse {
    fn empty(topic: String) -> Self {
        Self {
            topic,
            events: Vec::new(),
            predictions: Vec::new(),
            total_sources: 0,
            avg_credibility: 0.0,
            misinformation: None,
            follow_ups: None,
        }
    }
}

/// C6 — the orchestrator. Turns a `TimelineRequest` into a
/// `TimelineResponse` within a per-request deadline, sequencing the
/// state machine of §4.6 across C1-C5 and C7.
pub struct TimelinePipeline<C: LlmClient> {
    retriever: HybridRetriever,
    generator: Arc<StructuredGenerator<C>>,
    image_analyzer: ImageAnalyzer,
    memory: Arc<MemoryEngine>,
    embedder: Arc<dyn EmbeddingProvider>,
    request_deadline: Duration,
}

impl<C: LlmClient> TimelinePipeline<C> {
    pub fn new(
        retriever: HybridRetriever,
        generator: Arc<StructuredGenerator<C>>,
        image_analyzer: ImageAnalyzer,
        memory: Arc<MemoryEngine>,
        embedder: Arc<dyn EmbeddingProvider>,
        request_deadline: Duration,
    ) -> Self {
        Self { retriever, generator, image_analyzer, memory, embedder, request_deadline }
    }

    pub async fn run(&self, request: TimelineRequest) -> PipelineResult<TimelineResponse> {
        let request_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        let result = self.run_inner(request).await;

        let (final_state, error) = match &result {
            Ok(response) if response.events.is_empty() => ("EMPTY", None),
            Ok(_) => ("RESPONDED", None),
            Err(err) => ("FAILED", Some(err.to_string())),
        };
        chronofact_observability::log_pipeline_completed(
            "chronofact-core",
            request_id,
            final_state,
            started.elapsed().as_millis() as u64,
            error.as_deref(),
        );

        result
    }

    async fn run_inner(&self, request: TimelineRequest) -> PipelineResult<TimelineResponse> {
        request.validate()?;
        let deadline = Instant::now() + self.request_deadline;
        let raw_query = request.topic.clone().unwrap_or_default();
        let session_id = request.session_id.clone();

        // ACCEPTED -> [IMAGE_ANALYZED] -> QUERY_INTERPRETED
        let mut effective_query = raw_query.clone();
        let mut image_context: Option<ImageContext> = None;
        if let Some(image_base64) = &request.image_base64 {
            use base64::Engine as _;
            let image_bytes = base64::engine::general_purpose::STANDARD
                .decode(image_base64)
                .map_err(|e| PipelineError::InvalidRequest(format!("invalid image_base64: {e}")))?;
            let context = self
                .image_analyzer
                .analyze(self.generator.as_ref(), &raw_query, &image_bytes, deadline)
                .await?;
            effective_query = ImageAnalyzer::fold_into_query(&raw_query, &context);
            image_context = Some(context);
        }

        if Instant::now() >= deadline {
            return Err(PipelineError::DeadlineExceeded);
        }

        let mut plan = match self.generator.process_query(&effective_query, deadline).await {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "ProcessQuery failed, falling back to trivial query plan");
                QueryPlan {
                    refined_text: raw_query.clone(),
                    entities: Vec::new(),
                    locations: request.location.clone().map(|l| vec![l]),
                    time_range: None,
                    min_credibility: request.min_credibility,
                    limit: request.limit,
                    image_vector: None,
                }
            }
        };

        if let Some(context) = &image_context {
            match self.compute_multimodal_vector(context, &plan.refined_text).await {
                Ok(vector) => plan.image_vector = Some(vector),
                Err(err) => warn!(error = %err, "multimodal fusion failed, continuing without a multimodal vector"),
            }
        }

        // QUERY_INTERPRETED -> RETRIEVED, with the zero-min-credibility
        // retry-once-if-empty recovery policy.
        let mut outcome = self.retriever.retrieve(&plan, deadline).await?;
        if outcome.results.is_empty() && plan.min_credibility > 0.0 {
            let relaxed = QueryPlan { min_credibility: 0.0, ..plan.clone() };
            outcome = self.retriever.retrieve(&relaxed, deadline).await?;
        }
        if outcome.results.is_empty() {
            return Ok(TimelineResponse::empty(raw_query));
        }

        let retrieved_posts: Vec<Post> = outcome.results.iter().map(|r| r.post.clone()).collect();
        let retrieved_ids: Vec<_> = retrieved_posts.iter().map(|p| p.post_id).collect();

        // Fire-and-forget reinforcement (§5: bounded queue, drop-oldest on
        // overflow in a full deployment; inline await here since the core
        // has no background executor of its own to hand this off to).
        if let Ok(mut vectors) = self.embedder.embed_text(std::slice::from_ref(&plan.refined_text)).await {
            if let Some(query_vector) = vectors.pop() {
                let _ = self
                    .memory
                    .retrieve_and_reinforce(&session_id, &query_vector, retrieved_ids.len().max(1), 0.0)
                    .await;
            }
        }

        if Instant::now() >= deadline {
            return Err(PipelineError::DeadlineExceeded);
        }

        // RETRIEVED -> TIMELINE_SYNTHESIZED
        let timeline: Timeline = self
            .generator
            .generate_timeline(&plan.refined_text, &retrieved_posts, request.limit, deadline)
            .await?;

        let total_sources = retrieved_posts.len();
        let avg_credibility = if timeline.events.is_empty() {
            0.0
        } else {
            timeline.events.iter().map(|e| e.credibility_score as f64).sum::<f64>() / timeline.events.len() as f64
        };

        // TIMELINE_SYNTHESIZED -> ANALYZED: parallel, independent-failure.
        let timeline_summary = summarize_timeline(&timeline);
        let (misinfo, follow_ups) = tokio::join!(
            self.generator.detect_misinformation(&raw_query, deadline),
            self.generator.generate_follow_up_questions(
                &raw_query,
                &timeline_summary,
                &request.previous_questions,
                deadline,
            ),
        );

        let misinformation = match misinfo {
            Ok(analysis) => Some(analysis),
            Err(err) => {
                warn!(error = %err, "DetectMisinformation failed, degrading to null field");
                None
            }
        };
        let follow_ups = match follow_ups {
            Ok(questions) => Some(questions),
            Err(err) => {
                warn!(error = %err, "GenerateFollowUpQuestions failed, degrading to null field");
                None
            }
        };

        // ANALYZED -> RESPONDED
        let response = TimelineResponse {
            topic: raw_query.clone(),
            events: timeline.events,
            predictions: timeline.predictions,
            total_sources,
            avg_credibility,
            misinformation,
            follow_ups,
        };

        if let Err(err) = self.emit_interaction_memory(&session_id, &raw_query, &response).await {
            warn!(error = %err, "failed to persist interaction memory, continuing");
        }

        info!(topic = %raw_query, events = response.events.len(), "timeline request responded");
        Ok(response)
    }

    /// `/api/verify` (§6): assesses a standalone claim against the
    /// collection, rather than synthesizing a full timeline. Supporting
    /// vs. contradicting posts are split on the derived-mean credibility
    /// threshold (§9's derived-mean interpretation, applied here to a
    /// retrieval set instead of an LLM-cited event).
    pub async fn verify(&self, text: &str, limit: usize) -> PipelineResult<chronofact_models::CredibilityAssessment> {
        let deadline = Instant::now() + self.request_deadline;
        let plan = self.interpret_query(text, limit, deadline).await;
        let outcome = self.retriever.retrieve(&plan, deadline).await?;

        let credibility_score = if outcome.results.is_empty() {
            0.0
        } else {
            outcome.results.iter().map(|r| r.post.credibility_score as f32).sum::<f32>() / outcome.results.len() as f32
        };

        let (supporting_posts, contradicting_posts): (Vec<_>, Vec<_>) = outcome
            .results
            .iter()
            .map(|r| (r.post.post_id, r.post.credibility_score))
            .partition(|(_, score)| *score >= 0.5);

        let misinformation = self.generator.detect_misinformation(text, deadline).await.ok();

        Ok(chronofact_models::CredibilityAssessment {
            claim: text.to_string(),
            credibility_score,
            supporting_posts: supporting_posts.into_iter().map(|(id, _)| id).collect(),
            contradicting_posts: contradicting_posts.into_iter().map(|(id, _)| id).collect(),
            misinformation,
        })
    }

    /// `/api/recommend` (§6): a retrieval-only sibling of the full
    /// timeline pipeline, kept distinct from follow-up questions per
    /// §9's open-question decision (both operations overlap in spirit
    /// but are not unified here without product input).
    pub async fn recommend(&self, query: &str, limit: usize) -> PipelineResult<Vec<String>> {
        let deadline = Instant::now() + self.request_deadline;
        let plan = self.interpret_query(query, limit, deadline).await;
        let outcome = self.retriever.retrieve(&plan, deadline).await?;
        Ok(outcome
            .results
            .into_iter()
            .map(|r| format!("{}: {}", r.post.author, r.post.text))
            .collect())
    }

    async fn interpret_query(&self, raw_query: &str, limit: usize, deadline: Instant) -> QueryPlan {
        match self.generator.process_query(raw_query, deadline).await {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "ProcessQuery failed, falling back to trivial query plan");
                QueryPlan {
                    refined_text: raw_query.to_string(),
                    entities: Vec::new(),
                    locations: None,
                    time_range: None,
                    min_credibility: 0.0,
                    limit,
                    image_vector: None,
                }
            }
        }
    }

    /// Fuses the image's visual-context description and the refined
    /// query text into a single multimodal-dimension vector (§4.5 step
    /// 4's `using=multimodal` sub-query), by embedding both as text into
    /// the multimodal vector space and averaging.
    async fn compute_multimodal_vector(&self, context: &ImageContext, query_text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text_vector = self.embedder.embed_multimodal_text(query_text).await?;
        let image_vector = self.embedder.embed_multimodal_text(&context.visual_context).await?;
        self.embedder.embed_multimodal(
            MultimodalInput { text_vector: Some(&text_vector), image_vector: Some(&image_vector) },
            MultimodalFusion::Mean,
        )
    }

    async fn emit_interaction_memory(
        &self,
        session_id: &str,
        raw_query: &str,
        response: &TimelineResponse,
    ) -> Result<(), crate::error::EmbeddingError> {
        let top_summaries: Vec<String> = response.events.iter().take(3).map(|e| e.summary.clone()).collect();
        let content = format!("query: {raw_query} | top events: {}", top_summaries.join(" / "));
        self.memory.store(session_id, &content, MemoryType::Interaction).await?;
        Ok(())
    }
}

fn summarize_timeline(timeline: &Timeline) -> String {
    timeline
        .events
        .iter()
        .map(|e| e.summary.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_topic_and_no_image() {
        let request = TimelineRequest {
            topic: Some("   ".into()),
            limit: 10,
            location: None,
            min_credibility: 0.3,
            include_media_only: false,
            image_base64: None,
            session_id: "s1".into(),
            previous_questions: vec![],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn validate_accepts_image_only_request() {
        let request = TimelineRequest {
            topic: None,
            limit: 10,
            location: None,
            min_credibility: 0.3,
            include_media_only: false,
            image_base64: Some("Zm9v".into()),
            session_id: "s1".into(),
            previous_questions: vec![],
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_limit() {
        let request = TimelineRequest {
            topic: Some("floods".into()),
            limit: 0,
            location: None,
            min_credibility: 0.3,
            include_media_only: false,
            image_base64: None,
            session_id: "s1".into(),
            previous_questions: vec![],
        };
        assert!(request.validate().is_err());
    }
}
