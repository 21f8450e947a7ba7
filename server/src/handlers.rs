use actix_web::{web, HttpResponse};
use chronofact_core::{PipelineError, TimelineRequest};
use chronofact_models::{FollowUpQuestion, MisinformationAnalysis};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    embedder_ready: bool,
    vector_store_ready: bool,
    generator_ready: bool,
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let vector_store_ready = state
        .vector_store
        .scroll(chronofact_core::POSTS_COLLECTION, None, None, 1)
        .await
        .is_ok();
    let embedder_ready = !state.config.generator.api_key.as_deref().unwrap_or_default().is_empty()
        || std::env::var("OPENAI_API_KEY").is_ok();
    let generator_ready = state.config.generator.api_key.is_some() || std::env::var("OPENAI_API_KEY").is_ok();

    let all_ready = embedder_ready && vector_store_ready && generator_ready;
    let body = HealthResponse {
        status: if all_ready { "ok" } else { "degraded" },
        embedder_ready,
        vector_store_ready,
        generator_ready,
    };

    if all_ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn timeline(
    state: web::Data<AppState>,
    request: web::Json<TimelineRequest>,
) -> Result<HttpResponse, PipelineError> {
    let response = state.pipeline.run(request.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub text: String,
    #[allow(dead_code)]
    pub author: Option<String>,
    #[allow(dead_code)]
    pub engagement: Option<serde_json::Value>,
}

pub async fn verify(
    state: web::Data<AppState>,
    request: web::Json<VerifyRequest>,
) -> Result<HttpResponse, PipelineError> {
    if request.text.trim().is_empty() {
        return Err(PipelineError::InvalidRequest("text must be non-empty".into()));
    }
    let assessment = state.pipeline.verify(&request.text, 10).await?;
    Ok(HttpResponse::Ok().json(assessment))
}

#[derive(Deserialize)]
pub struct DetectRequest {
    pub text: String,
}

pub async fn detect(
    state: web::Data<AppState>,
    request: web::Json<DetectRequest>,
) -> Result<HttpResponse, PipelineError> {
    if request.text.trim().is_empty() {
        return Err(PipelineError::InvalidRequest("text must be non-empty".into()));
    }
    let deadline = std::time::Instant::now() + state.config.limits.request_deadline();
    let analysis: MisinformationAnalysis = state
        .generator
        .detect_misinformation(&request.text, deadline)
        .await?;
    Ok(HttpResponse::Ok().json(analysis))
}

#[derive(Deserialize)]
pub struct FollowUpRequest {
    pub original_query: String,
    #[allow(dead_code)]
    pub timeline_topic: String,
    pub events_summary: Vec<String>,
    #[allow(dead_code)]
    pub avg_credibility: f64,
    #[allow(dead_code)]
    pub total_events: usize,
    #[allow(dead_code)]
    pub total_sources: usize,
    #[serde(default)]
    pub previous_questions: Vec<String>,
}

#[derive(Serialize)]
struct FollowUpResponse {
    query: String,
    count: usize,
    questions: Vec<FollowUpQuestion>,
}

pub async fn followup(
    state: web::Data<AppState>,
    request: web::Json<FollowUpRequest>,
) -> Result<HttpResponse, PipelineError> {
    if request.original_query.trim().is_empty() {
        return Err(PipelineError::InvalidRequest("original_query must be non-empty".into()));
    }
    let deadline = std::time::Instant::now() + state.config.limits.request_deadline();
    let summary = request.events_summary.join(" ");
    let questions = state
        .generator
        .generate_follow_up_questions(&request.original_query, &summary, &request.previous_questions, deadline)
        .await?;

    Ok(HttpResponse::Ok().json(FollowUpResponse {
        query: request.original_query.clone(),
        count: questions.len(),
        questions,
    }))
}

#[derive(Deserialize)]
pub struct RecommendRequest {
    pub query: String,
    #[serde(default = "default_recommend_limit")]
    pub limit: usize,
}

fn default_recommend_limit() -> usize {
    10
}

#[derive(Serialize)]
struct RecommendResponse {
    query: String,
    count: usize,
    recommendations: Vec<String>,
}

pub async fn recommend(
    state: web::Data<AppState>,
    request: web::Json<RecommendRequest>,
) -> Result<HttpResponse, PipelineError> {
    if request.query.trim().is_empty() {
        return Err(PipelineError::InvalidRequest("query must be non-empty".into()));
    }
    if !(1..=50).contains(&request.limit) {
        return Err(PipelineError::InvalidRequest("limit must be in 1..=50".into()));
    }
    let recommendations = state.pipeline.recommend(&request.query, request.limit).await?;

    Ok(HttpResponse::Ok().json(RecommendResponse {
        query: request.query.clone(),
        count: recommendations.len(),
        recommendations,
    }))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .service(
            web::scope("/api")
                .route("/timeline", web::post().to(timeline))
                .route("/verify", web::post().to(verify))
                .route("/detect", web::post().to(detect))
                .route("/followup", web::post().to(followup))
                .route("/recommend", web::post().to(recommend)),
        );
}
