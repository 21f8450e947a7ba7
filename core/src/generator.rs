use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chronofact_models::{
    FollowUpQuestion, MisinformationAnalysis, Post, QueryPlan, Timeline,
};
use governor::{Quota, RateLimiter};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::GeneratorError;

type Limiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// Raw chat-completion transport, grounded on the teacher's
/// `client/src/agents/llm/openai.rs` reqwest-based client — a plain
/// system/user message pair, with an optional base64 image attached to
/// the user turn for the C5 multimodal path.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_prompt: &str, image_base64: Option<&str>) -> Result<String, GeneratorError>;
}

pub struct OpenAiChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChatClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model,
        }
    }

    /// Overrides the provider endpoint, used to point at a local stub in tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str, image_base64: Option<&str>) -> Result<String, GeneratorError> {
        let mut messages = vec![ChatMessage {
            role: "system".into(),
            content: serde_json::Value::String(system_prompt.to_string()),
        }];

        let user_content = match image_base64 {
            Some(image) => serde_json::json!([
                { "type": "text", "text": user_prompt },
                { "type": "image_url", "image_url": { "url": format!("data:image/jpeg;base64,{}", image) } },
            ]),
            None => serde_json::Value::String(user_prompt.to_string()),
        };
        messages.push(ChatMessage { role: "user".into(), content: user_content });

        let request = ChatRequest { model: self.model.clone(), messages, max_tokens: 2000 };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| GeneratorError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Provider(body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Provider(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| match c.message.content {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .ok_or_else(|| GeneratorError::Provider("no content in LLM response".into()))?;
        Ok(text)
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed)
}

/// Schema-constrained generation capability of §4.4: `generate(schema,
/// prompt_template, variables) → value conforming to schema`. The schema
/// is the caller's Rust type (`T: JsonSchema + DeserializeOwned`) — its
/// `schemars` description is embedded in the prompt, and successful
/// `serde_json` deserialization *is* the validation step.
pub struct StructuredGenerator<C: LlmClient> {
    client: C,
    limiter: Arc<Limiter>,
    max_retries: u32,
}

impl<C: LlmClient> StructuredGenerator<C> {
    pub fn new(client: C, requests_per_min: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_min.max(1)).unwrap());
        Self {
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
            max_retries: 2,
        }
    }

    /// Polls the token bucket with `check()` (the non-blocking probe the
    /// teacher's own rate limiter uses), backing off briefly between
    /// attempts, until a token is available or the deadline passes.
    async fn wait_for_rate_limit(&self, deadline: Instant) -> Result<(), GeneratorError> {
        const POLL_INTERVAL: Duration = Duration::from_millis(50);
        loop {
            if self.limiter.check().is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(GeneratorError::RateLimited);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }

    /// Generate a value of `T`, retrying on schema violation or semantic
    /// validation failure (`validate`) up to twice, appending the
    /// validator's message to the prompt each retry (§4.4 retry policy).
    pub async fn generate_validated<T, F>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        deadline: Instant,
        image_base64: Option<&str>,
        validate: F,
    ) -> Result<T, GeneratorError>
    where
        T: DeserializeOwned + JsonSchema,
        F: Fn(&T) -> Result<(), String>,
    {
        let schema = schemars::schema_for!(T);
        let schema_json = serde_json::to_string_pretty(&schema).unwrap_or_default();
        let schema_system_prompt = format!(
            "{system_prompt}\n\nRespond with a single JSON object only (no markdown fences, no prose) conforming to this JSON Schema:\n{schema_json}"
        );

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            let attempt_started = Instant::now();
            if Instant::now() >= deadline {
                return Err(GeneratorError::DeadlineExceeded);
            }
            self.wait_for_rate_limit(deadline).await?;

            let prompt = if attempt == 0 {
                user_prompt.to_string()
            } else {
                format!("{user_prompt}\n\nYour previous response was invalid: {last_error}\nFix it and respond again with valid JSON only.")
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GeneratorError::DeadlineExceeded);
            }
            let raw = match tokio::time::timeout(remaining, self.client.chat(&schema_system_prompt, &prompt, image_base64)).await {
                Ok(r) => r,
                Err(_) => return Err(GeneratorError::DeadlineExceeded),
            };
            let raw = match raw {
                Ok(r) => r,
                Err(GeneratorError::RateLimited) => return Err(GeneratorError::RateLimited),
                Err(e) => {
                    last_error = e.to_string();
                    chronofact_observability::log_generation_attempt(
                        "chronofact-core",
                        "generate_validated",
                        attempt,
                        false,
                        attempt_started.elapsed().as_millis() as u64,
                        Some(&last_error),
                    );
                    continue;
                }
            };

            let candidate = strip_code_fence(&raw);
            match serde_json::from_str::<T>(candidate) {
                Ok(value) => match validate(&value) {
                    Ok(()) => {
                        chronofact_observability::log_generation_attempt(
                            "chronofact-core",
                            "generate_validated",
                            attempt,
                            true,
                            attempt_started.elapsed().as_millis() as u64,
                            None,
                        );
                        return Ok(value);
                    }
                    Err(msg) => last_error = msg,
                },
                Err(e) => last_error = e.to_string(),
            }
            chronofact_observability::log_generation_attempt(
                "chronofact-core",
                "generate_validated",
                attempt,
                false,
                attempt_started.elapsed().as_millis() as u64,
                Some(&last_error),
            );
        }

        Err(GeneratorError::SchemaViolation(last_error))
    }

    pub async fn generate<T>(&self, system_prompt: &str, user_prompt: &str, deadline: Instant) -> Result<T, GeneratorError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        self.generate_validated(system_prompt, user_prompt, deadline, None, |_| Ok(())).await
    }
}

const PROCESS_QUERY_SYSTEM: &str = "You are the query interpreter for a fact-grounded timeline construction service. \
Extract search entities, locations, and a time range from the user's topic, and refine it into a clean search string.";

const GENERATE_TIMELINE_SYSTEM: &str = "You synthesize a chronologically-ordered, source-cited timeline from the provided \
context posts. Only use facts present in the provided context; do not invent sources or events not supported by it.";

const DETECT_MISINFORMATION_SYSTEM: &str = "You assess a piece of text for misinformation risk, flagging suspicious \
patterns such as unverifiable claims, emotional manipulation, or contradictions with known facts.";

const FOLLOW_UP_SYSTEM: &str = "You generate insightful follow-up questions a reader might ask after seeing a \
synthesized timeline, spanning deeper investigation, related topics, verification, prediction, and comparison angles.";

impl<C: LlmClient> StructuredGenerator<C> {
    /// `ProcessQuery(raw_query) → QueryPlan` (§4.4.1). No retrieved
    /// context is required — this stage only interprets the request.
    pub async fn process_query(&self, raw_query: &str, deadline: Instant) -> Result<QueryPlan, GeneratorError> {
        let user_prompt = format!("User topic: {raw_query}");
        self.generate(PROCESS_QUERY_SYSTEM, &user_prompt, deadline).await
    }

    /// `GenerateTimeline(query, context_posts, n) → Timeline` (§4.4.2).
    /// Enforces groundedness (reject events citing sources outside
    /// `context_posts`) during the retry loop, then recomputes each
    /// event's `credibility_score` as the mean of its cited posts'
    /// scores (the derived-mean interpretation, see DESIGN.md) and
    /// sorts/truncates to the valid event-count range.
    pub async fn generate_timeline(
        &self,
        query: &str,
        context_posts: &[Post],
        n: usize,
        deadline: Instant,
    ) -> Result<Timeline, GeneratorError> {
        let context_block = context_posts
            .iter()
            .map(|p| {
                format!(
                    "- id={} author={} timestamp={} credibility={:.2} text={}",
                    p.post_id, p.author, p.timestamp.to_rfc3339(), p.credibility_score, p.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let user_prompt = format!(
            "Query: {query}\nProduce {n} timeline events grounded ONLY in the following context posts:\n{context_block}"
        );

        let valid_ids: std::collections::HashSet<_> = context_posts.iter().map(|p| p.post_id).collect();

        let mut timeline: Timeline = self
            .generate_validated(GENERATE_TIMELINE_SYSTEM, &user_prompt, deadline, None, |timeline: &Timeline| {
                for event in &timeline.events {
                    for source in &event.sources {
                        if !valid_ids.contains(source) {
                            return Err(format!("event cites unknown source id {source}"));
                        }
                    }
                }
                Ok(())
            })
            .await?;

        let credibility_by_id: std::collections::HashMap<_, _> =
            context_posts.iter().map(|p| (p.post_id, p.credibility_score)).collect();

        for event in &mut timeline.events {
            let scores: Vec<f64> = event
                .sources
                .iter()
                .filter_map(|id| credibility_by_id.get(id).copied())
                .collect();
            let mean = if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            };
            event.credibility_score = mean.clamp(0.0, 1.0) as f32;
        }

        timeline.events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let max_events = n.max(context_posts.len());
        if timeline.events.len() > max_events {
            timeline.events.truncate(max_events);
        }

        Ok(timeline)
    }

    /// `DetectMisinformation(text) → MisinformationAnalysis` (§4.4.3).
    pub async fn detect_misinformation(&self, text: &str, deadline: Instant) -> Result<MisinformationAnalysis, GeneratorError> {
        let user_prompt = format!("Text to assess: {text}");
        self.generate(DETECT_MISINFORMATION_SYSTEM, &user_prompt, deadline).await
    }

    /// `GenerateFollowUpQuestions(original_query, timeline_summary,
    /// prior_questions?) → FollowUpQuestion[]` (§4.4.4). Rejects (and
    /// retries) any response repeating a prior question case-insensitively
    /// and trimmed.
    pub async fn generate_follow_up_questions(
        &self,
        original_query: &str,
        timeline_summary: &str,
        prior_questions: &[String],
        deadline: Instant,
    ) -> Result<Vec<FollowUpQuestion>, GeneratorError> {
        let prior_block = if prior_questions.is_empty() {
            "(none)".to_string()
        } else {
            prior_questions.join("; ")
        };
        let user_prompt = format!(
            "Original query: {original_query}\nTimeline summary: {timeline_summary}\nQuestions already asked (do not repeat): {prior_block}\n\
             Respond with a JSON array of follow-up question objects."
        );

        let prior_normalized: std::collections::HashSet<String> =
            prior_questions.iter().map(|q| q.trim().to_lowercase()).collect();

        #[derive(Deserialize, JsonSchema)]
        struct FollowUpQuestions(Vec<FollowUpQuestion>);

        let result = self
            .generate_validated(FOLLOW_UP_SYSTEM, &user_prompt, deadline, None, |questions: &FollowUpQuestions| {
                for q in &questions.0 {
                    let normalized = q.question.trim().to_lowercase();
                    if prior_normalized.contains(&normalized) {
                        return Err(format!("question repeats a prior question: {}", q.question));
                    }
                }
                Ok(())
            })
            .await?;

        Ok(result.0)
    }

    /// C5's fixed-schema visual-context extraction, invoked by
    /// `image_analyzer` with the raw image bytes base64-encoded.
    pub async fn analyze_image(&self, topic: &str, image_base64: &str, deadline: Instant) -> Result<ImageContext, GeneratorError> {
        let system = "You describe the visually relevant context of an image for a fact-grounded timeline about the given topic.";
        let user_prompt = format!("Topic: {topic}\nDescribe the visual context relevant to this topic.");
        self.generate_validated(system, &user_prompt, deadline, Some(image_base64), |_: &ImageContext| Ok(()))
            .await
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ImageContext {
    pub visual_context: String,
    #[serde(default)]
    pub entities: Vec<String>,
}

pub fn encode_image_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        responses: Vec<String>,
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat(&self, _system_prompt: &str, _user_prompt: &str, _image_base64: Option<&str>) -> Result<String, GeneratorError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(idx)
                .cloned()
                .ok_or_else(|| GeneratorError::Provider("no more scripted responses".into()))
        }
    }

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Dummy {
        value: u32,
    }

    #[tokio::test]
    async fn retries_on_invalid_json_then_succeeds() {
        let client = ScriptedClient {
            responses: vec!["not json".into(), "also not json".into(), r#"{"value": 42}"#.into()],
            call_count: AtomicUsize::new(0),
        };
        let generator = StructuredGenerator::new(client, 1000);
        let deadline = Instant::now() + Duration::from_secs(5);
        let result: Dummy = generator.generate("sys", "user", deadline).await.unwrap();
        assert_eq!(result, Dummy { value: 42 });
    }

    #[tokio::test]
    async fn fails_with_schema_violation_after_three_bad_responses() {
        let client = ScriptedClient {
            responses: vec!["bad".into(), "bad".into(), "bad".into()],
            call_count: AtomicUsize::new(0),
        };
        let generator = StructuredGenerator::new(client, 1000);
        let deadline = Instant::now() + Duration::from_secs(5);
        let result: Result<Dummy, _> = generator.generate("sys", "user", deadline).await;
        assert!(matches!(result, Err(GeneratorError::SchemaViolation(_))));
    }

    #[tokio::test]
    async fn deadline_exceeded_before_first_attempt() {
        let client = ScriptedClient { responses: vec![], call_count: AtomicUsize::new(0) };
        let generator = StructuredGenerator::new(client, 1000);
        let deadline = Instant::now() - Duration::from_millis(1);
        let result: Result<Dummy, _> = generator.generate("sys", "user", deadline).await;
        assert!(matches!(result, Err(GeneratorError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn openai_chat_client_parses_successful_completion() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/chat/completions"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": r#"{"value": 7}"# } }]
            })))
            .mount(&server)
            .await;

        let client = OpenAiChatClient::new("test-key".into(), "gpt-4o".into()).with_base_url(server.uri());
        let reply = client.chat("sys", "user", None).await.unwrap();
        assert_eq!(reply, r#"{"value": 7}"#);
    }

    #[tokio::test]
    async fn openai_chat_client_surfaces_provider_error_body() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/chat/completions"))
            .respond_with(wiremock::ResponseTemplate::new(429).set_body_string("rate limited upstream"))
            .mount(&server)
            .await;

        let client = OpenAiChatClient::new("test-key".into(), "gpt-4o".into()).with_base_url(server.uri());
        let err = client.chat("sys", "user", None).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Provider(msg) if msg.contains("rate limited upstream")));
    }
}
