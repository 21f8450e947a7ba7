//! Domain event logging for Chronofact services.
//!
//! Provides structured logging for pipeline-stage events with a consistent
//! schema, independent of the human-readable `tracing` spans emitted
//! alongside them.

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Result of a domain operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    Success,
    Failure,
    Partial,
    Skipped,
}

impl std::fmt::Display for OperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Partial => write!(f, "partial"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Categories of domain events for filtering and routing, one per
/// component from §2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Embedding,
    VectorStore,
    Retrieval,
    Generation,
    ImageAnalysis,
    Pipeline,
    Memory,
    Api,
    System,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::VectorStore => write!(f, "vector_store"),
            Self::Retrieval => write!(f, "retrieval"),
            Self::Generation => write!(f, "generation"),
            Self::ImageAnalysis => write!(f, "image_analysis"),
            Self::Pipeline => write!(f, "pipeline"),
            Self::Memory => write!(f, "memory"),
            Self::Api => write!(f, "api"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A structured domain event for logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,
    /// Category of the event
    pub category: EventCategory,
    /// Specific event type (e.g., "timeline_synthesized", "memory_decayed")
    pub event_type: String,
    /// Entity type being operated on (e.g., "post", "memory", "request")
    pub entity_type: Option<String>,
    /// Entity ID
    pub entity_id: Option<String>,
    /// Result of the operation
    pub result: OperationResult,
    /// Duration in milliseconds (if applicable)
    pub duration_ms: Option<u64>,
    /// Attempt number for retries
    pub attempt: Option<u32>,
    /// Error message if failed
    pub error: Option<String>,
    /// Trace context
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    /// Session this event belongs to, if any (memory engine)
    pub session_id: Option<String>,
    /// Service that emitted the event
    pub service: String,
    /// Additional structured metadata
    pub metadata: Option<serde_json::Value>,
}

impl DomainEvent {
    /// Create a new domain event builder
    pub fn new(service: impl Into<String>, category: EventCategory, event_type: impl Into<String>) -> DomainEventBuilder {
        DomainEventBuilder {
            service: service.into(),
            category,
            event_type: event_type.into(),
            entity_type: None,
            entity_id: None,
            result: OperationResult::Success,
            duration_ms: None,
            attempt: None,
            error: None,
            trace_id: None,
            span_id: None,
            session_id: None,
            metadata: None,
        }
    }
}

/// Builder for constructing domain events
pub struct DomainEventBuilder {
    service: String,
    category: EventCategory,
    event_type: String,
    entity_type: Option<String>,
    entity_id: Option<String>,
    result: OperationResult,
    duration_ms: Option<u64>,
    attempt: Option<u32>,
    error: Option<String>,
    trace_id: Option<String>,
    span_id: Option<String>,
    session_id: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl DomainEventBuilder {
    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn result(mut self, result: OperationResult) -> Self {
        self.result = result;
        self
    }

    pub fn success(mut self) -> Self {
        self.result = OperationResult::Success;
        self
    }

    pub fn partial(mut self) -> Self {
        self.result = OperationResult::Partial;
        self
    }

    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.result = OperationResult::Failure;
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build and emit the event as a log
    pub fn emit(self) {
        let event = self.build();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());

        match event.result {
            OperationResult::Success => tracing::info!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "success",
                "DomainEvent: {}", json
            ),
            OperationResult::Failure => tracing::error!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "failure",
                error = ?event.error,
                "DomainEvent: {}", json
            ),
            OperationResult::Partial => tracing::warn!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "partial",
                "DomainEvent: {}", json
            ),
            OperationResult::Skipped => tracing::debug!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "skipped",
                "DomainEvent: {}", json
            ),
        }
    }

    /// Build the event without emitting
    pub fn build(self) -> DomainEvent {
        DomainEvent {
            timestamp: Utc::now(),
            category: self.category,
            event_type: self.event_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            result: self.result,
            duration_ms: self.duration_ms,
            attempt: self.attempt,
            error: self.error,
            trace_id: self.trace_id,
            span_id: self.span_id,
            session_id: self.session_id,
            service: self.service,
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Convenience functions for common domain events
// ============================================================================

/// Log a retrieval query's fan-out completion (§4.3).
pub fn log_retrieval_executed(
    service: &str,
    result_count: usize,
    partial: bool,
    duration_ms: u64,
) {
    let mut builder = DomainEvent::new(service, EventCategory::Retrieval, "query_executed")
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({ "result_count": result_count, "partial": partial }));
    builder = if partial { builder.partial() } else { builder.success() };
    builder.emit();
}

/// Log a structured-generation call, including retry attempts (§4.4).
pub fn log_generation_attempt(
    service: &str,
    function: &str,
    attempt: u32,
    success: bool,
    duration_ms: u64,
    error: Option<&str>,
) {
    let mut builder = DomainEvent::new(service, EventCategory::Generation, function)
        .attempt(attempt)
        .duration_ms(duration_ms);
    builder = if success {
        builder.success()
    } else {
        builder.failure(error.unwrap_or("unknown"))
    };
    builder.emit();
}

/// Log a full timeline pipeline run reaching RESPONDED or FAILED (§4.6).
pub fn log_pipeline_completed(
    service: &str,
    request_id: Uuid,
    final_state: &str,
    duration_ms: u64,
    error: Option<&str>,
) {
    let mut builder = DomainEvent::new(service, EventCategory::Pipeline, "request_completed")
        .entity("request", request_id.to_string())
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({ "final_state": final_state }));
    builder = match error {
        Some(e) => builder.failure(e),
        None => builder.success(),
    };
    builder.emit();
}

/// Log a memory evolution engine sweep (§4.7 `apply_global_decay` / `consolidate_similar`).
pub fn log_memory_sweep(
    service: &str,
    operation: &str,
    affected_count: usize,
    duration_ms: u64,
) {
    DomainEvent::new(service, EventCategory::Memory, operation)
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({ "affected_count": affected_count }))
        .success()
        .emit();
}

/// Log a single memory reinforcement event (§4.7 `retrieve_and_reinforce`).
pub fn log_memory_reinforced(service: &str, session_id: &str, memory_id: Uuid, new_score: f64) {
    DomainEvent::new(service, EventCategory::Memory, "memory_reinforced")
        .entity("memory", memory_id.to_string())
        .session(session_id)
        .metadata(serde_json::json!({ "relevance_score": new_score }))
        .success()
        .emit();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_event_builder() {
        let event = DomainEvent::new("chronofact", EventCategory::Pipeline, "request_completed")
            .entity("request", "123")
            .duration_ms(100)
            .success()
            .build();

        assert_eq!(event.service, "chronofact");
        assert_eq!(event.event_type, "request_completed");
        assert_eq!(event.entity_id, Some("123".to_string()));
        assert_eq!(event.result, OperationResult::Success);
    }
}
