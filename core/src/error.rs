use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

/// Error kinds raised by individual components (§4.1-4.7). Narrow on
/// purpose: each component only produces the kinds it can actually fail
/// with, and `PipelineError` widens at the C6 orchestration boundary.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embed_multimodal requires at least one modality")]
    NoModalitySupplied,
}

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    #[error("collection not found: {0}")]
    NotFound(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("connection pool saturated")]
    Busy,
}

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("all retrieval sub-queries failed")]
    Unavailable,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("schema violation after retries: {0}")]
    SchemaViolation(String),
    #[error("llm rate limit exhausted past deadline")]
    RateLimited,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Top-level error kind surfaced to the HTTP boundary (§7). Each variant
/// maps deterministically to one status code in `chronofact-server`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("request failed validation: {0}")]
    InvalidRequest(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("retrieval unavailable")]
    RetrievalUnavailable,
    #[error("backend busy")]
    BackendBusy,
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("rate limited")]
    RateLimited,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Stable machine-readable tag, used in the HTTP error body and in
    /// logs, independent of the human-readable `Display` message.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidRequest(_) => "ErrInvalidRequest",
            PipelineError::PayloadTooLarge(_) => "ErrPayloadTooLarge",
            PipelineError::EmbeddingUnavailable(_) => "ErrEmbeddingUnavailable",
            PipelineError::RetrievalUnavailable => "ErrRetrievalUnavailable",
            PipelineError::BackendBusy => "ErrBackendBusy",
            PipelineError::SchemaViolation(_) => "ErrSchemaViolation",
            PipelineError::RateLimited => "ErrRateLimited",
            PipelineError::DeadlineExceeded => "ErrDeadlineExceeded",
            PipelineError::Internal(_) => "ErrInternal",
        }
    }
}

impl From<EmbeddingError> for PipelineError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Unavailable(msg) => PipelineError::EmbeddingUnavailable(msg),
            EmbeddingError::NoModalitySupplied => {
                PipelineError::InvalidRequest("no modality supplied to embed_multimodal".into())
            }
        }
    }
}

impl From<VectorStoreError> for PipelineError {
    fn from(err: VectorStoreError) -> Self {
        match err {
            VectorStoreError::Busy => PipelineError::BackendBusy,
            VectorStoreError::Unavailable(msg) => {
                tracing::warn!(detail = %msg, "vector store unavailable");
                PipelineError::RetrievalUnavailable
            }
            VectorStoreError::NotFound(msg) => PipelineError::Internal(msg),
            VectorStoreError::SchemaMismatch(msg) => PipelineError::Internal(msg),
        }
    }
}

impl From<RetrievalError> for PipelineError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Unavailable => PipelineError::RetrievalUnavailable,
            RetrievalError::DeadlineExceeded => PipelineError::DeadlineExceeded,
        }
    }
}

impl From<GeneratorError> for PipelineError {
    fn from(err: GeneratorError) -> Self {
        match err {
            GeneratorError::SchemaViolation(msg) => PipelineError::SchemaViolation(msg),
            GeneratorError::RateLimited => PipelineError::RateLimited,
            GeneratorError::DeadlineExceeded => PipelineError::DeadlineExceeded,
            GeneratorError::Provider(msg) => PipelineError::Internal(msg),
        }
    }
}

impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PipelineError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            PipelineError::EmbeddingUnavailable(_) => StatusCode::BAD_GATEWAY,
            PipelineError::RetrievalUnavailable => StatusCode::BAD_GATEWAY,
            PipelineError::BackendBusy => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::SchemaViolation(_) => StatusCode::BAD_GATEWAY,
            PipelineError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
