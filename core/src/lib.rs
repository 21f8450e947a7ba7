//! Chronofact's core pipeline: embedding, hybrid retrieval, structured
//! generation, image context analysis, orchestration, and per-session
//! memory evolution (§4 COMPONENT DESIGN, C1-C7).

pub mod embedding;
pub mod error;
pub mod generator;
pub mod image_analyzer;
pub mod memory;
pub mod payload;
pub mod pipeline;
pub mod retrieval;
pub mod vector_store;

pub use embedding::{EmbeddingProvider, MultimodalFusion, MultimodalInput, OpenAiEmbeddingProvider};
pub use error::{
    EmbeddingError, GeneratorError, PipelineError, PipelineResult, RetrievalError, VectorStoreError,
};
pub use generator::{ImageContext, LlmClient, OpenAiChatClient, StructuredGenerator};
pub use image_analyzer::ImageAnalyzer;
pub use memory::{MemoryEngine, MEMORIES_COLLECTION};
pub use pipeline::{TimelinePipeline, TimelineRequest, TimelineResponse};
pub use retrieval::{HybridRetriever, RetrievalOutcome, RetrievedPost, POSTS_COLLECTION};
pub use vector_store::{
    Filter, InMemoryVectorStore, PayloadFieldKind, PayloadIndexSpec, PointRecord, QdrantVectorStore,
    ScoredPoint, ScrollPage, SharedVectorStore, VectorSpec, VectorStoreClient,
};
