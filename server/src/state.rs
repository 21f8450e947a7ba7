use std::sync::Arc;

use chronofact_config::AppConfig;
use chronofact_core::{
    EmbeddingProvider, HybridRetriever, ImageAnalyzer, MemoryEngine, OpenAiChatClient,
    OpenAiEmbeddingProvider, SharedVectorStore, StructuredGenerator, TimelinePipeline,
};

/// Process-wide application state handed to every handler via `web::Data`.
/// Construction order mirrors §5's "global mutable state is confined to
/// (a) the vector-store client handle, (b) the LLM rate limiter, (c)
/// configuration" — everything else here is a cheaply-cloned `Arc`.
pub struct AppState {
    pub config: AppConfig,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_store: SharedVectorStore,
    pub pipeline: TimelinePipeline<OpenAiChatClient>,
    pub memory: Arc<MemoryEngine>,
    pub generator: Arc<StructuredGenerator<OpenAiChatClient>>,
}

impl AppState {
    pub fn new(config: AppConfig, vector_store: SharedVectorStore) -> Self {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            OpenAiEmbeddingProvider::new(config.embedder.text_model.clone(), config.embedder.multimodal_model.clone(), 512)
                .expect("embedding provider requires OPENAI_API_KEY"),
        );

        let retriever = HybridRetriever::new(
            vector_store.clone(),
            embedder.clone(),
            config.retrieval.weights,
            config.retrieval.rrf_k,
        );

        let chat_client = OpenAiChatClient::new(
            config.generator.api_key.clone().unwrap_or_default(),
            config.generator.model.clone(),
        );
        let generator = Arc::new(StructuredGenerator::new(chat_client, config.limits.llm_rate_per_min));

        let image_analyzer = ImageAnalyzer::new(config.limits.image_max_bytes);

        let memory = Arc::new(
            MemoryEngine::new(vector_store.clone(), embedder.clone())
                .with_thresholds(config.memory.tau_delete, config.memory.reinforce_beta),
        );

        let pipeline = TimelinePipeline::new(
            retriever,
            generator.clone(),
            image_analyzer,
            memory.clone(),
            embedder.clone(),
            config.limits.request_deadline(),
        );

        Self { config, embedder, vector_store, pipeline, memory, generator }
    }
}
