mod handlers;
mod state;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use chronofact_config::{AppConfig, VectorStoreMode};
use chronofact_core::{
    EmbeddingProvider, InMemoryVectorStore, PayloadFieldKind, PayloadIndexSpec, QdrantVectorStore,
    SharedVectorStore, VectorSpec, VectorStoreClient, POSTS_COLLECTION,
};
use chronofact_middleware::{create_cors_middleware, create_request_logging};
use chronofact_observability::{init_tracing, TracingConfig};
use tracing::{error, info};

use state::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    init_tracing(TracingConfig::for_service("chronofact-server"));

    let config = AppConfig::from_env().map_err(|e| {
        error!(error = %e, "failed to load configuration");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let vector_store: SharedVectorStore = match config.vector_store.mode {
        VectorStoreMode::Memory => {
            info!("running with in-memory vector store");
            Arc::new(InMemoryVectorStore::new())
        }
        VectorStoreMode::Local | VectorStoreMode::Docker | VectorStoreMode::Cloud => {
            info!(url = %config.vector_store.url, "connecting to Qdrant");
            let client = QdrantVectorStore::new(&config.vector_store.url, config.vector_store.api_key.clone())
                .map_err(|e| {
                    error!(error = %e, "failed to connect to vector store");
                    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string())
                })?;
            Arc::new(client)
        }
    };

    let state = web::Data::new(AppState::new(config.clone(), vector_store));

    let text_dim = state.embedder.text_dimension();
    let mm_dim = state.embedder.multimodal_dimension();
    let post_vectors = [
        VectorSpec { name: "text".into(), dimension: text_dim },
        VectorSpec { name: "image".into(), dimension: mm_dim },
        VectorSpec { name: "multimodal".into(), dimension: mm_dim },
    ];
    let post_payload_indexes = [
        PayloadIndexSpec { field: "credibility_score".into(), kind: PayloadFieldKind::Float },
        PayloadIndexSpec { field: "location".into(), kind: PayloadFieldKind::Keyword },
        PayloadIndexSpec { field: "timestamp_unix".into(), kind: PayloadFieldKind::Integer },
    ];
    if let Err(e) = state
        .vector_store
        .ensure_collection(POSTS_COLLECTION, &post_vectors, &post_payload_indexes)
        .await
    {
        error!(error = %e, "x_posts collection check failed");
    }
    if let Err(e) = state.memory.ensure_collection().await {
        error!(error = %e, "memories collection check failed");
    }

    info!(port = 8080, "starting Chronofact server");

    // base64 inflates raw bytes by ~4/3; leave headroom for the rest of
    // the JSON envelope around `image_base64`.
    let json_limit = config.limits.image_max_bytes * 2;

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(json_limit))
            .wrap(create_cors_middleware())
            .wrap(create_request_logging())
            .configure(handlers::configure_routes)
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
