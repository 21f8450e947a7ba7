//! Process-wide configuration for Chronofact, read once at startup.
//!
//! Mirrors the `§6 Configuration` surface of the timeline pipeline: vector
//! store connection, embedder/generator model selection, request limits,
//! retrieval fusion weights, and memory decay parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod vector_store;
pub mod retrieval;
pub mod memory;

pub use memory::MemoryConfig;
pub use retrieval::RetrievalWeights;
pub use vector_store::{VectorStoreConfig, VectorStoreMode};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Root configuration object, constructed once in `main` and handed to
/// every component by `Arc` or by value (it is cheaply cloneable).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub vector_store: VectorStoreConfig,
    pub embedder: EmbedderConfig,
    pub generator: GeneratorConfig,
    pub limits: LimitsConfig,
    pub retrieval: RetrievalConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub text_model: String,
    pub multimodal_model: String,
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub request_deadline_ms: u64,
    pub llm_rate_per_min: u32,
    pub image_max_bytes: usize,
}

impl LimitsConfig {
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_deadline_ms: 30_000,
            llm_rate_per_min: 60,
            image_max_bytes: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    pub weights: RetrievalWeights,
    pub rrf_k: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            weights: RetrievalWeights::default(),
            rrf_k: 60,
        }
    }
}

impl AppConfig {
    /// Build configuration from the process environment, falling back to
    /// the defaults documented in §6 for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            vector_store: VectorStoreConfig::from_env()?,
            embedder: EmbedderConfig {
                text_model: env_or("EMBEDDER_TEXT_MODEL", "text-embedding-3-small"),
                multimodal_model: env_or("EMBEDDER_MULTIMODAL_MODEL", "clip-vit-b-32"),
            },
            generator: GeneratorConfig {
                provider: env_or("GENERATOR_PROVIDER", "openai"),
                model: env_or("GENERATOR_MODEL", "gpt-4o-mini"),
                api_key: std::env::var("GENERATOR_API_KEY").ok(),
            },
            limits: LimitsConfig {
                request_deadline_ms: env_parse_or("LIMITS_REQUEST_DEADLINE_MS", 30_000),
                llm_rate_per_min: env_parse_or("LIMITS_LLM_RATE_PER_MIN", 60),
                image_max_bytes: env_parse_or("LIMITS_IMAGE_MAX_BYTES", 8 * 1024 * 1024),
            },
            retrieval: RetrievalConfig {
                weights: RetrievalWeights::from_env(),
                rrf_k: env_parse_or("RETRIEVAL_RRF_K", 60),
            },
            memory: MemoryConfig::from_env(),
        })
    }
}

fn env_or(key: &'static str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &'static str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.request_deadline_ms, 30_000);
        assert_eq!(limits.image_max_bytes, 8 * 1024 * 1024);
    }
}