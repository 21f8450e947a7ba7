use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Deployment mode for the backing vector store, mirrors the `memory`
/// (in-process, used by tests), `local`/`docker` (self-hosted Qdrant), and
/// `cloud` (managed Qdrant Cloud) modes from §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreMode {
    Memory,
    Local,
    Docker,
    Cloud,
}

impl std::str::FromStr for VectorStoreMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "local" => Ok(Self::Local),
            "docker" => Ok(Self::Docker),
            "cloud" => Ok(Self::Cloud),
            other => Err(ConfigError::InvalidValue {
                field: "vector_store.mode",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub mode: VectorStoreMode,
    pub url: String,
    pub api_key: Option<String>,
    pub storage_path: Option<String>,
}

impl VectorStoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = std::env::var("VECTOR_STORE_MODE")
            .ok()
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(VectorStoreMode::Memory);

        Ok(Self {
            mode,
            url: std::env::var("VECTOR_STORE_URL")
                .unwrap_or_else(|_| "http://localhost:6334".to_string()),
            api_key: std::env::var("VECTOR_STORE_API_KEY").ok(),
            storage_path: std::env::var("VECTOR_STORE_STORAGE_PATH").ok(),
        })
    }
}
