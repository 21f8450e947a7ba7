use serde::{Deserialize, Serialize};

/// Fusion weights for the hybrid retriever (§4.3 step 5). Must not be
/// required to sum to 1 — they are applied to already-normalized
/// per-list scores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalWeights {
    pub w_d: f32,
    pub w_s: f32,
    pub w_m: f32,
    pub w_c: f32,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            w_d: 0.55,
            w_s: 0.25,
            w_m: 0.15,
            w_c: 0.05,
        }
    }
}

impl RetrievalWeights {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            w_d: env_f32("RETRIEVAL_WEIGHT_DENSE", default.w_d),
            w_s: env_f32("RETRIEVAL_WEIGHT_SPARSE", default.w_s),
            w_m: env_f32("RETRIEVAL_WEIGHT_MULTIMODAL", default.w_m),
            w_c: env_f32("RETRIEVAL_WEIGHT_CREDIBILITY", default.w_c),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
