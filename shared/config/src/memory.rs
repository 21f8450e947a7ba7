use serde::{Deserialize, Serialize};

/// Tunables for the memory evolution engine (§4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub decay_rate_interaction: f64,
    pub decay_rate_fact: f64,
    pub decay_rate_preference: f64,
    pub tau_delete: f64,
    pub reinforce_beta: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            decay_rate_interaction: 0.02,
            decay_rate_fact: 0.005,
            decay_rate_preference: 0.01,
            tau_delete: 0.2,
            reinforce_beta: 0.1,
        }
    }
}

impl MemoryConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            decay_rate_interaction: env_f64(
                "MEMORY_DECAY_RATE_INTERACTION",
                default.decay_rate_interaction,
            ),
            decay_rate_fact: env_f64("MEMORY_DECAY_RATE_FACT", default.decay_rate_fact),
            decay_rate_preference: env_f64(
                "MEMORY_DECAY_RATE_PREFERENCE",
                default.decay_rate_preference,
            ),
            tau_delete: env_f64("MEMORY_TAU_DELETE", default.tau_delete),
            reinforce_beta: env_f64("MEMORY_REINFORCE_BETA", default.reinforce_beta),
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
