use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for the retrieval pipeline.
///
/// Every field has a default, so a config file only needs to name the values
/// it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// RRF smoothing constant. Larger values flatten rank influence.
    pub rrf_k: u32,
    /// Budget for a single backend call, including the wait for a worker.
    pub per_call_timeout_ms: u64,
    /// Hard ceiling on a whole search when the caller gives no timeout.
    pub overall_timeout_ms: u64,
    /// Budget for synthesizing a hypothetical answer.
    pub hypothetical_timeout_ms: u64,
    /// Budget for one cross-encoder scoring call.
    pub rerank_timeout_ms: u64,
    /// Number of calls allowed to run at once against each backend.
    pub max_workers: usize,
    /// How many expanded queries get their own vector search.
    pub expansion_probes: usize,
    /// Each strategy fetches `k * candidate_multiplier` candidates.
    pub candidate_multiplier: usize,
    /// The reranker looks at the top `k * rerank_factor` fused results.
    pub rerank_factor: usize,
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
    /// Bumped whenever the strategy mix changes so old cache entries miss.
    pub strategy_set_version: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60,
            per_call_timeout_ms: 1_500,
            overall_timeout_ms: 8_000,
            hypothetical_timeout_ms: 3_000,
            rerank_timeout_ms: 2_000,
            max_workers: 4,
            expansion_probes: 2,
            candidate_multiplier: 2,
            rerank_factor: 2,
            cache_capacity: 1_000,
            cache_ttl_secs: 86_400,
            strategy_set_version: 1,
        }
    }
}

impl EngineConfig {
    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.rrf_k == 0, "rrf_k must be positive"),
            (
                self.per_call_timeout_ms == 0,
                "per_call_timeout_ms must be positive",
            ),
            (
                self.overall_timeout_ms == 0,
                "overall_timeout_ms must be positive",
            ),
            (
                self.hypothetical_timeout_ms == 0,
                "hypothetical_timeout_ms must be positive",
            ),
            (
                self.rerank_timeout_ms == 0,
                "rerank_timeout_ms must be positive",
            ),
            (self.max_workers == 0, "max_workers must be positive"),
            (
                self.candidate_multiplier == 0,
                "candidate_multiplier must be positive",
            ),
            (self.rerank_factor == 0, "rerank_factor must be positive"),
            (self.cache_capacity == 0, "cache_capacity must be positive"),
            (self.cache_ttl_secs == 0, "cache_ttl_secs must be positive"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(Error::Config((*message).to_string())),
            None => Ok(()),
        }
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn hypothetical_timeout(&self) -> Duration {
        Duration::from_millis(self.hypothetical_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
