//! Inference and request-handling configuration parsing from environment
//! variables.

use super::parse::parse;
use anyhow::Result;
use std::time::Duration;

/// Inference environment configuration
#[derive(Debug, Clone)]
pub struct InferenceEnvConfig {
    /// Requests allowed to run model code at the same time.
    pub max_concurrent: usize,
    pub timeout_ms: u64,
    pub forecast_cache_ttl_seconds: u64,
    pub comparison_cache_ttl_seconds: u64,
    pub cache_max_entries: usize,
}

impl InferenceEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_concurrent: parse("INFERENCE_MAX_CONCURRENT", 4usize)?.max(1),
            timeout_ms: parse("INFERENCE_TIMEOUT_MS", 30_000u64)?,
            forecast_cache_ttl_seconds: parse("FORECAST_CACHE_TTL_SECONDS", 3600u64)?,
            comparison_cache_ttl_seconds: parse("COMPARISON_CACHE_TTL_SECONDS", 3600u64)?,
            cache_max_entries: parse("CACHE_MAX_ENTRIES", 1024usize)?,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_config_defaults() {
        let config = InferenceEnvConfig::from_env().unwrap();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.forecast_cache_ttl_seconds, 3600);
    }
}
