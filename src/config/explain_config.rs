//! Explainability configuration parsing from environment variables.

use super::parse::parse;
use crate::application::explainability::estimator::EstimatorBudget;
use anyhow::Result;

/// Explainability environment configuration
#[derive(Debug, Clone)]
pub struct ExplainEnvConfig {
    /// Leading training sequences used as the attribution background.
    pub background_samples: usize,
    pub permutations: usize,
    pub background_rows: usize,
    pub timestep_group: usize,
    pub seed: u64,
    pub cache_ttl_seconds: u64,
}

impl ExplainEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            background_samples: parse("EXPLAIN_BACKGROUND_SAMPLES", 100usize)?,
            permutations: parse("EXPLAIN_PERMUTATIONS", 4usize)?,
            background_rows: parse("EXPLAIN_BACKGROUND_ROWS", 8usize)?,
            timestep_group: parse("EXPLAIN_TIMESTEP_GROUP", 12usize)?,
            seed: parse("EXPLAIN_SEED", 42u64)?,
            cache_ttl_seconds: parse("EXPLAIN_CACHE_TTL_SECONDS", 3600u64)?,
        })
    }

    pub fn budget(&self) -> EstimatorBudget {
        EstimatorBudget {
            permutations: self.permutations,
            background_rows: self.background_rows,
            timestep_group: self.timestep_group,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explain_config_defaults() {
        let config = ExplainEnvConfig::from_env().unwrap();
        assert_eq!(config.background_samples, 100);
        assert_eq!(config.budget(), EstimatorBudget::default());
    }
}
