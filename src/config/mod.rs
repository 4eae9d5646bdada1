//! Configuration module for Trendcast.
//!
//! Structured configuration loaded from environment variables, organized
//! by concern: Artifacts, Inference, Explainability, Market Data and
//! Observability.

mod artifact_config;
mod explain_config;
mod inference_config;
mod market_data_config;
mod observability_config;
mod parse;

pub use artifact_config::ArtifactEnvConfig;
pub use explain_config::ExplainEnvConfig;
pub use inference_config::InferenceEnvConfig;
pub use market_data_config::{DataSource, MarketDataEnvConfig};
pub use observability_config::ObservabilityEnvConfig;

use anyhow::{Context, Result};

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub artifacts: ArtifactEnvConfig,
    pub inference: InferenceEnvConfig,
    pub explain: ExplainEnvConfig,
    pub market_data: MarketDataEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            artifacts: ArtifactEnvConfig::from_env().context("Failed to load artifact config")?,
            inference: InferenceEnvConfig::from_env()
                .context("Failed to load inference config")?,
            explain: ExplainEnvConfig::from_env().context("Failed to load explain config")?,
            market_data: MarketDataEnvConfig::from_env()
                .context("Failed to load market data config")?,
            observability: ObservabilityEnvConfig::from_env()
                .context("Failed to load observability config")?,
        })
    }
}
