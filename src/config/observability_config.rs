//! Observability configuration parsing from environment variables.
//!
//! This module handles loading monitoring and metrics configuration.

use super::parse::{parse, parse_bool};
use anyhow::Result;

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    /// Seconds between `METRICS_JSON` snapshots.
    pub report_interval_seconds: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_seconds: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: parse_bool("OBSERVABILITY_ENABLED", true),
            report_interval_seconds: parse("METRICS_REPORT_INTERVAL_SECONDS", 60u64)?,
        })
    }
}
