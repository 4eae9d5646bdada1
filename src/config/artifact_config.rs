//! Artifact storage configuration parsing from environment variables.

use super::parse::parse;
use crate::application::ml::registry::RetentionPolicy;
use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Artifact environment configuration
#[derive(Debug, Clone)]
pub struct ArtifactEnvConfig {
    /// Directory holding `{arch}_{symbol}.json` and `{arch}_{symbol}_scaler.json`.
    pub dir: PathBuf,
    /// Reload loaded artifacts after this many seconds; 0 keeps them forever.
    pub retention_seconds: u64,
}

impl ArtifactEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            dir: PathBuf::from(env::var("ARTIFACT_DIR").unwrap_or_else(|_| "models".to_string())),
            retention_seconds: parse("ARTIFACT_RETENTION_SECONDS", 0u64)?,
        })
    }

    pub fn retention(&self) -> RetentionPolicy {
        match self.retention_seconds {
            0 => RetentionPolicy::Unbounded,
            secs => RetentionPolicy::Ttl(Duration::from_secs(secs)),
        }
    }
}
