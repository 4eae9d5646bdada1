use crate::domain::errors::ArtifactError;
use crate::domain::market::{Candle, Quote};
use crate::domain::ml::architecture::{ArtifactFile, ArtifactKey};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Source of daily OHLCV history and current quotes.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Daily bars covering roughly the last `lookback_days` calendar days,
    /// oldest first.
    async fn daily_history(&self, symbol: &str, lookback_days: u32) -> Result<Vec<Candle>>;
    async fn quote(&self, symbol: &str) -> Result<Quote>;
}

/// Short-lived key/value cache for serialized responses.
///
/// Implementations may fail; callers treat every error as a miss.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
}

/// Byte-level storage for trained artifacts. Blocking; callers run it off
/// the async executor.
pub trait ArtifactStore: Send + Sync {
    fn exists(&self, key: &ArtifactKey, file: ArtifactFile) -> bool;
    fn read(&self, key: &ArtifactKey, file: ArtifactFile) -> Result<Vec<u8>, ArtifactError>;
    fn write(&self, key: &ArtifactKey, file: ArtifactFile, bytes: &[u8])
    -> Result<(), ArtifactError>;
    fn modified(&self, key: &ArtifactKey, file: ArtifactFile) -> Option<DateTime<Utc>>;
    /// Human-readable location, used in error messages.
    fn describe(&self, key: &ArtifactKey, file: ArtifactFile) -> String;
}
