use crate::domain::errors::ForecastError;
use crate::domain::market::{Candle, Quote};
use crate::domain::ports::MarketDataProvider;
use crate::domain::validation::StrictBarValidator;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bounded retry over symbol variants and lookback periods.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPolicy {
    /// Suffixes appended to the requested symbol after the bare symbol
    /// itself has been tried, e.g. `.NS`.
    pub suffixes: Vec<String>,
    /// Lookback periods in calendar days, tried in order.
    pub lookback_days: Vec<u32>,
    /// Bars needed for a request to count as satisfied.
    pub min_bars: usize,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            suffixes: vec![".NS".to_string(), ".BO".to_string()],
            lookback_days: vec![730, 1825, 7300],
            min_bars: 170,
        }
    }
}

impl FallbackPolicy {
    /// Symbol variants in attempt order, bare symbol first.
    pub fn variants(&self, symbol: &str) -> Vec<String> {
        let base = symbol.trim().to_uppercase();
        let mut variants = vec![base.clone()];
        if !base.contains('.') && !base.starts_with('^') {
            variants.extend(self.suffixes.iter().map(|s| format!("{}{}", base, s)));
        }
        variants
    }

    pub fn max_attempts(&self) -> usize {
        self.suffixes.len().saturating_add(1) * self.lookback_days.len()
    }
}

/// History and quote for one request.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub requested: String,
    /// Variant that actually returned data.
    pub resolved: String,
    pub candles: Vec<Candle>,
    pub quote: Option<Quote>,
}

impl MarketSnapshot {
    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().and_then(|c| c.close_f64())
    }
}

/// Market-data access with the fallback policy applied.
pub struct HistorySource {
    provider: Arc<dyn MarketDataProvider>,
    policy: FallbackPolicy,
}

impl HistorySource {
    pub fn new(provider: Arc<dyn MarketDataProvider>, policy: FallbackPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    /// Fetches enough daily history for `symbol`, trying each variant with
    /// each lookback until one yields `min_bars`.
    ///
    /// Ends with `InsufficientHistory` if data was found but too short, or
    /// `MarketData` if every attempt failed or returned nothing.
    pub async fn fetch(&self, symbol: &str) -> Result<MarketSnapshot, ForecastError> {
        let mut best: Option<(String, Vec<Candle>)> = None;
        let mut last_error: Option<String> = None;
        let mut attempts = 0usize;

        for variant in self.policy.variants(symbol) {
            for &lookback in &self.policy.lookback_days {
                attempts += 1;
                match self.provider.daily_history(&variant, lookback).await {
                    Ok(candles) if candles.len() >= self.policy.min_bars => {
                        info!(
                            "HistorySource: {} resolved as {} ({} bars, {}d lookback, attempt {})",
                            symbol,
                            variant,
                            candles.len(),
                            lookback,
                            attempts
                        );
                        let quote = self.quote(&variant).await;
                        return Ok(MarketSnapshot {
                            requested: symbol.to_string(),
                            resolved: variant,
                            candles,
                            quote,
                        });
                    }
                    Ok(candles) => {
                        debug!(
                            "HistorySource: {} returned {} bars with {}d lookback",
                            variant,
                            candles.len(),
                            lookback
                        );
                        let longer = best
                            .as_ref()
                            .is_none_or(|(_, kept)| candles.len() > kept.len());
                        if !candles.is_empty() && longer {
                            best = Some((variant.clone(), candles));
                        }
                    }
                    Err(e) => {
                        warn!(
                            "HistorySource: Attempt {}/{} for {} ({}d) failed: {}",
                            attempts,
                            self.policy.max_attempts(),
                            variant,
                            lookback,
                            e
                        );
                        last_error = Some(e.to_string());
                    }
                }
            }
        }

        match best {
            Some((variant, candles)) => {
                warn!(
                    "HistorySource: Best history for {} is {} bars from {}, need {}",
                    symbol,
                    candles.len(),
                    variant,
                    self.policy.min_bars
                );
                Err(ForecastError::InsufficientHistory {
                    symbol: symbol.to_string(),
                    needed: self.policy.min_bars,
                    available: candles.len(),
                })
            }
            None => Err(ForecastError::MarketData {
                symbol: symbol.to_string(),
                reason: last_error.unwrap_or_else(|| {
                    format!("no history after {} attempts", attempts)
                }),
            }),
        }
    }

    /// Same fallback walk as [`fetch`](Self::fetch) but satisfied only by
    /// `min_bars` bars instead of the policy's own threshold.
    pub async fn fetch_at_least(
        &self,
        symbol: &str,
        min_bars: usize,
    ) -> Result<MarketSnapshot, ForecastError> {
        let source = HistorySource {
            provider: Arc::clone(&self.provider),
            policy: FallbackPolicy {
                min_bars,
                ..self.policy.clone()
            },
        };
        source.fetch(symbol).await
    }

    async fn quote(&self, variant: &str) -> Option<Quote> {
        match self.provider.quote(variant).await {
            Ok(quote) => match StrictBarValidator::validate_quote(&quote) {
                Ok(()) => Some(quote),
                Err(reason) => {
                    warn!("HistorySource: Ignoring quote for {}: {}", variant, reason);
                    None
                }
            },
            Err(e) => {
                warn!("HistorySource: Quote for {} unavailable: {}", variant, e);
                None
            }
        }
    }
}
