use crate::domain::market::{Candle, Quote};
use crate::domain::ports::MarketDataProvider;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

const DAY_MS: i64 = 86_400_000;
/// 2024-01-02T00:00:00Z
const START_MS: i64 = 1_704_153_600_000;
/// Bars generated for symbols nobody registered, about ten trading years.
const GENERATED_BARS: usize = 2520;

/// Seeded random walk of daily bars, oldest first.
pub fn synthetic_candles(symbol: &str, days: usize, start_price: f64, seed: u64) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = start_price;
    let to_dec = |v: f64| {
        Decimal::from_f64(v)
            .unwrap_or(Decimal::ONE)
            .round_dp(4)
    };

    (0..days)
        .map(|i| {
            let open = price;
            // -1.5% to +1.5% daily move with a slight upward drift
            let change_pct = rng.random_range(-0.015..0.0155);
            price = (price * (1.0 + change_pct)).max(1.0);
            let high = open.max(price) * (1.0 + rng.random_range(0.0..0.006));
            let low = open.min(price) * (1.0 - rng.random_range(0.0..0.006));
            Candle {
                symbol: symbol.to_string(),
                open: to_dec(open),
                high: to_dec(high),
                low: to_dec(low),
                close: to_dec(price),
                volume: Decimal::from(rng.random_range(100_000u64..2_000_000)),
                timestamp: START_MS + i as i64 * DAY_MS,
            }
        })
        .collect()
}

/// In-memory market data for tests and offline runs.
///
/// Records every history request so fallback behaviour can be asserted.
#[derive(Clone, Default)]
pub struct MockMarketDataProvider {
    histories: Arc<RwLock<HashMap<String, Vec<Candle>>>>,
    quotes: Arc<RwLock<HashMap<String, Quote>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    requests: Arc<RwLock<Vec<(String, u32)>>>,
    generate_missing: bool,
}

impl MockMarketDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that invents a seeded history for any symbol on first
    /// request. Used for offline demos.
    pub fn generating() -> Self {
        Self {
            generate_missing: true,
            ..Self::default()
        }
    }

    /// Provider preloaded with a synthetic history and a matching quote.
    pub async fn with_synthetic(symbol: &str, days: usize, start_price: f64, seed: u64) -> Self {
        let provider = Self::new();
        provider
            .set_history(symbol, synthetic_candles(symbol, days, start_price, seed))
            .await;
        provider
    }

    /// Stores bars and derives the quote from the last close.
    pub async fn set_history(&self, symbol: &str, candles: Vec<Candle>) {
        if let Some(last) = candles.last() {
            self.set_quote(Quote {
                symbol: symbol.to_string(),
                price: last.close,
                volume: last.volume,
                timestamp: last.timestamp,
            })
            .await;
        }
        self.histories
            .write()
            .await
            .insert(symbol.to_string(), candles);
    }

    pub async fn set_quote(&self, quote: Quote) {
        self.quotes.write().await.insert(quote.symbol.clone(), quote);
    }

    pub async fn remove_quote(&self, symbol: &str) {
        self.quotes.write().await.remove(symbol);
    }

    /// Every call for `symbol` fails as if the upstream were down.
    pub async fn fail_symbol(&self, symbol: &str) {
        self.failing.write().await.insert(symbol.to_string());
    }

    /// `(symbol, lookback_days)` of every history request, in call order.
    pub async fn requests(&self) -> Vec<(String, u32)> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketDataProvider {
    async fn daily_history(&self, symbol: &str, lookback_days: u32) -> Result<Vec<Candle>> {
        self.requests
            .write()
            .await
            .push((symbol.to_string(), lookback_days));

        if self.failing.read().await.contains(symbol) {
            return Err(anyhow!("upstream unavailable for {}", symbol));
        }

        if self.generate_missing && !self.histories.read().await.contains_key(symbol) {
            let seed = symbol
                .bytes()
                .fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            self.set_history(symbol, synthetic_candles(symbol, GENERATED_BARS, 100.0, seed))
                .await;
        }

        let histories = self.histories.read().await;
        let Some(candles) = histories.get(symbol) else {
            return Ok(Vec::new());
        };
        // Calendar days to trading days, roughly 252 per 365
        let bars = (lookback_days as usize * 252).div_ceil(365);
        let start = candles.len().saturating_sub(bars);
        info!(
            "MockMarketDataProvider: Serving {} bars for {}",
            candles.len() - start,
            symbol
        );
        Ok(candles[start..].to_vec())
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        if self.failing.read().await.contains(symbol) {
            return Err(anyhow!("upstream unavailable for {}", symbol));
        }
        self.quotes
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("no quote for {}", symbol))
    }
}
