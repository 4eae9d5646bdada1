use crate::domain::market::{Candle, Quote};
use crate::domain::ports::MarketDataProvider;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One row of a daily bar export: `date,open,high,low,close,volume`.
#[derive(Debug, Deserialize)]
struct CsvBar {
    #[serde(alias = "Date", alias = "timestamp")]
    date: String,
    #[serde(alias = "Open")]
    open: Decimal,
    #[serde(alias = "High")]
    high: Decimal,
    #[serde(alias = "Low")]
    low: Decimal,
    #[serde(alias = "Close")]
    close: Decimal,
    #[serde(alias = "Volume")]
    volume: Decimal,
}

/// Reads daily history from `{dir}/{SYMBOL}.csv`.
///
/// There is no live feed, so the quote is the last close in the file.
#[derive(Debug, Clone)]
pub struct CsvMarketDataProvider {
    dir: PathBuf,
}

impl CsvMarketDataProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol.to_uppercase()))
    }

    fn parse_date(raw: &str) -> Result<i64> {
        let raw = raw.trim();
        if let Ok(millis) = raw.parse::<i64>() {
            return Ok(millis);
        }
        let day = raw.get(..10).unwrap_or(raw);
        let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}'", raw))?;
        date.and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .ok_or_else(|| anyhow!("Invalid date '{}'", raw))
    }

    fn read_all(path: &Path, symbol: &str) -> Result<Vec<Candle>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut candles = Vec::new();
        for (line, row) in reader.deserialize::<CsvBar>().enumerate() {
            let bar = row.with_context(|| format!("{}: bad row {}", path.display(), line + 2))?;
            candles.push(Candle {
                symbol: symbol.to_string(),
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                timestamp: Self::parse_date(&bar.date)?,
            });
        }
        candles.sort_by_key(|c| c.timestamp);
        debug!(
            "CsvMarketDataProvider: Read {} bars from {}",
            candles.len(),
            path.display()
        );
        Ok(candles)
    }

    async fn load(&self, symbol: &str) -> Result<Vec<Candle>> {
        let path = self.path(symbol);
        let symbol = symbol.to_string();
        tokio::task::spawn_blocking(move || Self::read_all(&path, &symbol))
            .await
            .context("CSV reader task panicked")?
    }
}

#[async_trait]
impl MarketDataProvider for CsvMarketDataProvider {
    async fn daily_history(&self, symbol: &str, lookback_days: u32) -> Result<Vec<Candle>> {
        let candles = self.load(symbol).await?;
        let Some(last) = candles.last() else {
            return Ok(candles);
        };
        let cutoff = last.timestamp - i64::from(lookback_days) * 86_400_000;
        Ok(candles
            .into_iter()
            .filter(|c| c.timestamp > cutoff)
            .collect())
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let candles = self.load(symbol).await?;
        let last = candles
            .last()
            .ok_or_else(|| anyhow!("No bars for {}", symbol))?;
        Ok(Quote {
            symbol: symbol.to_string(),
            price: last.close,
            volume: last.volume,
            timestamp: Utc::now().timestamp_millis(),
        })
    }
}
