//! Market-data configuration parsing from environment variables.

use super::parse::{parse, parse_list, parse_u32_list};
use crate::application::market_data::history_source::FallbackPolicy;
use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Where daily bars come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Seeded synthetic history, for demos and tests.
    Mock,
    /// `{SYMBOL}.csv` files in a directory.
    Csv,
}

impl FromStr for DataSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(DataSource::Mock),
            "csv" => Ok(DataSource::Csv),
            _ => anyhow::bail!("Invalid MARKET_DATA_SOURCE: {}. Must be 'mock' or 'csv'", s),
        }
    }
}

/// Market data environment configuration
#[derive(Debug, Clone)]
pub struct MarketDataEnvConfig {
    pub source: DataSource,
    pub csv_dir: PathBuf,
    pub symbol_suffixes: Vec<String>,
    pub lookback_days: Vec<u32>,
    pub min_bars: usize,
}

impl MarketDataEnvConfig {
    pub fn from_env() -> Result<Self> {
        let source_str = env::var("MARKET_DATA_SOURCE").unwrap_or_else(|_| "mock".to_string());
        Ok(Self {
            source: DataSource::from_str(&source_str)?,
            csv_dir: PathBuf::from(env::var("MARKET_DATA_DIR").unwrap_or_else(|_| "data".to_string())),
            symbol_suffixes: parse_list("SYMBOL_SUFFIXES", ".NS,.BO"),
            lookback_days: parse_u32_list("LOOKBACK_DAYS", "730,1825,7300")?,
            min_bars: parse("MIN_HISTORY_BARS", 170usize)?,
        })
    }

    pub fn policy(&self) -> FallbackPolicy {
        FallbackPolicy {
            suffixes: self.symbol_suffixes.clone(),
            lookback_days: self.lookback_days.clone(),
            min_bars: self.min_bars,
        }
    }
}
