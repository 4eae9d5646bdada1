use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// One daily OHLCV bar as supplied by the market-data provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Bar open time, unix milliseconds
    pub timestamp: i64,
}

impl Candle {
    /// Close price at the f64 boundary used by the feature pipeline.
    pub fn close_f64(&self) -> Option<f64> {
        self.close.to_f64()
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// Latest traded price for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: i64,
}

impl Quote {
    pub fn price_f64(&self) -> Option<f64> {
        self.price.to_f64()
    }
}
