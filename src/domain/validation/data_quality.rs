use crate::domain::market::{Candle, Quote};
use rust_decimal::Decimal;
use tracing::warn;

/// Centralized validator for daily bar integrity.
///
/// Rejects data that is physically impossible. Callers decide whether a
/// rejection is fatal; the feature pipeline treats it as invalid input.
pub struct StrictBarValidator;

impl StrictBarValidator {
    /// Validates a quote. Returns the reason on failure.
    pub fn validate_quote(quote: &Quote) -> Result<(), String> {
        if quote.price <= Decimal::ZERO {
            warn!(
                "Validation FAILED: Quote for {} has non-positive price: {}",
                quote.symbol, quote.price
            );
            return Err(format!("non-positive quote price {}", quote.price));
        }
        Ok(())
    }

    /// Validates a single bar.
    pub fn validate_candle(candle: &Candle) -> Result<(), String> {
        if candle.open <= Decimal::ZERO
            || candle.high <= Decimal::ZERO
            || candle.low <= Decimal::ZERO
            || candle.close <= Decimal::ZERO
        {
            warn!(
                "Validation FAILED: Candle for {} has non-positive price component(s)",
                candle.symbol
            );
            return Err(format!(
                "non-positive price component at timestamp {}",
                candle.timestamp
            ));
        }

        if candle.low > candle.high {
            warn!(
                "Validation FAILED: Candle for {} has low {} > high {}",
                candle.symbol, candle.low, candle.high
            );
            return Err(format!(
                "low {} > high {} at timestamp {}",
                candle.low, candle.high, candle.timestamp
            ));
        }

        if candle.volume < Decimal::ZERO {
            warn!(
                "Validation FAILED: Candle for {} has negative volume: {}",
                candle.symbol, candle.volume
            );
            return Err(format!(
                "negative volume {} at timestamp {}",
                candle.volume, candle.timestamp
            ));
        }

        Ok(())
    }

    /// Validates every bar and checks timestamps are strictly increasing.
    pub fn validate_series(candles: &[Candle]) -> Result<(), String> {
        for candle in candles {
            Self::validate_candle(candle)?;
        }
        if let Some(pair) = candles
            .windows(2)
            .find(|pair| pair[1].timestamp <= pair[0].timestamp)
        {
            warn!(
                "Validation FAILED: Bars for {} out of order at {}",
                pair[1].symbol, pair[1].timestamp
            );
            return Err(format!(
                "bars out of order: {} follows {}",
                pair[1].timestamp, pair[0].timestamp
            ));
        }
        Ok(())
    }
}
