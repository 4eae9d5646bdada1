use crate::domain::errors::ForecastError;
use crate::domain::market::Candle;
use crate::domain::ml::MinMaxScaler;
use crate::domain::ml::feature_registry::{
    CLOSE_INDEX, FEATURE_COUNT, LONG_MA_PERIOD, SEQUENCE_LENGTH, SHORT_MA_PERIOD, VOLATILITY_PERIOD,
    WARMUP_ROWS,
};
use crate::domain::validation::StrictBarValidator;
use ndarray::{Array2, ArrayView2, s};
use statrs::statistics::Statistics;
use ta::Next;
use ta::indicators::SimpleMovingAverage;

/// Engineered features for every bar after the warm-up rows, oldest first.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub timestamps: Vec<i64>,
    /// `[rows, FEATURE_COUNT]` in training column order.
    pub values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn close(&self, row: usize) -> f64 {
        self.values[[row, CLOSE_INDEX]]
    }

    pub fn last_close(&self) -> Option<f64> {
        self.rows().checked_sub(1).map(|row| self.close(row))
    }
}

/// Scaled sliding sequences and next-step targets, split chronologically.
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    pub train: Vec<Array2<f64>>,
    pub test: Vec<Array2<f64>>,
    /// Scaled close at the step after each training sequence.
    pub train_targets: Vec<f64>,
    pub test_targets: Vec<f64>,
}

/// Turns raw daily bars into fixed-length multi-feature windows.
#[derive(Debug, Clone)]
pub struct FeatureSequenceBuilder {
    sequence_length: usize,
}

impl Default for FeatureSequenceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureSequenceBuilder {
    pub fn new() -> Self {
        Self {
            sequence_length: SEQUENCE_LENGTH,
        }
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Trailing bars needed for one full window after warm-up.
    pub fn required_bars(&self) -> usize {
        WARMUP_ROWS + self.sequence_length + 1
    }

    /// Computes close, 20/50-period moving averages and 20-period sample
    /// volatility for every bar, then drops the rows where any rolling
    /// statistic is still undefined.
    pub fn feature_matrix(
        &self,
        symbol: &str,
        candles: &[Candle],
    ) -> Result<FeatureMatrix, ForecastError> {
        StrictBarValidator::validate_series(candles).map_err(|reason| {
            ForecastError::InvalidMarketData {
                symbol: symbol.to_string(),
                reason,
            }
        })?;

        let closes = candles
            .iter()
            .map(|c| {
                c.close_f64().ok_or_else(|| ForecastError::InvalidMarketData {
                    symbol: symbol.to_string(),
                    reason: format!("close {} not representable as f64", c.close),
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let indicator_err = |e: ta::errors::TaError| ForecastError::Internal {
            reason: format!("indicator setup failed: {}", e),
        };
        let mut sma_short = SimpleMovingAverage::new(SHORT_MA_PERIOD).map_err(indicator_err)?;
        let mut sma_long = SimpleMovingAverage::new(LONG_MA_PERIOD).map_err(indicator_err)?;

        let rows = closes.len().saturating_sub(WARMUP_ROWS);
        let mut values = Array2::<f64>::zeros((rows, FEATURE_COUNT));
        let mut timestamps = Vec::with_capacity(rows);

        for (i, &close) in closes.iter().enumerate() {
            // Indicators must see every bar, including warm-up ones
            let short = sma_short.next(close);
            let long = sma_long.next(close);
            if i < WARMUP_ROWS {
                continue;
            }
            let volatility = closes[i + 1 - VOLATILITY_PERIOD..=i].std_dev();

            let row = i - WARMUP_ROWS;
            values[[row, 0]] = close;
            values[[row, 1]] = short;
            values[[row, 2]] = long;
            values[[row, 3]] = volatility;
            timestamps.push(candles[i].timestamp);
        }

        if values.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::InvalidMarketData {
                symbol: symbol.to_string(),
                reason: "non-finite feature value".to_string(),
            });
        }

        Ok(FeatureMatrix { timestamps, values })
    }

    /// The last `sequence_length` feature rows, unscaled.
    pub fn build_window(
        &self,
        symbol: &str,
        candles: &[Candle],
    ) -> Result<Array2<f64>, ForecastError> {
        let matrix = self.feature_matrix(symbol, candles)?;
        self.last_window(symbol, matrix.values.view())
    }

    pub fn last_window(
        &self,
        symbol: &str,
        features: ArrayView2<f64>,
    ) -> Result<Array2<f64>, ForecastError> {
        let available = features.nrows();
        if available < self.sequence_length {
            return Err(ForecastError::InsufficientHistory {
                symbol: symbol.to_string(),
                needed: self.sequence_length,
                available,
            });
        }
        Ok(features
            .slice(s![available - self.sequence_length.., ..])
            .to_owned())
    }

    /// Scales the matrix, cuts sliding sequences `X[i-N..i] -> y[i]` and
    /// splits them 80/20 in time order.
    pub fn sequence_dataset(
        &self,
        symbol: &str,
        features: ArrayView2<f64>,
        scaler: &MinMaxScaler,
    ) -> Result<SequenceDataset, ForecastError> {
        let n = self.sequence_length;
        let rows = features.nrows();
        if rows <= n {
            return Err(ForecastError::InsufficientHistory {
                symbol: symbol.to_string(),
                needed: n + 1,
                available: rows,
            });
        }

        let scaled = scaler.transform(features);
        let (sequences, targets): (Vec<Array2<f64>>, Vec<f64>) = (n..rows)
            .map(|i| (scaled.slice(s![i - n..i, ..]).to_owned(), scaled[[i, 0]]))
            .unzip();

        let split = (sequences.len() as f64 * 0.8) as usize;
        let mut train = sequences;
        let test = train.split_off(split);
        let mut train_targets = targets;
        let test_targets = train_targets.split_off(split);

        Ok(SequenceDataset {
            train,
            test,
            train_targets,
            test_targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::market_data::mock::synthetic_candles;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn flat_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                symbol: "FLAT".to_string(),
                open: dec!(100.0),
                high: dec!(100.0),
                low: dec!(100.0),
                close: dec!(100.0),
                volume: dec!(1000),
                timestamp: i as i64 * 86_400_000,
            })
            .collect()
    }

    #[test]
    fn test_flat_series_has_zero_volatility_and_flat_averages() {
        let builder = FeatureSequenceBuilder::new();
        let window = builder.build_window("FLAT", &flat_candles(200)).unwrap();
        assert_eq!(window.dim(), (SEQUENCE_LENGTH, FEATURE_COUNT));
        for row in window.rows() {
            assert_eq!(row[0], 100.0);
            assert!((row[1] - 100.0).abs() < 1e-9);
            assert!((row[2] - 100.0).abs() < 1e-9);
            assert_eq!(row[3], 0.0);
        }
    }

    #[test]
    fn test_warmup_rows_are_dropped() {
        let builder = FeatureSequenceBuilder::new();
        let candles = synthetic_candles("AAPL", 200, 120.0, 7);
        let matrix = builder.feature_matrix("AAPL", &candles).unwrap();
        assert_eq!(matrix.rows(), 200 - WARMUP_ROWS);
        assert_eq!(matrix.timestamps[0], candles[WARMUP_ROWS].timestamp);

        // First kept row sees exactly the first 50 closes in its long average
        let expected: f64 = candles[..LONG_MA_PERIOD]
            .iter()
            .map(|c| c.close_f64().unwrap())
            .sum::<f64>()
            / LONG_MA_PERIOD as f64;
        assert!((matrix.values[[0, 2]] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let builder = FeatureSequenceBuilder::new();
        let candles = synthetic_candles("MSFT", 150, 300.0, 1);
        let err = builder.build_window("MSFT", &candles).unwrap_err();
        match err {
            ForecastError::InsufficientHistory {
                needed, available, ..
            } => {
                assert_eq!(needed, SEQUENCE_LENGTH);
                assert_eq!(available, 150 - WARMUP_ROWS);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_exactly_required_bars_build_a_window() {
        let builder = FeatureSequenceBuilder::new();
        let candles = synthetic_candles("MSFT", WARMUP_ROWS + SEQUENCE_LENGTH, 300.0, 1);
        assert!(builder.build_window("MSFT", &candles).is_ok());
    }

    #[test]
    fn test_invalid_bar_is_rejected_not_dropped() {
        let builder = FeatureSequenceBuilder::new();
        let mut candles = synthetic_candles("NVDA", 200, 90.0, 3);
        candles[10].close = Decimal::ZERO;
        let err = builder.build_window("NVDA", &candles).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidMarketData { .. }));
    }

    #[test]
    fn test_sequence_dataset_split() {
        let builder = FeatureSequenceBuilder::new();
        let candles = synthetic_candles("SPY", 400, 100.0, 5);
        let matrix = builder.feature_matrix("SPY", &candles).unwrap();
        let scaler = MinMaxScaler::fit(matrix.values.view(), &["Close", "MA_20", "MA_50", "Volatility"]);
        let data = builder
            .sequence_dataset("SPY", matrix.values.view(), &scaler)
            .unwrap();

        let total = matrix.rows() - SEQUENCE_LENGTH;
        assert_eq!(data.train.len() + data.test.len(), total);
        assert_eq!(data.train.len(), (total as f64 * 0.8) as usize);
        assert_eq!(data.train.len(), data.train_targets.len());

        // The last test sequence ends just before the final row
        let last = data.test.last().unwrap();
        let expected = scaler.scale_close(matrix.close(matrix.rows() - 2));
        assert!((last[[SEQUENCE_LENGTH - 1, 0]] - expected).abs() < 1e-12);
    }
}
