use crate::application::market_data::feature_builder::FeatureSequenceBuilder;
use crate::application::market_data::history_source::MarketSnapshot;
use crate::application::ml::registry::{ArtifactRegistry, LoadedArtifact};
use crate::domain::errors::ForecastError;
use crate::domain::ml::Architecture;
use chrono::{DateTime, Utc};
use ndarray::{Array2, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_COMPARISON_DAYS: usize = 100;
pub const MAX_COMPARISON_DAYS: usize = 1000;

/// Historical one-step predictions against realized closes, column-wise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub symbol: String,
    pub timestamps: Vec<i64>,
    pub actual_prices: Vec<f64>,
    /// `None` where no full window precedes the day or the pass failed.
    pub predictions: BTreeMap<Architecture, Vec<Option<f64>>>,
    /// Absolute percentage error per day.
    pub errors: BTreeMap<Architecture, Vec<Option<f64>>>,
    /// Mean of the defined errors per architecture.
    pub mean_abs_pct_error: BTreeMap<Architecture, f64>,
    pub generated_at: DateTime<Utc>,
}

/// Sliding-window evaluation of every available architecture.
pub struct PredictionComparison {
    registry: Arc<ArtifactRegistry>,
    builder: FeatureSequenceBuilder,
}

impl PredictionComparison {
    pub fn new(registry: Arc<ArtifactRegistry>) -> Self {
        Self {
            registry,
            builder: FeatureSequenceBuilder::new(),
        }
    }

    /// Bars to request so that `days` evaluated rows each have a full window.
    pub fn required_bars(&self, days: usize) -> usize {
        self.builder.required_bars() + days
    }

    /// Predicts each of the last `days` post-warm-up rows from the
    /// `sequence_length` rows before it.
    pub fn compare(
        &self,
        symbol: &str,
        snapshot: &MarketSnapshot,
        days: usize,
    ) -> Result<ComparisonReport, ForecastError> {
        if days == 0 || days > MAX_COMPARISON_DAYS {
            return Err(ForecastError::InvalidRequest {
                reason: format!("days must be between 1 and {}", MAX_COMPARISON_DAYS),
            });
        }

        let available = self.registry.available(symbol);
        if available.is_empty() {
            return Err(ForecastError::NoModelsAvailable {
                symbol: symbol.to_string(),
            });
        }

        let matrix = self.builder.feature_matrix(symbol, &snapshot.candles)?;
        let total = matrix.rows();
        let days = days.min(total);
        let first = total - days;
        let seq_len = self.builder.sequence_length();

        let mut artifacts: Vec<Arc<LoadedArtifact>> = Vec::new();
        for architecture in available {
            match self.registry.load(architecture, symbol) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) if e.requires_retraining() => {
                    warn!(
                        "PredictionComparison: Skipping {} for {}: {}",
                        architecture, symbol, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
        if artifacts.is_empty() {
            return Err(ForecastError::NoModelsAvailable {
                symbol: symbol.to_string(),
            });
        }

        let actual_prices: Vec<f64> = (first..total).map(|row| matrix.close(row)).collect();
        let timestamps = matrix.timestamps[first..total].to_vec();

        let mut predictions = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut mean_abs_pct_error = BTreeMap::new();

        for artifact in &artifacts {
            let scaled: Array2<f64> = artifact.scaler.transform(matrix.values.view());
            let column: Vec<Option<f64>> = (first..total)
                .into_par_iter()
                .map(|row| {
                    if row < seq_len {
                        return None;
                    }
                    let window = scaled.slice(s![row - seq_len..row, ..]);
                    match artifact.model.forward(window) {
                        Ok(out) => Some(artifact.scaler.unscale_close(out)),
                        Err(reason) => {
                            warn!(
                                "PredictionComparison: {} failed at row {}: {}",
                                artifact.key, row, reason
                            );
                            None
                        }
                    }
                })
                .collect();

            let errs: Vec<Option<f64>> = column
                .iter()
                .zip(actual_prices.iter())
                .map(|(pred, actual)| pred.map(|p| (p - actual).abs() / actual * 100.0))
                .collect();

            let defined: Vec<f64> = errs.iter().flatten().copied().collect();
            if !defined.is_empty() {
                mean_abs_pct_error.insert(
                    artifact.key.architecture,
                    defined.iter().sum::<f64>() / defined.len() as f64,
                );
            }

            predictions.insert(artifact.key.architecture, column);
            errors.insert(artifact.key.architecture, errs);
        }

        info!(
            "PredictionComparison: {} evaluated {} days with {} models",
            symbol,
            days,
            artifacts.len()
        );

        Ok(ComparisonReport {
            symbol: symbol.to_string(),
            timestamps,
            actual_prices,
            predictions,
            errors,
            mean_abs_pct_error,
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::feature_registry::{SEQUENCE_LENGTH, WARMUP_ROWS};
    use crate::infrastructure::artifacts::fixtures::store_with;
    use crate::infrastructure::market_data::mock::synthetic_candles;

    fn snapshot(symbol: &str, bars: usize) -> MarketSnapshot {
        MarketSnapshot {
            requested: symbol.to_string(),
            resolved: symbol.to_string(),
            candles: synthetic_candles(symbol, bars, 100.0, 13),
            quote: None,
        }
    }

    #[test]
    fn test_leading_days_without_full_window_are_none() {
        let store = store_with(&[Architecture::GatedRecurrent], "AAPL", 2);
        let comparison = PredictionComparison::new(Arc::new(ArtifactRegistry::new(store)));

        // 180 post-warm-up rows, asking for all of them
        let bars = WARMUP_ROWS + 180;
        let report = comparison.compare("AAPL", &snapshot("AAPL", bars), 500).unwrap();

        assert_eq!(report.actual_prices.len(), 180);
        let column = &report.predictions[&Architecture::GatedRecurrent];
        assert_eq!(column.len(), 180);
        assert!(column[..SEQUENCE_LENGTH].iter().all(|p| p.is_none()));
        assert!(column[SEQUENCE_LENGTH..].iter().all(|p| p.is_some()));
        assert!(report.mean_abs_pct_error.contains_key(&Architecture::GatedRecurrent));
    }

    #[test]
    fn test_errors_are_absolute_percentages() {
        let store = store_with(&Architecture::ALL, "MSFT", 3);
        let comparison = PredictionComparison::new(Arc::new(ArtifactRegistry::new(store)));
        let report = comparison.compare("MSFT", &snapshot("MSFT", 300), 20).unwrap();

        assert_eq!(report.predictions.len(), 3);
        for (arch, column) in &report.predictions {
            for (i, pred) in column.iter().enumerate() {
                let pred = pred.unwrap();
                let err = report.errors[arch][i].unwrap();
                let actual = report.actual_prices[i];
                assert!((err - (pred - actual).abs() / actual * 100.0).abs() < 1e-9);
                assert!(err >= 0.0);
            }
        }
    }

    #[test]
    fn test_invalid_days() {
        let store = store_with(&[Architecture::GatedRecurrent], "AAPL", 2);
        let comparison = PredictionComparison::new(Arc::new(ArtifactRegistry::new(store)));
        let err = comparison.compare("AAPL", &snapshot("AAPL", 300), 0).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidRequest { .. }));
    }
}
