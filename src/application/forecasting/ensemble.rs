use crate::application::market_data::feature_builder::FeatureSequenceBuilder;
use crate::application::market_data::history_source::MarketSnapshot;
use crate::application::ml::registry::ArtifactRegistry;
use crate::domain::errors::ForecastError;
use crate::domain::ml::forecast::agreement_confidence;
use crate::domain::ml::{Architecture, ForecastReport, Horizon, HorizonForecast};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::observability::latency_tracker::LatencyGuard;
use chrono::Utc;
use ndarray::ArrayView2;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of running one architecture on the current window.
enum ModelRun {
    Predicted(Architecture, f64),
    Skipped(Architecture),
}

/// Runs every available predictor for a symbol and turns their agreement
/// into multi-horizon forecasts.
pub struct EnsembleForecaster {
    registry: Arc<ArtifactRegistry>,
    builder: FeatureSequenceBuilder,
    metrics: Option<Metrics>,
}

impl EnsembleForecaster {
    pub fn new(registry: Arc<ArtifactRegistry>) -> Self {
        Self {
            registry,
            builder: FeatureSequenceBuilder::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current price from the quote, falling back to the last close.
    pub fn current_price(snapshot: &MarketSnapshot) -> Result<f64, ForecastError> {
        if let Some(price) = snapshot
            .quote
            .as_ref()
            .and_then(|q| q.price_f64())
            .filter(|p| *p > 0.0)
        {
            return Ok(price);
        }
        warn!(
            "EnsembleForecaster: No usable quote for {}, using last close",
            snapshot.requested
        );
        snapshot
            .last_close()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| ForecastError::InvalidMarketData {
                symbol: snapshot.requested.clone(),
                reason: "no current price available".to_string(),
            })
    }

    /// Forecasts `symbol` over every horizon, or only `horizon` if given.
    pub fn forecast(
        &self,
        symbol: &str,
        snapshot: &MarketSnapshot,
        horizon: Option<Horizon>,
    ) -> Result<ForecastReport, ForecastError> {
        let available = self.registry.available(symbol);
        if available.is_empty() {
            return Err(ForecastError::NoModelsAvailable {
                symbol: symbol.to_string(),
            });
        }

        let window = self.builder.build_window(symbol, &snapshot.candles)?;
        let current_price = Self::current_price(snapshot)?;

        let runs = available
            .par_iter()
            .map(|&architecture| self.run_model(architecture, symbol, window.view()))
            .collect::<Result<Vec<ModelRun>, ForecastError>>()?;

        let mut contributions = BTreeMap::new();
        let mut skipped = Vec::new();
        for run in runs {
            match run {
                ModelRun::Predicted(architecture, price) => {
                    contributions.insert(architecture, price);
                }
                ModelRun::Skipped(architecture) => skipped.push(architecture),
            }
        }

        if contributions.is_empty() {
            error!(
                "EnsembleForecaster: Every artifact for {} failed to load",
                symbol
            );
            return Err(ForecastError::NoModelsAvailable {
                symbol: symbol.to_string(),
            });
        }

        let predictions: Vec<f64> = contributions.values().copied().collect();
        let ensemble_prediction = predictions.iter().sum::<f64>() / predictions.len() as f64;
        let base_change = (ensemble_prediction - current_price) / current_price;
        let confidence = agreement_confidence(&predictions, current_price);

        let horizons = Horizon::ALL
            .into_iter()
            .filter(|h| horizon.is_none_or(|wanted| wanted == *h))
            .map(|h| HorizonForecast {
                horizon: h,
                predicted_price: h.project(current_price, base_change),
                confidence,
                contributions: contributions.clone(),
            })
            .collect();

        let contributing: Vec<Architecture> = contributions.keys().copied().collect();
        info!(
            "EnsembleForecaster: {} current={:.2} ensemble={:.2} change={:+.4} confidence={:.3} models={:?}",
            symbol, current_price, ensemble_prediction, base_change, confidence, contributing
        );

        Ok(ForecastReport {
            symbol: symbol.to_string(),
            current_price,
            ensemble_prediction,
            base_change,
            horizons,
            contributing,
            skipped,
            generated_at: Utc::now(),
        })
    }

    /// Loads and runs one architecture. Unusable artifacts are skipped;
    /// anything else aborts the forecast.
    fn run_model(
        &self,
        architecture: Architecture,
        symbol: &str,
        window: ArrayView2<f64>,
    ) -> Result<ModelRun, ForecastError> {
        let artifact = match self.registry.load(architecture, symbol) {
            Ok(artifact) => artifact,
            Err(e) if e.requires_retraining() => {
                error!(
                    architecture = architecture.tag(),
                    symbol,
                    "EnsembleForecaster: Excluding unusable artifact: {}",
                    e
                );
                return Ok(ModelRun::Skipped(architecture));
            }
            Err(ForecastError::ArtifactNotFound { .. }) => {
                // Removed between the availability check and the load
                warn!(
                    "EnsembleForecaster: {} artifact for {} disappeared",
                    architecture, symbol
                );
                return Ok(ModelRun::Skipped(architecture));
            }
            Err(e @ ForecastError::ArtifactIo { .. }) => {
                // Transient read failure aborts the forecast; callers may retry
                warn!(
                    "EnsembleForecaster: {} artifact for {} unreadable, aborting: {}",
                    architecture, symbol, e
                );
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let scaled = artifact.scaler.transform(window);
        let output = {
            let _timer = LatencyGuard::inference(self.metrics.as_ref(), architecture.tag());
            artifact.model.forward(scaled.view())
        };
        match output {
            Ok(scaled_prediction) => Ok(ModelRun::Predicted(
                architecture,
                artifact.scaler.unscale_close(scaled_prediction),
            )),
            Err(reason) => {
                error!(
                    architecture = architecture.tag(),
                    symbol,
                    "EnsembleForecaster: Forward pass failed: {}",
                    reason
                );
                Ok(ModelRun::Skipped(architecture))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Quote;
    use crate::domain::ml::forecast::SINGLE_MODEL_CONFIDENCE;
    use crate::domain::ml::{ArtifactFile, ArtifactKey};
    use crate::infrastructure::artifacts::MemoryArtifactStore;
    use crate::application::ml::weights::ModelWeights;
    use crate::domain::market::Candle;
    use crate::infrastructure::artifacts::fixtures::{FlakyArtifactStore, store_with, valid_scaler};
    use crate::infrastructure::market_data::mock::synthetic_candles;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
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

    /// Weights whose output is the constant `scaled`, whatever the window.
    fn constant_output(architecture: Architecture, scaled: f64, seed: u64) -> ModelWeights {
        let mut weights = ModelWeights::initialize(architecture, &mut StdRng::seed_from_u64(seed));
        if let Some(fc) = weights.tensor_mut("fc.weight") {
            fc.data.iter_mut().for_each(|v| *v = 0.0);
        }
        if let Some(bias) = weights.tensor_mut("fc.bias") {
            bias.data = vec![scaled];
        }
        weights
    }

    fn snapshot(symbol: &str) -> MarketSnapshot {
        MarketSnapshot {
            requested: symbol.to_string(),
            resolved: symbol.to_string(),
            candles: synthetic_candles(symbol, 260, 110.0, 21),
            quote: None,
        }
    }

    #[test]
    fn test_no_models_available() {
        let registry = Arc::new(ArtifactRegistry::new(Arc::new(MemoryArtifactStore::new())));
        let forecaster = EnsembleForecaster::new(registry);
        let err = forecaster.forecast("AAPL", &snapshot("AAPL"), None).unwrap_err();
        assert!(matches!(err, ForecastError::NoModelsAvailable { .. }));
    }

    #[test]
    fn test_single_model_confidence_and_horizon_ordering() {
        let store = store_with(&[Architecture::GatedRecurrent], "AAPL", 5);
        let forecaster = EnsembleForecaster::new(Arc::new(ArtifactRegistry::new(store)));
        let report = forecaster.forecast("AAPL", &snapshot("AAPL"), None).unwrap();

        assert_eq!(report.contributing, vec![Architecture::GatedRecurrent]);
        assert_eq!(report.horizons.len(), 3);
        for h in &report.horizons {
            assert_eq!(h.confidence, SINGLE_MODEL_CONFIDENCE);
        }
        let dev = |h: Horizon| (report.horizon(h).unwrap().predicted_price - report.current_price).abs();
        assert!(dev(Horizon::Days30) >= dev(Horizon::Days15));
        assert!(dev(Horizon::Days15) >= dev(Horizon::Days7));
    }

    #[test]
    fn test_corrupt_artifact_is_excluded() {
        let store = store_with(
            &[Architecture::StackedRecurrent, Architecture::GatedRecurrent],
            "MSFT",
            6,
        );
        store.put_bytes(
            &ArtifactKey::new(Architecture::StackedRecurrent, "MSFT"),
            ArtifactFile::Weights,
            b"[]".to_vec(),
        );
        let forecaster = EnsembleForecaster::new(Arc::new(ArtifactRegistry::new(store)));
        let report = forecaster.forecast("MSFT", &snapshot("MSFT"), None).unwrap();

        assert_eq!(report.contributing, vec![Architecture::GatedRecurrent]);
        assert_eq!(report.skipped, vec![Architecture::StackedRecurrent]);
    }

    #[test]
    fn test_quote_overrides_last_close_and_single_horizon() {
        let store = store_with(&Architecture::ALL, "SPY", 7);
        let forecaster = EnsembleForecaster::new(Arc::new(ArtifactRegistry::new(store)));
        let mut snap = snapshot("SPY");
        snap.quote = Some(Quote {
            symbol: "SPY".to_string(),
            price: dec!(123.45),
            volume: dec!(0),
            timestamp: 0,
        });

        let report = forecaster
            .forecast("SPY", &snap, Some(Horizon::Days15))
            .unwrap();
        assert_eq!(report.current_price, 123.45);
        assert_eq!(report.horizons.len(), 1);
        assert_eq!(report.horizons[0].horizon, Horizon::Days15);
        assert_eq!(report.contributing.len(), 3);
        let c = report.horizons[0].confidence;
        assert!((0.5..=0.85).contains(&c));
    }

    #[test]
    fn test_flat_series_has_no_change_and_full_agreement() {
        let store = Arc::new(MemoryArtifactStore::new());
        let scaled = valid_scaler().scale_close(100.0);
        for (i, arch) in [Architecture::StackedRecurrent, Architecture::GatedRecurrent]
            .into_iter()
            .enumerate()
        {
            let key = ArtifactKey::new(arch, "FLAT");
            store.put_json(&key, ArtifactFile::Weights, &constant_output(arch, scaled, i as u64));
            store.put_json(&key, ArtifactFile::Scaler, &valid_scaler());
        }
        let snap = MarketSnapshot {
            requested: "FLAT".to_string(),
            resolved: "FLAT".to_string(),
            candles: flat_candles(200),
            quote: None,
        };

        let forecaster = EnsembleForecaster::new(Arc::new(ArtifactRegistry::new(store)));
        let report = forecaster.forecast("FLAT", &snap, None).unwrap();

        assert_eq!(report.contributing.len(), 2);
        assert!(report.base_change.abs() < 1e-9);
        for h in &report.horizons {
            assert!((h.predicted_price - 100.0).abs() < 1e-6);
            assert!((h.confidence - 0.85).abs() < 1e-12);
        }
    }

    #[test]
    fn test_unreadable_artifact_aborts_forecast() {
        let store = Arc::new(FlakyArtifactStore::new(store_with(
            &[Architecture::GatedRecurrent, Architecture::AttentionRecurrent],
            "AAPL",
            8,
        )));
        let forecaster = EnsembleForecaster::new(Arc::new(ArtifactRegistry::new(store.clone())));

        let err = forecaster.forecast("AAPL", &snapshot("AAPL"), None).unwrap_err();
        assert!(matches!(err, ForecastError::ArtifactIo { .. }));
        assert!(!err.requires_retraining());

        store.set_failing(false);
        let report = forecaster.forecast("AAPL", &snapshot("AAPL"), None).unwrap();
        assert_eq!(report.contributing.len(), 2);
        assert!(report.skipped.is_empty());
    }
}
