use crate::application::explainability::estimator::{
    Attribution, AttributionEstimator, LinearApproximation,
};
use crate::application::market_data::feature_builder::FeatureSequenceBuilder;
use crate::application::market_data::history_source::MarketSnapshot;
use crate::application::ml::predictor::SequenceModel;
use crate::application::ml::registry::ArtifactRegistry;
use crate::domain::errors::ForecastError;
use crate::domain::ml::explanation::sort_by_importance;
use crate::domain::ml::feature_registry::FEATURE_NAMES;
use crate::domain::ml::{Architecture, ExplainPrecision, Explanation, FeatureAttribution};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::observability::latency_tracker::LatencyGuard;
use ndarray::Array2;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_BACKGROUND_SAMPLES: usize = 100;

/// Per-feature attributions for a single architecture's latest prediction.
pub struct ExplainabilityEngine {
    registry: Arc<ArtifactRegistry>,
    builder: FeatureSequenceBuilder,
    estimator: Arc<dyn AttributionEstimator>,
    background_samples: usize,
    metrics: Option<Metrics>,
}

impl ExplainabilityEngine {
    pub fn new(registry: Arc<ArtifactRegistry>, estimator: Arc<dyn AttributionEstimator>) -> Self {
        Self {
            registry,
            builder: FeatureSequenceBuilder::new(),
            estimator,
            background_samples: DEFAULT_BACKGROUND_SAMPLES,
            metrics: None,
        }
    }

    pub fn with_background_samples(mut self, samples: usize) -> Self {
        self.background_samples = samples.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bars needed for one training and one test sequence.
    pub fn required_bars(&self) -> usize {
        self.builder.required_bars() + 1
    }

    /// Explains the most recent held-out prediction of `architecture`.
    ///
    /// The background is the earliest training sequences; the sample is
    /// the last test sequence, both scaled with the artifact's own scaler.
    /// No other architecture is substituted when this one is missing.
    pub fn explain(
        &self,
        symbol: &str,
        architecture: Architecture,
        snapshot: &MarketSnapshot,
    ) -> Result<Explanation, ForecastError> {
        let artifact = self.registry.load(architecture, symbol)?;

        let matrix = self.builder.feature_matrix(symbol, &snapshot.candles)?;
        let dataset = self
            .builder
            .sequence_dataset(symbol, matrix.values.view(), &artifact.scaler)?;

        let sample = match dataset.test.last() {
            Some(sample) if !dataset.train.is_empty() => sample,
            _ => {
                return Err(ForecastError::InsufficientHistory {
                    symbol: symbol.to_string(),
                    needed: self.required_bars(),
                    available: snapshot.candles.len(),
                });
            }
        };
        let background = &dataset.train[..dataset.train.len().min(self.background_samples)];

        let internal = |reason: String| ForecastError::Internal {
            reason: format!("{} forward pass failed: {}", architecture, reason),
        };
        let scaled_prediction = {
            let _timer = LatencyGuard::inference(self.metrics.as_ref(), architecture.tag());
            artifact.model.forward(sample.view()).map_err(internal)?
        };
        let background_outputs = artifact.model.forward_batch(background).map_err(internal)?;
        let scaled_base_value =
            background_outputs.iter().sum::<f64>() / background_outputs.len() as f64;

        let (attribution, precision) = self.attribute(
            architecture,
            artifact.model.as_ref(),
            sample,
            background,
        )?;

        let mut attributions: Vec<FeatureAttribution> = FEATURE_NAMES
            .iter()
            .zip(attribution.feature_importance())
            .map(|(name, importance)| FeatureAttribution {
                feature: name.to_string(),
                importance,
            })
            .collect();
        sort_by_importance(&mut attributions);

        let explanation = Explanation {
            symbol: symbol.to_uppercase(),
            architecture,
            predicted_price: artifact.scaler.unscale_close(scaled_prediction),
            scaled_prediction,
            scaled_base_value,
            base_value: artifact.scaler.unscale_close(scaled_base_value),
            attributions,
            precision,
        };

        info!(
            "ExplainabilityEngine: {} {} predicted={:.2} base={:.2} top={:?} precision={:?}",
            symbol,
            architecture,
            explanation.predicted_price,
            explanation.base_value,
            explanation.top_feature().map(|a| a.feature.as_str()),
            precision
        );
        Ok(explanation)
    }

    fn attribute(
        &self,
        architecture: Architecture,
        model: &dyn SequenceModel,
        sample: &Array2<f64>,
        background: &[Array2<f64>],
    ) -> Result<(Attribution, ExplainPrecision), ForecastError> {
        match self.estimator.attribute(model, sample.view(), background) {
            Ok(attribution) => Ok((attribution, ExplainPrecision::Estimated)),
            Err(e) => {
                warn!(
                    architecture = architecture.tag(),
                    "ExplainabilityEngine: {} failed, using linear approximation: {}",
                    self.estimator.name(),
                    e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_explain_degraded(architecture.tag());
                }
                let attribution = LinearApproximation.attribute(model, sample.view(), background)?;
                Ok((attribution, ExplainPrecision::Degraded))
            }
        }
    }
}
