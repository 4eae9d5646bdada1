use crate::domain::ml::architecture::Architecture;
use serde::{Deserialize, Serialize};

/// How the attributions were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainPrecision {
    /// Perturbation-based Shapley estimate.
    Estimated,
    /// Linear approximation used because the estimator was unavailable or failed.
    Degraded,
}

impl ExplainPrecision {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ExplainPrecision::Degraded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAttribution {
    pub feature: String,
    /// Mean absolute per-timestep attribution.
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub symbol: String,
    pub architecture: Architecture,
    pub predicted_price: f64,
    /// Raw model output, in scaled units.
    pub scaled_prediction: f64,
    /// Mean background prediction, in scaled units.
    pub scaled_base_value: f64,
    pub base_value: f64,
    /// Sorted by descending importance.
    pub attributions: Vec<FeatureAttribution>,
    pub precision: ExplainPrecision,
}

impl Explanation {
    pub fn top_feature(&self) -> Option<&FeatureAttribution> {
        self.attributions.first()
    }

    pub fn importance_of(&self, feature: &str) -> Option<f64> {
        self.attributions
            .iter()
            .find(|a| a.feature == feature)
            .map(|a| a.importance)
    }
}

/// Orders attributions by descending magnitude. Ties keep input order.
pub fn sort_by_importance(attributions: &mut [FeatureAttribution]) {
    attributions.sort_by(|a, b| b.importance.abs().total_cmp(&a.importance.abs()));
}
