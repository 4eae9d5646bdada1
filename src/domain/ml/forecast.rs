use crate::domain::ml::architecture::Architecture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Confidence reported when exactly one architecture contributed.
pub const SINGLE_MODEL_CONFIDENCE: f64 = 0.75;
/// Confidence for perfectly agreeing models, before dispersion is subtracted.
pub const AGREEMENT_BASE_CONFIDENCE: f64 = 0.85;
/// Penalty per unit of relative dispersion (stddev / current price).
pub const DISPERSION_PENALTY: f64 = 10.0;
pub const MIN_CONFIDENCE: f64 = 0.5;
pub const MAX_CONFIDENCE: f64 = 0.95;

/// Forward-looking time bucket for a price projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "7d")]
    Days7,
    #[serde(rename = "15d")]
    Days15,
    #[serde(rename = "30d")]
    Days30,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::Days7, Horizon::Days15, Horizon::Days30];

    pub fn label(&self) -> &'static str {
        match self {
            Horizon::Days7 => "7d",
            Horizon::Days15 => "15d",
            Horizon::Days30 => "30d",
        }
    }

    /// Extrapolation applied to the single-step relative change. This is a
    /// fixed modelling assumption, not a per-horizon model.
    pub fn multiplier(&self) -> f64 {
        match self {
            Horizon::Days7 => 1.0,
            Horizon::Days15 => 1.4,
            Horizon::Days30 => 1.8,
        }
    }

    /// Target price at this horizon given the ensemble's relative change.
    pub fn project(&self, current_price: f64, base_change: f64) -> f64 {
        current_price * (1.0 + base_change * self.multiplier())
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Horizon {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "7d" | "7" => Ok(Horizon::Days7),
            "15d" | "15" => Ok(Horizon::Days15),
            "30d" | "30" => Ok(Horizon::Days30),
            other => Err(format!(
                "Invalid horizon '{}'. Must be '7d', '15d' or '30d'",
                other
            )),
        }
    }
}

/// Agreement-based confidence for a set of price predictions.
///
/// One prediction gives [`SINGLE_MODEL_CONFIDENCE`]. Two or more give
/// `clamp(0.85 - 10 * stddev / current_price, 0.5, 0.95)` with the population
/// standard deviation of the predictions.
pub fn agreement_confidence(predictions: &[f64], current_price: f64) -> f64 {
    if predictions.len() < 2 {
        return SINGLE_MODEL_CONFIDENCE;
    }
    let dispersion = predictions.iter().population_std_dev();
    let relative = if current_price > 0.0 {
        dispersion / current_price
    } else {
        f64::INFINITY
    };
    (AGREEMENT_BASE_CONFIDENCE - DISPERSION_PENALTY * relative).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonForecast {
    pub horizon: Horizon,
    pub predicted_price: f64,
    pub confidence: f64,
    /// Inverse-scaled next-value prediction of every contributing model.
    pub contributions: BTreeMap<Architecture, f64>,
}

/// Full result of one ensemble run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastReport {
    pub symbol: String,
    pub current_price: f64,
    pub ensemble_prediction: f64,
    pub base_change: f64,
    pub horizons: Vec<HorizonForecast>,
    pub contributing: Vec<Architecture>,
    /// Architectures with artifacts on disk that could not be used.
    pub skipped: Vec<Architecture>,
    pub generated_at: DateTime<Utc>,
}

impl ForecastReport {
    pub fn horizon(&self, horizon: Horizon) -> Option<&HorizonForecast> {
        self.horizons.iter().find(|h| h.horizon == horizon)
    }

    /// Keeps only the requested horizon.
    pub fn restrict_to(mut self, horizon: Horizon) -> Self {
        self.horizons.retain(|h| h.horizon == horizon);
        self
    }
}
