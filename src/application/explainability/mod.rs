pub mod engine;
pub mod estimator;

pub use engine::ExplainabilityEngine;
pub use estimator::{AttributionEstimator, EstimatorBudget, default_estimator};
