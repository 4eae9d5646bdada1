pub mod comparison;
pub mod ensemble;

pub use comparison::{ComparisonReport, PredictionComparison};
pub use ensemble::EnsembleForecaster;
