// Composition root used by the binaries
pub mod bootstrap;

// Attribution of model predictions to input features
pub mod explainability;

// Ensemble forecasting and historical comparison
pub mod forecasting;

// Market data preparation and retrieval policy
pub mod market_data;

// Recurrent networks, weights and the artifact registry
pub mod ml;

// Async boundary
pub mod service;
