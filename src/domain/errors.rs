use crate::domain::ml::architecture::Architecture;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by the forecasting and explainability core.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("No trained {architecture} model for {symbol}: {missing} not found. Train the model first.")]
    ArtifactNotFound {
        architecture: Architecture,
        symbol: String,
        missing: String,
    },

    #[error(
        "Model architecture mismatch for {architecture} {symbol}: {detail}. The saved weights do not match the current {architecture} network; retrain the {architecture} model for {symbol}."
    )]
    ArchitectureMismatch {
        architecture: Architecture,
        symbol: String,
        detail: String,
    },

    #[error(
        "Scaler for {architecture} {symbol} does not match the feature layout: {detail}. Retrain the {architecture} model for {symbol}."
    )]
    ScalerMismatch {
        architecture: Architecture,
        symbol: String,
        detail: String,
    },

    #[error("Artifact for {architecture} {symbol} is unreadable: {reason}")]
    ArtifactCorrupt {
        architecture: Architecture,
        symbol: String,
        reason: String,
    },

    #[error("Artifact for {architecture} {symbol} could not be read: {reason}. Try again later.")]
    ArtifactIo {
        architecture: Architecture,
        symbol: String,
        reason: String,
    },

    #[error("Insufficient history for {symbol}: need {needed} rows, got {available}")]
    InsufficientHistory {
        symbol: String,
        needed: usize,
        available: usize,
    },

    #[error("No trained models available for {symbol}. Train at least one architecture first.")]
    NoModelsAvailable { symbol: String },

    #[error("Invalid market data for {symbol}: {reason}")]
    InvalidMarketData { symbol: String, reason: String },

    #[error("Market data unavailable for {symbol}: {reason}")]
    MarketData { symbol: String, reason: String },

    #[error("Attribution estimator unavailable: {capability}")]
    CapabilityMissing { capability: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

/// Failures reading or writing artifact files.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact file not found: {path}")]
    NotFound { path: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot encode {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ArtifactError {
    pub fn path(&self) -> &str {
        match self {
            ArtifactError::NotFound { path }
            | ArtifactError::Io { path, .. }
            | ArtifactError::Decode { path, .. }
            | ArtifactError::Encode { path, .. } => path,
        }
    }
}

/// Stable categories the boundary layer reports to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotTrained,
    ModelMismatch,
    InsufficientData,
    InvalidRequest,
    Unavailable,
    Internal,
}

impl ErrorCategory {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::NotTrained => "not_trained",
            ErrorCategory::ModelMismatch => "model_mismatch",
            ErrorCategory::InsufficientData => "insufficient_data",
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::Unavailable => "unavailable",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl ForecastError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ForecastError::ArtifactNotFound { .. } | ForecastError::NoModelsAvailable { .. } => {
                ErrorCategory::NotTrained
            }
            ForecastError::ArchitectureMismatch { .. }
            | ForecastError::ScalerMismatch { .. }
            | ForecastError::ArtifactCorrupt { .. } => ErrorCategory::ModelMismatch,
            ForecastError::InsufficientHistory { .. }
            | ForecastError::InvalidMarketData { .. } => ErrorCategory::InsufficientData,
            ForecastError::InvalidRequest { .. } => ErrorCategory::InvalidRequest,
            ForecastError::MarketData { .. }
            | ForecastError::ArtifactIo { .. }
            | ForecastError::CapabilityMissing { .. }
            | ForecastError::Timeout { .. } => ErrorCategory::Unavailable,
            ForecastError::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// True for errors that say the artifact itself is unusable and must be
    /// regenerated, as opposed to simply missing.
    pub fn requires_retraining(&self) -> bool {
        matches!(
            self,
            ForecastError::ArchitectureMismatch { .. }
                | ForecastError::ScalerMismatch { .. }
                | ForecastError::ArtifactCorrupt { .. }
        )
    }
}
