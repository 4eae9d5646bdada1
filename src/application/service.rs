//! Async boundary over the forecasting core.
//!
//! Tensor work is blocking, so every model call runs on the blocking pool
//! behind a semaphore, and the whole request is bounded by a timeout. The
//! result cache is best effort: read and write failures are logged and
//! treated as misses.

use crate::application::explainability::engine::ExplainabilityEngine;
use crate::application::explainability::estimator::{AttributionEstimator, default_estimator};
use crate::application::forecasting::comparison::{
    ComparisonReport, DEFAULT_COMPARISON_DAYS, MAX_COMPARISON_DAYS, PredictionComparison,
};
use crate::application::forecasting::ensemble::EnsembleForecaster;
use crate::application::market_data::history_source::{
    FallbackPolicy, HistorySource, MarketSnapshot,
};
use crate::application::ml::registry::{ArtifactRegistry, ArtifactStatus};
use crate::domain::errors::ForecastError;
use crate::domain::ml::{Architecture, Explanation, ForecastReport, Horizon};
use crate::domain::ports::{MarketDataProvider, ResultCache};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::observability::latency_tracker::LatencyGuard;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub symbol: String,
    #[serde(default)]
    pub horizon: Option<Horizon>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainRequest {
    pub symbol: String,
    #[serde(default)]
    pub architecture: Architecture,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareRequest {
    pub symbol: String,
    #[serde(default = "default_comparison_days")]
    pub days: usize,
}

fn default_comparison_days() -> usize {
    DEFAULT_COMPARISON_DAYS
}

/// One request as received on the line-oriented boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServiceRequest {
    Forecast(ForecastRequest),
    Explain(ExplainRequest),
    Status { symbol: String },
    Compare(CompareRequest),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub symbol: String,
    pub models: Vec<ArtifactStatus>,
    /// At least one architecture can serve forecasts.
    pub ready: bool,
}

/// Client-facing error with a stable category code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub category: String,
    pub message: String,
    pub retrain_required: bool,
}

impl From<&ForecastError> for ErrorResponse {
    fn from(error: &ForecastError) -> Self {
        Self {
            category: error.category().code().to_string(),
            message: error.to_string(),
            retrain_required: error.requires_retraining(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum ReplyBody {
    Forecast(ForecastReport),
    Explanation(Explanation),
    Status(StatusResponse),
    Comparison(ComparisonReport),
    Error(ErrorResponse),
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReply {
    pub request_id: Uuid,
    #[serde(flatten)]
    pub body: ReplyBody,
}

impl ServiceReply {
    /// Reply for input that never decoded into a request.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        let error = ForecastError::InvalidRequest {
            reason: reason.into(),
        };
        Self {
            request_id: Uuid::new_v4(),
            body: ReplyBody::Error(ErrorResponse::from(&error)),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ReplyBody::Error(_))
    }
}

/// Limits and cache lifetimes applied at the boundary.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub forecast_ttl: Duration,
    pub explain_ttl: Duration,
    pub comparison_ttl: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout: Duration::from_secs(30),
            forecast_ttl: Duration::from_secs(3600),
            explain_ttl: Duration::from_secs(3600),
            comparison_ttl: Duration::from_secs(3600),
        }
    }
}

/// Composition root of the core. Built once at startup.
pub struct ForecastServiceBuilder {
    registry: Arc<ArtifactRegistry>,
    provider: Arc<dyn MarketDataProvider>,
    policy: FallbackPolicy,
    estimator: Option<Arc<dyn AttributionEstimator>>,
    background_samples: Option<usize>,
    settings: ServiceSettings,
    cache: Option<Arc<dyn ResultCache>>,
    metrics: Option<Metrics>,
}

impl ForecastServiceBuilder {
    pub fn new(registry: Arc<ArtifactRegistry>, provider: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            registry,
            provider,
            policy: FallbackPolicy::default(),
            estimator: None,
            background_samples: None,
            settings: ServiceSettings::default(),
            cache: None,
            metrics: None,
        }
    }

    pub fn policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn estimator(mut self, estimator: Arc<dyn AttributionEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn background_samples(mut self, samples: usize) -> Self {
        self.background_samples = Some(samples);
        self
    }

    pub fn settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> ForecastService {
        let estimator = self
            .estimator
            .unwrap_or_else(|| default_estimator(Default::default()));
        info!(
            "ForecastService: Using {} attribution estimator",
            estimator.name()
        );

        let mut ensemble = EnsembleForecaster::new(Arc::clone(&self.registry));
        let mut explainer = ExplainabilityEngine::new(Arc::clone(&self.registry), estimator);
        if let Some(samples) = self.background_samples {
            explainer = explainer.with_background_samples(samples);
        }
        if let Some(metrics) = &self.metrics {
            ensemble = ensemble.with_metrics(metrics.clone());
            explainer = explainer.with_metrics(metrics.clone());
        }

        ForecastService {
            history: HistorySource::new(self.provider, self.policy),
            ensemble: Arc::new(ensemble),
            explainer: Arc::new(explainer),
            comparison: Arc::new(PredictionComparison::new(Arc::clone(&self.registry))),
            registry: self.registry,
            cache: self.cache,
            permits: Arc::new(Semaphore::new(self.settings.max_concurrent.max(1))),
            settings: self.settings,
            metrics: self.metrics,
        }
    }
}

pub struct ForecastService {
    registry: Arc<ArtifactRegistry>,
    history: HistorySource,
    ensemble: Arc<EnsembleForecaster>,
    explainer: Arc<ExplainabilityEngine>,
    comparison: Arc<PredictionComparison>,
    cache: Option<Arc<dyn ResultCache>>,
    permits: Arc<Semaphore>,
    settings: ServiceSettings,
    metrics: Option<Metrics>,
}

impl std::fmt::Debug for ForecastService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastService")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl ForecastService {
    pub fn registry(&self) -> &Arc<ArtifactRegistry> {
        &self.registry
    }

    /// Dispatches a boundary request, tagging the reply with a fresh id.
    pub async fn handle(&self, request: ServiceRequest) -> ServiceReply {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", %request_id);
        let result = async {
            match request {
                ServiceRequest::Forecast(req) => self.forecast(req).await.map(ReplyBody::Forecast),
                ServiceRequest::Explain(req) => {
                    self.explain(req).await.map(ReplyBody::Explanation)
                }
                ServiceRequest::Status { symbol } => {
                    self.status(&symbol).await.map(ReplyBody::Status)
                }
                ServiceRequest::Compare(req) => self
                    .compare(&req.symbol, req.days)
                    .await
                    .map(ReplyBody::Comparison),
            }
        }
        .instrument(span)
        .await;

        let body = match result {
            Ok(body) => body,
            Err(e) => {
                warn!(%request_id, category = e.category().code(), "ForecastService: {}", e);
                ReplyBody::Error(ErrorResponse::from(&e))
            }
        };
        ServiceReply { request_id, body }
    }

    /// Ensemble forecast for every horizon, or only the requested one.
    pub async fn forecast(&self, request: ForecastRequest) -> Result<ForecastReport, ForecastError> {
        let _timer = LatencyGuard::request(self.metrics.as_ref(), "forecast");
        let symbol = normalize_symbol(&request.symbol)?;
        let horizon = request.horizon;
        let key = forecast_key(&symbol, horizon);

        if let Some(report) = self.cached::<ForecastReport>(&key).await {
            self.count_forecast("cached");
            return Ok(report);
        }
        if let Some(horizon) = horizon {
            let all_key = forecast_key(&symbol, None);
            if let Some(report) = self.cached::<ForecastReport>(&all_key).await {
                self.count_forecast("cached");
                return Ok(report.restrict_to(horizon));
            }
        }

        let result = self
            .with_timeout(async {
                let registry = Arc::clone(&self.registry);
                let sym = symbol.clone();
                let untrained = self
                    .run_blocking(move || Ok(registry.available(&sym).is_empty()))
                    .await?;
                if untrained {
                    return Err(ForecastError::NoModelsAvailable {
                        symbol: symbol.clone(),
                    });
                }
                let snapshot = self.history.fetch(&symbol).await?;
                let ensemble = Arc::clone(&self.ensemble);
                let sym = symbol.clone();
                self.run_blocking(move || ensemble.forecast(&sym, &snapshot, horizon))
                    .await
            })
            .await;

        match &result {
            Ok(report) => {
                self.count_forecast("success");
                self.store(&key, report, self.settings.forecast_ttl).await;
            }
            Err(_) => self.count_forecast("error"),
        }
        result
    }

    /// Attribution for one architecture's latest held-out prediction.
    pub async fn explain(&self, request: ExplainRequest) -> Result<Explanation, ForecastError> {
        let _timer = LatencyGuard::request(self.metrics.as_ref(), "explain");
        let symbol = normalize_symbol(&request.symbol)?;
        let architecture = request.architecture;
        let key = format!("explain:{}:{}", symbol.to_lowercase(), architecture.tag());

        if let Some(explanation) = self.cached::<Explanation>(&key).await {
            self.count_explain(architecture, "cached");
            return Ok(explanation);
        }

        let result = self
            .with_timeout(async {
                // Fail on a missing artifact before touching market data
                let registry = Arc::clone(&self.registry);
                let sym = symbol.clone();
                self.run_blocking(move || registry.load(architecture, &sym).map(|_| ()))
                    .await?;

                let needed = self
                    .explainer
                    .required_bars()
                    .max(self.history.policy().min_bars);
                let snapshot = self.history.fetch_at_least(&symbol, needed).await?;
                let explainer = Arc::clone(&self.explainer);
                let sym = symbol.clone();
                self.run_blocking(move || explainer.explain(&sym, architecture, &snapshot))
                    .await
            })
            .await;

        match &result {
            Ok(explanation) => {
                self.count_explain(architecture, "success");
                self.store(&key, explanation, self.settings.explain_ttl).await;
            }
            Err(_) => self.count_explain(architecture, "error"),
        }
        result
    }

    /// Which architectures have artifacts on disk for `symbol`.
    pub async fn status(&self, symbol: &str) -> Result<StatusResponse, ForecastError> {
        let symbol = normalize_symbol(symbol)?;
        let registry = Arc::clone(&self.registry);
        let sym = symbol.clone();
        let models = self
            .with_timeout(self.run_blocking(move || Ok(registry.status(&sym))))
            .await?;
        Ok(StatusResponse {
            ready: models.iter().any(|m| m.available),
            symbol,
            models,
        })
    }

    /// Sliding-window predictions over the last `days` rows.
    pub async fn compare(
        &self,
        symbol: &str,
        days: usize,
    ) -> Result<ComparisonReport, ForecastError> {
        let _timer = LatencyGuard::request(self.metrics.as_ref(), "compare");
        let symbol = normalize_symbol(symbol)?;
        if days == 0 || days > MAX_COMPARISON_DAYS {
            return Err(ForecastError::InvalidRequest {
                reason: format!("days must be between 1 and {}", MAX_COMPARISON_DAYS),
            });
        }
        let key = format!("compare:{}:{}", symbol.to_lowercase(), days);
        if let Some(report) = self.cached::<ComparisonReport>(&key).await {
            return Ok(report);
        }

        let result = self
            .with_timeout(async {
                let snapshot = self.comparison_history(&symbol, days).await?;
                let comparison = Arc::clone(&self.comparison);
                let sym = symbol.clone();
                self.run_blocking(move || comparison.compare(&sym, &snapshot, days))
                    .await
            })
            .await;

        if let Ok(report) = &result {
            self.store(&key, report, self.settings.comparison_ttl).await;
        }
        result
    }

    /// Enough history for every requested day when the provider has it,
    /// otherwise whatever satisfies the default policy.
    async fn comparison_history(
        &self,
        symbol: &str,
        days: usize,
    ) -> Result<MarketSnapshot, ForecastError> {
        let needed = self
            .comparison
            .required_bars(days)
            .max(self.history.policy().min_bars);
        match self.history.fetch_at_least(symbol, needed).await {
            Err(ForecastError::InsufficientHistory { available, .. }) => {
                info!(
                    "ForecastService: {} has {} bars, fewer than {} for {} days; comparing what exists",
                    symbol, available, needed, days
                );
                self.history.fetch(symbol).await
            }
            other => other,
        }
    }

    async fn with_timeout<T>(
        &self,
        work: impl Future<Output = Result<T, ForecastError>>,
    ) -> Result<T, ForecastError> {
        let limit = self.settings.timeout;
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(ForecastError::Timeout {
                duration_ms: limit.as_millis() as u64,
            }),
        }
    }

    /// Runs `work` on the blocking pool once a permit is free. The permit
    /// stays held until the work finishes, even if the caller gave up.
    async fn run_blocking<T, F>(&self, work: F) -> Result<T, ForecastError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ForecastError> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ForecastError::Internal {
                reason: format!("inference pool closed: {}", e),
            })?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|e| ForecastError::Internal {
            reason: format!("inference task failed: {}", e),
        })?
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => {
                    debug!("ForecastService: Cache hit for {}", key);
                    self.count_cache("hit");
                    Some(value)
                }
                Err(e) => {
                    warn!("ForecastService: Discarding undecodable cache entry {}: {}", key, e);
                    self.count_cache("error");
                    None
                }
            },
            Ok(None) => {
                self.count_cache("miss");
                None
            }
            Err(e) => {
                warn!("ForecastService: Cache read failed for {}: {}", key, e);
                self.count_cache("error");
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Some(cache) = &self.cache else {
            return;
        };
        if ttl.is_zero() {
            return;
        }
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!("ForecastService: Failed to encode {} for cache: {}", key, e);
                return;
            }
        };
        if let Err(e) = cache.set(key, json, ttl).await {
            warn!("ForecastService: Cache write failed for {}: {}", key, e);
            self.count_cache("error");
        }
    }

    fn count_forecast(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_forecast(outcome);
        }
    }

    fn count_explain(&self, architecture: Architecture, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_explain(architecture.tag(), outcome);
        }
    }

    fn count_cache(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_cache_lookup(outcome);
        }
    }
}

fn normalize_symbol(symbol: &str) -> Result<String, ForecastError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ForecastError::InvalidRequest {
            reason: "symbol must not be empty".to_string(),
        });
    }
    Ok(symbol)
}

fn forecast_key(symbol: &str, horizon: Option<Horizon>) -> String {
    format!(
        "forecast:{}:{}",
        symbol.to_lowercase(),
        horizon.map(|h| h.label()).unwrap_or("all")
    )
}
