//! Prometheus metrics definitions for Trendcast
//!
//! All metrics use the `trendcast_` prefix and are read-only.

use crate::domain::ml::Architecture;
use prometheus::{
    CounterVec, Gauge, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

/// Outcome labels of forecast and explain requests.
pub const REQUEST_OUTCOMES: [&str; 3] = ["success", "cached", "error"];
/// Outcome labels of artifact loads.
pub const LOAD_OUTCOMES: [&str; 4] = ["loaded", "mismatch", "missing", "io_error"];
/// Outcome labels of result cache lookups.
pub const CACHE_OUTCOMES: [&str; 3] = ["hit", "miss", "error"];

/// Prometheus metrics for the forecasting core
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Forecast requests by outcome
    pub forecast_requests_total: CounterVec,
    /// Explain requests by architecture and outcome
    pub explain_requests_total: CounterVec,
    /// Explanations served through the linear fallback
    pub explain_degraded_total: CounterVec,
    /// Single forward-pass latency by architecture
    pub inference_latency_seconds: HistogramVec,
    /// End-to-end request latency by operation
    pub request_latency_seconds: HistogramVec,
    /// Artifact loads by architecture and outcome
    pub artifact_loads_total: CounterVec,
    /// Artifacts currently held by the registry
    pub artifacts_cached: IntGauge,
    /// Result cache lookups by outcome (hit, miss, error)
    pub cache_lookups_total: CounterVec,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let forecast_requests_total = CounterVec::new(
            Opts::new(
                "trendcast_forecast_requests_total",
                "Total forecast requests by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(forecast_requests_total.clone()))?;

        let explain_requests_total = CounterVec::new(
            Opts::new(
                "trendcast_explain_requests_total",
                "Total explain requests by architecture and outcome",
            ),
            &["architecture", "outcome"],
        )?;
        registry.register(Box::new(explain_requests_total.clone()))?;

        let explain_degraded_total = CounterVec::new(
            Opts::new(
                "trendcast_explain_degraded_total",
                "Explanations produced by the linear fallback",
            ),
            &["architecture"],
        )?;
        registry.register(Box::new(explain_degraded_total.clone()))?;

        let inference_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "trendcast_inference_latency_seconds",
                "Forward pass latency in seconds",
            )
            .buckets(vec![
                0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
            &["architecture"],
        )?;
        registry.register(Box::new(inference_latency_seconds.clone()))?;

        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "trendcast_request_latency_seconds",
                "End-to-end request latency in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["operation"],
        )?;
        registry.register(Box::new(request_latency_seconds.clone()))?;

        let artifact_loads_total = CounterVec::new(
            Opts::new(
                "trendcast_artifact_loads_total",
                "Artifact loads by architecture and outcome",
            ),
            &["architecture", "outcome"],
        )?;
        registry.register(Box::new(artifact_loads_total.clone()))?;

        let artifacts_cached = IntGauge::with_opts(Opts::new(
            "trendcast_artifacts_cached",
            "Artifacts held in memory by the registry",
        ))?;
        registry.register(Box::new(artifacts_cached.clone()))?;

        let cache_lookups_total = CounterVec::new(
            Opts::new(
                "trendcast_cache_lookups_total",
                "Result cache lookups by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "trendcast_uptime_seconds",
            "Server uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            forecast_requests_total,
            explain_requests_total,
            explain_degraded_total,
            inference_latency_seconds,
            request_latency_seconds,
            artifact_loads_total,
            artifacts_cached,
            cache_lookups_total,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_forecast(&self, outcome: &str) {
        self.forecast_requests_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_explain(&self, architecture: &str, outcome: &str) {
        self.explain_requests_total
            .with_label_values(&[architecture, outcome])
            .inc();
    }

    pub fn inc_explain_degraded(&self, architecture: &str) {
        self.explain_degraded_total
            .with_label_values(&[architecture])
            .inc();
    }

    /// Observe one forward pass
    pub fn observe_inference(&self, architecture: &str, latency: f64) {
        self.inference_latency_seconds
            .with_label_values(&[architecture])
            .observe(latency);
    }

    pub fn observe_request(&self, operation: &str, latency: f64) {
        self.request_latency_seconds
            .with_label_values(&[operation])
            .observe(latency);
    }

    pub fn inc_artifact_load(&self, architecture: &str, outcome: &str) {
        self.artifact_loads_total
            .with_label_values(&[architecture, outcome])
            .inc();
    }

    pub fn inc_cache_lookup(&self, outcome: &str) {
        self.cache_lookups_total.with_label_values(&[outcome]).inc();
    }

    pub fn forecast_total(&self) -> f64 {
        REQUEST_OUTCOMES
            .iter()
            .map(|o| self.forecast_requests_total.with_label_values(&[*o]).get())
            .sum()
    }

    pub fn explain_total(&self) -> f64 {
        Self::per_architecture(|tag| {
            REQUEST_OUTCOMES
                .iter()
                .map(|o| self.explain_requests_total.with_label_values(&[tag, *o]).get())
                .sum()
        })
    }

    pub fn degraded_total(&self) -> f64 {
        Self::per_architecture(|tag| self.explain_degraded_total.with_label_values(&[tag]).get())
    }

    pub fn artifact_load_total(&self) -> f64 {
        Self::per_architecture(|tag| {
            LOAD_OUTCOMES
                .iter()
                .map(|o| self.artifact_loads_total.with_label_values(&[tag, *o]).get())
                .sum()
        })
    }

    pub fn cache_lookup_total(&self) -> f64 {
        CACHE_OUTCOMES
            .iter()
            .map(|o| self.cache_lookups_total.with_label_values(&[*o]).get())
            .sum()
    }

    fn per_architecture(count: impl Fn(&str) -> f64) -> f64 {
        Architecture::ALL.iter().map(|a| count(a.tag())).sum()
    }
}
