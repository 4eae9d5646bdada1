//! Push-based metrics reporter for Trendcast
//!
//! Periodically outputs registry and request statistics as structured JSON
//! to stdout.

use crate::application::ml::registry::ArtifactRegistry;
use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Metrics snapshot for JSON output
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub artifacts: ArtifactSnapshot,
    pub requests: RequestSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ArtifactSnapshot {
    pub cached: usize,
    pub loads_from_storage: usize,
}

#[derive(Debug, Serialize)]
pub struct RequestSnapshot {
    pub forecasts: f64,
    pub explanations: f64,
    pub degraded_explanations: f64,
    pub cache_lookups: f64,
}

/// Push-based metrics reporter
///
/// Outputs metrics as structured JSON logs on a configurable interval.
pub struct MetricsReporter {
    registry: Arc<ArtifactRegistry>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(registry: Arc<ArtifactRegistry>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            registry,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Run the reporter in a loop, outputting metrics periodically
    pub async fn run(self) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;

            let snapshot = self.collect_snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    // Prefix so log shippers can filter metric lines
                    println!("METRICS_JSON:{}", json);
                    info!(
                        "Artifacts: {} cached | Forecasts: {} | Explanations: {} | Uptime: {}s",
                        snapshot.artifacts.cached,
                        snapshot.requests.forecasts,
                        snapshot.requests.explanations,
                        snapshot.uptime_seconds
                    );
                }
                Err(e) => warn!("MetricsReporter: Failed to serialize metrics: {}", e),
            }
        }
    }

    /// Collect current metrics snapshot and refresh the gauges it covers
    pub fn collect_snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        let cached = self.registry.cached_count();

        self.metrics.artifacts_cached.set(cached as i64);
        self.metrics.uptime_seconds.set(uptime as f64);

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            artifacts: ArtifactSnapshot {
                cached,
                loads_from_storage: self.registry.load_count(),
            },
            requests: RequestSnapshot {
                forecasts: self.metrics.forecast_total(),
                explanations: self.metrics.explain_total(),
                degraded_explanations: self.metrics.degraded_total(),
                cache_lookups: self.metrics.cache_lookup_total(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::Architecture;
    use crate::infrastructure::artifacts::fixtures::store_with;

    #[test]
    fn test_snapshot_reflects_registry_and_counters() {
        let registry = Arc::new(ArtifactRegistry::new(store_with(
            &[Architecture::GatedRecurrent],
            "AAPL",
            1,
        )));
        registry.load(Architecture::GatedRecurrent, "AAPL").unwrap();
        let metrics = Metrics::new().unwrap();
        metrics.inc_forecast("success");
        metrics.inc_forecast("error");
        metrics.inc_explain("gru", "success");

        let reporter = MetricsReporter::new(registry, metrics.clone(), 60);
        let snapshot = reporter.collect_snapshot();

        assert_eq!(snapshot.artifacts.cached, 1);
        assert_eq!(snapshot.artifacts.loads_from_storage, 1);
        assert_eq!(snapshot.requests.forecasts, 2.0);
        assert_eq!(snapshot.requests.explanations, 1.0);
        assert_eq!(metrics.artifacts_cached.get(), 1);
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = MetricsSnapshot {
            timestamp: "2026-01-10T10:00:00Z".to_string(),
            uptime_seconds: 3600,
            version: "0.1.0".to_string(),
            artifacts: ArtifactSnapshot {
                cached: 3,
                loads_from_storage: 4,
            },
            requests: RequestSnapshot {
                forecasts: 12.0,
                explanations: 2.0,
                degraded_explanations: 1.0,
                cache_lookups: 14.0,
            },
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"cached\":3"));
        assert!(json.contains("degraded_explanations"));
    }
}
