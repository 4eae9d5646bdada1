use crate::infrastructure::observability::Metrics;
use prometheus::Histogram;
use std::time::{Duration, Instant};

/// RAII guard for measuring and recording latency
pub struct LatencyGuard {
    start: Instant,
    histogram: Option<Histogram>,
}

impl LatencyGuard {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram: Some(histogram),
        }
    }

    /// Times one forward pass; records nothing when metrics are disabled.
    pub fn inference(metrics: Option<&Metrics>, architecture_tag: &str) -> Self {
        Self {
            start: Instant::now(),
            histogram: metrics.map(|m| {
                m.inference_latency_seconds
                    .with_label_values(&[architecture_tag])
            }),
        }
    }

    /// Times one service operation.
    pub fn request(metrics: Option<&Metrics>, operation: &str) -> Self {
        Self {
            start: Instant::now(),
            histogram: metrics.map(|m| m.request_latency_seconds.with_label_values(&[operation])),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for LatencyGuard {
    fn drop(&mut self) {
        if let Some(histogram) = &self.histogram {
            histogram.observe(self.start.elapsed().as_secs_f64());
        }
    }
}
