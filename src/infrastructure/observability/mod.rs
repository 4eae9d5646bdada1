//! Push-based observability for Trendcast
//!
//! Metrics leave the process as outbound data only:
//!
//! 1. **Structured JSON Logs**: Periodic `METRICS_JSON:` lines on stdout
//! 2. **Prometheus text**: `Metrics::render` for scraping by a sidecar
//!
//! Nothing here listens for incoming requests.

pub mod latency_tracker;
pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
