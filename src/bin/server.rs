//! Trendcast Server - line-oriented JSON service
//!
//! Reads one JSON request per line on stdin and writes one JSON reply per
//! line on stdout. Metrics are pushed via structured JSON logs.
//!
//! # Usage
//! ```sh
//! echo '{"op":"forecast","symbol":"AAPL"}' | cargo run --bin server
//! ```
//!
//! # Environment Variables
//! - `OBSERVABILITY_ENABLED` - Enable metrics reporting (default: true)
//! - `METRICS_REPORT_INTERVAL_SECONDS` - Seconds between metric outputs (default: 60)

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;
use trendcast::application::bootstrap::build_runtime;
use trendcast::application::service::{ServiceReply, ServiceRequest};
use trendcast::config::Config;
use trendcast::infrastructure::observability::MetricsReporter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Logs on stderr; stdout carries replies
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stderr_layer)
        .init();

    info!("Trendcast Server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: Artifacts={}, Source={:?}, Concurrency={}",
        config.artifacts.dir.display(),
        config.market_data.source,
        config.inference.max_concurrent
    );

    let runtime = build_runtime(&config)?;

    if config.observability.enabled {
        let reporter = MetricsReporter::new(
            Arc::clone(&runtime.registry),
            runtime.metrics.clone(),
            config.observability.report_interval_seconds,
        );
        tokio::spawn(async move {
            reporter.run().await;
        });
        info!(
            "Metrics reporter started (interval: {}s)",
            config.observability.report_interval_seconds
        );
    } else {
        info!("Metrics reporting disabled.");
    }

    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = reply_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Server ready. Send one JSON request per line; Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting...");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed. Exiting...");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let service = Arc::clone(&runtime.service);
                let tx = reply_tx.clone();
                tokio::spawn(async move {
                    let json = match serde_json::from_str::<ServiceRequest>(&line) {
                        Ok(request) => serde_json::to_string(&service.handle(request).await),
                        Err(e) => {
                            warn!("Rejected malformed request: {}", e);
                            serde_json::to_string(&ServiceReply::invalid_request(e.to_string()))
                        }
                    };
                    match json {
                        Ok(json) => {
                            let _ = tx.send(json);
                        }
                        Err(e) => warn!("Failed to encode reply: {}", e),
                    }
                });
            }
        }
    }

    drop(reply_tx);
    let _ = writer.await;
    Ok(())
}
