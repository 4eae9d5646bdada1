//! Trendcast command line
//!
//! Runs a single forecasting operation and prints the JSON result.
//!
//! # Usage
//! ```sh
//! cargo run -- scaffold AAPL
//! cargo run -- forecast AAPL --horizon 7d
//! cargo run -- explain AAPL --architecture gated-recurrent
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;
use trendcast::application::bootstrap::{build_runtime, scaffold_artifacts};
use trendcast::application::service::{ErrorResponse, ExplainRequest, ForecastRequest};
use trendcast::config::Config;
use trendcast::domain::errors::ForecastError;
use trendcast::domain::ml::{Architecture, Horizon};

#[derive(Parser)]
#[command(author, version, about = "Multi-model price forecasting with explanations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ensemble forecast over the 7, 15 and 30 day horizons
    Forecast {
        symbol: String,
        /// Only this horizon (7d, 15d or 30d)
        #[arg(long)]
        horizon: Option<Horizon>,
    },
    /// Per-feature attribution of one architecture's latest prediction
    Explain {
        symbol: String,
        #[arg(long, default_value = "stacked-recurrent")]
        architecture: Architecture,
    },
    /// Which trained architectures exist for a symbol
    Status { symbol: String },
    /// Historical predictions against realized closes
    Compare {
        symbol: String,
        #[arg(long, default_value_t = 100)]
        days: usize,
    },
    /// Write untrained placeholder artifacts for a symbol
    Scaffold {
        symbol: String,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints a categorized error body and exits non-zero for domain errors.
fn report<T: Serialize>(result: Result<T, ForecastError>) -> Result<()> {
    match result {
        Ok(value) => print_json(&value),
        Err(e) => {
            print_json(&ErrorResponse::from(&e))?;
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays machine-readable
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stderr_layer)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let runtime = build_runtime(&config)?;
    let service = &runtime.service;

    match cli.command {
        Command::Forecast { symbol, horizon } => {
            report(service.forecast(ForecastRequest { symbol, horizon }).await)
        }
        Command::Explain {
            symbol,
            architecture,
        } => report(
            service
                .explain(ExplainRequest {
                    symbol,
                    architecture,
                })
                .await,
        ),
        Command::Status { symbol } => report(service.status(&symbol).await),
        Command::Compare { symbol, days } => report(service.compare(&symbol, days).await),
        Command::Scaffold { symbol, seed } => {
            let keys =
                scaffold_artifacts(&runtime, &config, &symbol, &Architecture::ALL, seed).await?;
            info!("Scaffolded {} artifacts for {}", keys.len(), symbol);
            print_json(&keys.iter().map(|k| k.to_string()).collect::<Vec<_>>())
        }
    }
}
