//! Composition root shared by the binaries.

use crate::application::explainability::estimator::default_estimator;
use crate::application::market_data::feature_builder::FeatureSequenceBuilder;
use crate::application::market_data::history_source::HistorySource;
use crate::application::ml::registry::ArtifactRegistry;
use crate::application::ml::weights::ModelWeights;
use crate::application::service::{ForecastService, ForecastServiceBuilder, ServiceSettings};
use crate::config::{Config, DataSource};
use crate::domain::ml::feature_registry::FEATURE_NAMES;
use crate::domain::ml::{Architecture, ArtifactKey, MinMaxScaler};
use crate::domain::ports::MarketDataProvider;
use crate::infrastructure::artifacts::FsArtifactStore;
use crate::infrastructure::artifacts::fixtures::install;
use crate::infrastructure::cache::InMemoryTtlCache;
use crate::infrastructure::market_data::{CsvMarketDataProvider, MockMarketDataProvider};
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Long-lived objects of one process.
pub struct Runtime {
    pub service: Arc<ForecastService>,
    pub registry: Arc<ArtifactRegistry>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub metrics: Metrics,
}

pub fn build_runtime(config: &Config) -> Result<Runtime> {
    let metrics = Metrics::new().context("Failed to create metrics registry")?;

    let store = Arc::new(FsArtifactStore::new(&config.artifacts.dir));
    info!(
        "Bootstrap: Artifacts from {} (retention {:?})",
        config.artifacts.dir.display(),
        config.artifacts.retention()
    );
    let registry = Arc::new(
        ArtifactRegistry::new(store)
            .with_retention(config.artifacts.retention())
            .with_metrics(metrics.clone()),
    );

    let provider: Arc<dyn MarketDataProvider> = match config.market_data.source {
        DataSource::Mock => {
            warn!("Bootstrap: Using synthetic market data");
            Arc::new(MockMarketDataProvider::generating())
        }
        DataSource::Csv => {
            info!(
                "Bootstrap: Market data from CSV files in {}",
                config.market_data.csv_dir.display()
            );
            Arc::new(CsvMarketDataProvider::new(&config.market_data.csv_dir))
        }
    };

    let settings = ServiceSettings {
        max_concurrent: config.inference.max_concurrent,
        timeout: config.inference.timeout(),
        forecast_ttl: Duration::from_secs(config.inference.forecast_cache_ttl_seconds),
        explain_ttl: Duration::from_secs(config.explain.cache_ttl_seconds),
        comparison_ttl: Duration::from_secs(config.inference.comparison_cache_ttl_seconds),
    };

    let service = ForecastServiceBuilder::new(Arc::clone(&registry), Arc::clone(&provider))
        .policy(config.market_data.policy())
        .estimator(default_estimator(config.explain.budget()))
        .background_samples(config.explain.background_samples)
        .settings(settings)
        .cache(Arc::new(InMemoryTtlCache::new(
            config.inference.cache_max_entries,
        )))
        .metrics(metrics.clone())
        .build();

    Ok(Runtime {
        service: Arc::new(service),
        registry,
        provider,
        metrics,
    })
}

/// Writes untrained artifacts for `symbol`: seeded random weights that
/// satisfy the tensor contract, paired with a scaler fitted on the
/// symbol's own feature history. Lets the pipeline run end to end before
/// real training output exists.
pub async fn scaffold_artifacts(
    runtime: &Runtime,
    config: &Config,
    symbol: &str,
    architectures: &[Architecture],
    seed: u64,
) -> Result<Vec<ArtifactKey>> {
    let history = HistorySource::new(Arc::clone(&runtime.provider), config.market_data.policy());
    let snapshot = history.fetch(symbol).await?;
    let matrix = FeatureSequenceBuilder::new().feature_matrix(symbol, &snapshot.candles)?;
    let scaler = MinMaxScaler::fit(matrix.values.view(), FEATURE_NAMES);

    let store = runtime.registry.store();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut written = Vec::new();
    for &architecture in architectures {
        let key = ArtifactKey::new(architecture, symbol);
        let weights = ModelWeights::initialize(architecture, &mut rng);
        install(store.as_ref(), &key, &weights, &scaler)
            .with_context(|| format!("Failed to write artifact {}", key))?;
        info!(
            "Bootstrap: Wrote untrained {} artifact for {} ({} rows fitted)",
            architecture,
            symbol,
            matrix.rows()
        );
        written.push(key);
    }
    runtime.registry.clear();
    Ok(written)
}
