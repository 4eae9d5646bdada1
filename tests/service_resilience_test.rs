use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use trendcast::application::market_data::history_source::{FallbackPolicy, HistorySource};
use trendcast::application::ml::registry::ArtifactRegistry;
use trendcast::application::service::{
    ExplainRequest, ForecastRequest, ForecastServiceBuilder, ReplyBody, ServiceRequest,
    ServiceSettings,
};
use trendcast::domain::errors::{ErrorCategory, ForecastError};
use trendcast::domain::market::{Candle, Quote};
use trendcast::domain::ml::{Architecture, Horizon};
use trendcast::domain::ports::{MarketDataProvider, ResultCache};
use trendcast::infrastructure::artifacts::fixtures::store_with;
use trendcast::infrastructure::market_data::MockMarketDataProvider;

/// Cache whose backend is always down.
#[derive(Default)]
struct FailingCache {
    calls: AtomicUsize,
}

#[async_trait]
impl ResultCache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("connection refused"))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("connection refused"))
    }
}

/// Provider that answers only after a delay.
struct SlowProvider {
    inner: MockMarketDataProvider,
    delay: Duration,
}

#[async_trait]
impl MarketDataProvider for SlowProvider {
    async fn daily_history(&self, symbol: &str, lookback_days: u32) -> Result<Vec<Candle>> {
        tokio::time::sleep(self.delay).await;
        self.inner.daily_history(symbol, lookback_days).await
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        self.inner.quote(symbol).await
    }
}

fn registry(architectures: &[Architecture], symbol: &str) -> Arc<ArtifactRegistry> {
    Arc::new(ArtifactRegistry::new(store_with(architectures, symbol, 11)))
}

#[tokio::test]
async fn test_cache_outage_does_not_fail_requests() {
    let provider = Arc::new(MockMarketDataProvider::with_synthetic("AAPL", 600, 100.0, 3).await);
    let cache = Arc::new(FailingCache::default());
    let service = ForecastServiceBuilder::new(registry(&Architecture::ALL, "AAPL"), provider)
        .cache(cache.clone())
        .build();

    let first = service
        .forecast(ForecastRequest {
            symbol: "AAPL".to_string(),
            horizon: None,
        })
        .await
        .unwrap();
    let second = service
        .forecast(ForecastRequest {
            symbol: "aapl".to_string(),
            horizon: Some(Horizon::Days7),
        })
        .await
        .unwrap();

    assert_eq!(first.contributing.len(), 3);
    assert_eq!(second.horizons.len(), 1);
    assert!(cache.calls.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn test_slow_market_data_times_out() {
    let provider = Arc::new(SlowProvider {
        inner: MockMarketDataProvider::with_synthetic("MSFT", 600, 100.0, 4).await,
        delay: Duration::from_millis(500),
    });
    let service = ForecastServiceBuilder::new(registry(&[Architecture::GatedRecurrent], "MSFT"), provider)
        .settings(ServiceSettings {
            timeout: Duration::from_millis(20),
            ..ServiceSettings::default()
        })
        .build();

    let err = service
        .forecast(ForecastRequest {
            symbol: "MSFT".to_string(),
            horizon: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForecastError::Timeout { .. }));
    assert_eq!(err.category(), ErrorCategory::Unavailable);
}

#[tokio::test]
async fn test_untrained_symbol_reports_not_trained() {
    let provider = Arc::new(MockMarketDataProvider::with_synthetic("NVDA", 600, 100.0, 5).await);
    let service = ForecastServiceBuilder::new(registry(&[], "NVDA"), provider).build();

    let reply = service
        .handle(ServiceRequest::Forecast(ForecastRequest {
            symbol: "NVDA".to_string(),
            horizon: None,
        }))
        .await;
    assert!(reply.is_error());
    match reply.body {
        ReplyBody::Error(error) => {
            assert_eq!(error.category, "not_trained");
            assert!(!error.retrain_required);
        }
        _ => panic!("expected an error reply"),
    }
}

#[tokio::test]
async fn test_explain_requested_architecture_only() {
    let provider = Arc::new(MockMarketDataProvider::with_synthetic("TSLA", 600, 100.0, 6).await);
    let service =
        ForecastServiceBuilder::new(registry(&[Architecture::GatedRecurrent], "TSLA"), provider)
            .build();

    let err = service
        .explain(ExplainRequest {
            symbol: "TSLA".to_string(),
            architecture: Architecture::StackedRecurrent,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForecastError::ArtifactNotFound { .. }));
}

#[tokio::test]
async fn test_fallback_tries_suffixes_after_lookbacks() {
    let provider = Arc::new(MockMarketDataProvider::new());
    provider
        .set_history(
            "RELIANCE.NS",
            trendcast::infrastructure::market_data::mock::synthetic_candles(
                "RELIANCE.NS",
                600,
                100.0,
                7,
            ),
        )
        .await;
    let history = HistorySource::new(provider.clone(), FallbackPolicy::default());

    let snapshot = history.fetch("reliance").await.unwrap();
    assert_eq!(snapshot.resolved, "RELIANCE.NS");
    assert_eq!(snapshot.requested, "reliance");

    let requests = provider.requests().await;
    let expected: Vec<(String, u32)> = vec![
        ("RELIANCE".to_string(), 730),
        ("RELIANCE".to_string(), 1825),
        ("RELIANCE".to_string(), 7300),
        ("RELIANCE.NS".to_string(), 730),
    ];
    assert_eq!(requests, expected);
}

#[tokio::test]
async fn test_fallback_exhaustion_is_bounded() {
    let provider = Arc::new(MockMarketDataProvider::new());
    provider.fail_symbol("ZZZ").await;
    let policy = FallbackPolicy::default();
    let history = HistorySource::new(provider.clone(), policy.clone());

    let err = history.fetch("ZZZ").await.unwrap_err();
    assert!(matches!(err, ForecastError::MarketData { .. }));
    assert_eq!(provider.requests().await.len(), policy.max_attempts());
}
