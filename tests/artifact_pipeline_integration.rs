use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use trendcast::application::explainability::ExplainabilityEngine;
use trendcast::application::explainability::estimator::LinearApproximation;
use trendcast::application::forecasting::EnsembleForecaster;
use trendcast::application::market_data::history_source::MarketSnapshot;
use trendcast::application::ml::registry::ArtifactRegistry;
use trendcast::application::ml::weights::ModelWeights;
use trendcast::domain::errors::{ErrorCategory, ForecastError};
use trendcast::domain::ml::{Architecture, ArtifactKey};
use trendcast::domain::ports::ArtifactStore;
use trendcast::infrastructure::artifacts::FsArtifactStore;
use trendcast::infrastructure::artifacts::fixtures::{install, install_random, valid_scaler};
use trendcast::infrastructure::market_data::mock::synthetic_candles;

fn snapshot(symbol: &str) -> MarketSnapshot {
    MarketSnapshot {
        requested: symbol.to_string(),
        resolved: symbol.to_string(),
        candles: synthetic_candles(symbol, 320, 100.0, 9),
        quote: None,
    }
}

fn fs_registry(dir: &std::path::Path) -> (Arc<FsArtifactStore>, Arc<ArtifactRegistry>) {
    let store = Arc::new(FsArtifactStore::new(dir));
    let registry = Arc::new(ArtifactRegistry::new(store.clone()));
    (store, registry)
}

#[test]
fn test_forecast_from_files_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (store, registry) = fs_registry(dir.path());
    install_random(store.as_ref(), &Architecture::ALL, "AAPL", 1).unwrap();

    for name in [
        "lstm_aapl.json",
        "lstm_aapl_scaler.json",
        "gru_aapl.json",
        "gru_aapl_scaler.json",
        "attention_lstm_aapl.json",
        "attention_lstm_aapl_scaler.json",
    ] {
        assert!(dir.path().join(name).exists(), "{} missing", name);
    }

    let forecaster = EnsembleForecaster::new(registry.clone());
    let report = forecaster.forecast("AAPL", &snapshot("AAPL"), None).unwrap();
    assert_eq!(report.contributing.len(), 3);
    assert!(report.skipped.is_empty());
    assert!(report.ensemble_prediction.is_finite());

    let status = registry.status("AAPL");
    assert!(status.iter().all(|s| s.available && s.last_trained.is_some()));
}

#[test]
fn test_no_artifacts_means_no_models() {
    let dir = tempfile::tempdir().unwrap();
    let (_, registry) = fs_registry(dir.path());
    let forecaster = EnsembleForecaster::new(registry);

    let err = forecaster.forecast("AAPL", &snapshot("AAPL"), None).unwrap_err();
    assert!(matches!(err, ForecastError::NoModelsAvailable { .. }));
    assert_eq!(err.category(), ErrorCategory::NotTrained);
}

#[test]
fn test_weights_without_scaler_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (store, registry) = fs_registry(dir.path());
    install_random(store.as_ref(), &[Architecture::StackedRecurrent], "MSFT", 2).unwrap();
    std::fs::remove_file(dir.path().join("lstm_msft_scaler.json")).unwrap();

    let err = registry
        .load(Architecture::StackedRecurrent, "MSFT")
        .unwrap_err();
    match err {
        ForecastError::ArtifactNotFound { missing, .. } => {
            assert!(missing.contains("lstm_msft_scaler.json"))
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(registry.available("MSFT").is_empty());
}

#[test]
fn test_weights_of_another_architecture_require_retraining() {
    let dir = tempfile::tempdir().unwrap();
    let (store, registry) = fs_registry(dir.path());
    let lstm = ModelWeights::initialize(Architecture::StackedRecurrent, &mut StdRng::seed_from_u64(3));
    install(
        store.as_ref(),
        &ArtifactKey::new(Architecture::GatedRecurrent, "NVDA"),
        &lstm,
        &valid_scaler(),
    )
    .unwrap();

    let err = registry.load(Architecture::GatedRecurrent, "NVDA").unwrap_err();
    assert!(matches!(err, ForecastError::ArchitectureMismatch { .. }));
    assert!(err.requires_retraining());
    assert_eq!(err.category(), ErrorCategory::ModelMismatch);
    assert!(err.to_string().contains("retrain"));

    // The forecaster excludes it rather than failing
    install_random(store.as_ref(), &[Architecture::AttentionRecurrent], "NVDA", 4).unwrap();
    let forecaster = EnsembleForecaster::new(registry);
    let report = forecaster.forecast("NVDA", &snapshot("NVDA"), None).unwrap();
    assert_eq!(report.contributing, vec![Architecture::AttentionRecurrent]);
    assert_eq!(report.skipped, vec![Architecture::GatedRecurrent]);
}

#[test]
fn test_explain_does_not_substitute_architectures() {
    let dir = tempfile::tempdir().unwrap();
    let (store, registry) = fs_registry(dir.path());
    install_random(store.as_ref(), &[Architecture::GatedRecurrent], "TSLA", 5).unwrap();

    let engine = ExplainabilityEngine::new(registry, Arc::new(LinearApproximation));
    let err = engine
        .explain("TSLA", Architecture::StackedRecurrent, &snapshot("TSLA"))
        .unwrap_err();
    assert!(matches!(err, ForecastError::ArtifactNotFound { .. }));

    let explanation = engine
        .explain("TSLA", Architecture::GatedRecurrent, &snapshot("TSLA"))
        .unwrap();
    assert_eq!(explanation.architecture, Architecture::GatedRecurrent);
    assert_eq!(explanation.attributions.len(), 4);
}

#[test]
fn test_atomic_write_leaves_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    install_random(&store, &[Architecture::GatedRecurrent], "SPY", 6).unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().all(|n| n.ends_with(".json")));
    assert!(store.exists(
        &ArtifactKey::new(Architecture::GatedRecurrent, "spy"),
        trendcast::domain::ml::ArtifactFile::Scaler
    ));
}
