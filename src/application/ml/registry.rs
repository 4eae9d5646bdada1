use crate::application::ml::networks::{build_network, layer_specs};
use crate::application::ml::predictor::SequenceModel;
use crate::application::ml::weights::ModelWeights;
use crate::domain::errors::{ArtifactError, ForecastError};
use crate::domain::ml::{Architecture, ArtifactFile, ArtifactKey, MinMaxScaler};
use crate::domain::ports::ArtifactStore;
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long loaded artifacts stay in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    /// Keep for the process lifetime.
    #[default]
    Unbounded,
    /// Reload after the entry has been held this long.
    Ttl(Duration),
}

/// A validated model paired with the scaler from the same training run.
pub struct LoadedArtifact {
    pub key: ArtifactKey,
    pub model: Arc<dyn SequenceModel>,
    pub scaler: MinMaxScaler,
    /// Last-modified time of the weights file.
    pub modified: Option<DateTime<Utc>>,
    loaded_at: Instant,
}

impl std::fmt::Debug for LoadedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedArtifact")
            .field("key", &self.key)
            .field("version", &self.model.version())
            .field("modified", &self.modified)
            .finish()
    }
}

/// Availability of one architecture for a symbol, checked on disk only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactStatus {
    pub architecture: Architecture,
    pub available: bool,
    pub last_trained: Option<DateTime<Utc>>,
}

/// One registry entry. `loaded` is written once; `gate` serialises the
/// first load so concurrent callers share a single disk read.
#[derive(Default)]
struct Slot {
    loaded: OnceLock<Arc<LoadedArtifact>>,
    gate: Mutex<()>,
}

/// Locates, validates and caches trained artifacts keyed by
/// (architecture, symbol).
pub struct ArtifactRegistry {
    store: Arc<dyn ArtifactStore>,
    slots: RwLock<HashMap<ArtifactKey, Arc<Slot>>>,
    retention: RetentionPolicy,
    load_count: AtomicUsize,
    metrics: Option<Metrics>,
}

// Manual Debug implementation for ArtifactRegistry
impl std::fmt::Debug for ArtifactRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactRegistry")
            .field("slots", &"<RwLock>")
            .field("retention", &self.retention)
            .field("load_count", &self.load_count())
            .finish()
    }
}

impl ArtifactRegistry {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            slots: RwLock::new(HashMap::new()),
            retention: RetentionPolicy::Unbounded,
            load_count: AtomicUsize::new(0),
            metrics: None,
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Number of artifacts actually read from storage so far.
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    /// Number of artifacts currently held.
    pub fn cached_count(&self) -> usize {
        let slots = match self.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.values().filter(|s| s.loaded.get().is_some()).count()
    }

    /// Returns the validated model and scaler for `(architecture, symbol)`.
    ///
    /// The first call per key reads and validates both files; concurrent
    /// first callers wait on the same load. Later calls are a map lookup.
    pub fn load(
        &self,
        architecture: Architecture,
        symbol: &str,
    ) -> Result<Arc<LoadedArtifact>, ForecastError> {
        let key = ArtifactKey::new(architecture, symbol);
        let slot = self.slot(&key);

        if let Some(artifact) = slot.loaded.get() {
            return Ok(Arc::clone(artifact));
        }

        let _gate = match slot.gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("ArtifactRegistry: Load gate poisoned for {}, recovering", key);
                poisoned.into_inner()
            }
        };
        if let Some(artifact) = slot.loaded.get() {
            debug!("ArtifactRegistry: {} loaded by a concurrent caller", key);
            return Ok(Arc::clone(artifact));
        }

        let artifact = match self.read_artifact(&key) {
            Ok(artifact) => Arc::new(artifact),
            Err(e) => {
                self.discard_empty(&key, &slot);
                return Err(e);
            }
        };
        let _ = slot.loaded.set(Arc::clone(&artifact));
        if let Some(metrics) = &self.metrics {
            metrics.artifacts_cached.set(self.cached_count() as i64);
        }
        Ok(artifact)
    }

    /// Per-architecture existence check of both files, without
    /// deserializing anything.
    pub fn available(&self, symbol: &str) -> Vec<Architecture> {
        Architecture::ALL
            .into_iter()
            .filter(|arch| self.is_available(&ArtifactKey::new(*arch, symbol)))
            .collect()
    }

    /// Availability and training time of every architecture.
    pub fn status(&self, symbol: &str) -> Vec<ArtifactStatus> {
        Architecture::ALL
            .into_iter()
            .map(|architecture| {
                let key = ArtifactKey::new(architecture, symbol);
                let available = self.is_available(&key);
                ArtifactStatus {
                    architecture,
                    available,
                    last_trained: if available {
                        self.store.modified(&key, ArtifactFile::Weights)
                    } else {
                        None
                    },
                }
            })
            .collect()
    }

    /// Drops every cached entry. Loads in flight finish into detached slots.
    pub fn clear(&self) {
        match self.slots.write() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Removes `slot` after a failed load so unknown keys leave no entry.
    /// A slot that was replaced or filled meanwhile is kept.
    fn discard_empty(&self, key: &ArtifactKey, slot: &Arc<Slot>) {
        let mut slots = match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("ArtifactRegistry: Lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        };
        let unchanged = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && current.loaded.get().is_none());
        if unchanged {
            slots.remove(key);
        }
    }

    fn is_available(&self, key: &ArtifactKey) -> bool {
        ArtifactFile::BOTH
            .iter()
            .all(|file| self.store.exists(key, *file))
    }

    fn is_expired(&self, slot: &Slot) -> bool {
        match (self.retention, slot.loaded.get()) {
            (RetentionPolicy::Ttl(ttl), Some(artifact)) => artifact.loaded_at.elapsed() >= ttl,
            _ => false,
        }
    }

    /// Finds or creates the slot for `key`, replacing it when expired.
    fn slot(&self, key: &ArtifactKey) -> Arc<Slot> {
        {
            let slots = match self.slots.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(slot) = slots.get(key) {
                if !self.is_expired(slot) {
                    return Arc::clone(slot);
                }
            }
        }

        let mut slots = match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("ArtifactRegistry: Lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        };
        let slot = slots.entry(key.clone()).or_default();
        if self.is_expired(slot) {
            info!("ArtifactRegistry: Retention expired for {}, reloading", key);
            *slot = Arc::new(Slot::default());
        }
        Arc::clone(slot)
    }

    fn read_artifact(&self, key: &ArtifactKey) -> Result<LoadedArtifact, ForecastError> {
        let architecture = key.architecture;
        let result = self.read_and_validate(key);
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => "loaded",
                Err(e) if e.requires_retraining() => "mismatch",
                Err(ForecastError::ArtifactIo { .. }) => "io_error",
                Err(_) => "missing",
            };
            metrics.inc_artifact_load(architecture.tag(), outcome);
        }
        result
    }

    fn read_and_validate(&self, key: &ArtifactKey) -> Result<LoadedArtifact, ForecastError> {
        let architecture = key.architecture;
        let symbol = key.symbol().to_string();

        for file in ArtifactFile::BOTH {
            if !self.store.exists(key, file) {
                info!(
                    "ArtifactRegistry: {} not found for {}",
                    self.store.describe(key, file),
                    key
                );
                return Err(ForecastError::ArtifactNotFound {
                    architecture,
                    symbol,
                    missing: self.store.describe(key, file),
                });
            }
        }

        let scaler: MinMaxScaler = self.decode(key, ArtifactFile::Scaler)?;
        if let Some(detail) = scaler.layout_problem() {
            error!(
                architecture = architecture.tag(),
                symbol = %symbol,
                "ArtifactRegistry: Scaler mismatch: {}",
                detail
            );
            return Err(ForecastError::ScalerMismatch {
                architecture,
                symbol,
                detail,
            });
        }

        let weights: ModelWeights = self.decode(key, ArtifactFile::Weights)?;
        let layers = layer_specs(architecture);
        let model = weights
            .validate(architecture, &layers)
            .and_then(|_| build_network(architecture, &weights))
            .map_err(|detail| {
                error!(
                    architecture = architecture.tag(),
                    symbol = %symbol,
                    "ArtifactRegistry: Architecture mismatch: {}",
                    detail
                );
                ForecastError::ArchitectureMismatch {
                    architecture,
                    symbol: symbol.clone(),
                    detail,
                }
            })?;

        self.load_count.fetch_add(1, Ordering::SeqCst);
        info!(
            "ArtifactRegistry: Loaded {} (version {})",
            key,
            model.version()
        );

        Ok(LoadedArtifact {
            key: key.clone(),
            model,
            scaler,
            modified: self.store.modified(key, ArtifactFile::Weights),
            loaded_at: Instant::now(),
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        key: &ArtifactKey,
        file: ArtifactFile,
    ) -> Result<T, ForecastError> {
        let corrupt = |reason: String| {
            error!(
                architecture = key.architecture.tag(),
                symbol = key.symbol(),
                "ArtifactRegistry: Corrupt artifact: {}",
                reason
            );
            ForecastError::ArtifactCorrupt {
                architecture: key.architecture,
                symbol: key.symbol().to_string(),
                reason,
            }
        };

        let bytes = self.store.read(key, file).map_err(|e| match e {
            ArtifactError::NotFound { path } => ForecastError::ArtifactNotFound {
                architecture: key.architecture,
                symbol: key.symbol().to_string(),
                missing: path,
            },
            ArtifactError::Io { path, source } => {
                warn!(
                    architecture = key.architecture.tag(),
                    symbol = key.symbol(),
                    "ArtifactRegistry: Read of {} failed: {}",
                    path,
                    source
                );
                ForecastError::ArtifactIo {
                    architecture: key.architecture,
                    symbol: key.symbol().to_string(),
                    reason: format!("I/O error on {}: {}", path, source),
                }
            }
            other => corrupt(other.to_string()),
        })?;

        serde_json::from_slice(&bytes).map_err(|source| {
            corrupt(
                ArtifactError::Decode {
                    path: self.store.describe(key, file),
                    source,
                }
                .to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::artifacts::MemoryArtifactStore;
    use crate::infrastructure::artifacts::fixtures::{FlakyArtifactStore, store_with, valid_scaler};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_load_is_cached_after_first_read() {
        let store = store_with(&[Architecture::GatedRecurrent], "AAPL", 1);
        let registry = ArtifactRegistry::new(store);

        let first = registry.load(Architecture::GatedRecurrent, "AAPL").unwrap();
        let second = registry.load(Architecture::GatedRecurrent, "aapl").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.load_count(), 1);
        assert_eq!(registry.cached_count(), 1);
    }

    #[test]
    fn test_missing_scaler_is_not_found() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::new(Architecture::StackedRecurrent, "MSFT");
        let mut rng = StdRng::seed_from_u64(1);
        let weights = ModelWeights::initialize(Architecture::StackedRecurrent, &mut rng);
        store.put_json(&key, ArtifactFile::Weights, &weights);

        let registry = ArtifactRegistry::new(Arc::new(store));
        let err = registry
            .load(Architecture::StackedRecurrent, "MSFT")
            .unwrap_err();
        assert!(matches!(err, ForecastError::ArtifactNotFound { ref missing, .. } if missing.contains("scaler")));
        assert!(registry.available("MSFT").is_empty());
    }

    #[test]
    fn test_wrong_architecture_blob_is_mismatch() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::new(Architecture::StackedRecurrent, "TSLA");
        let mut rng = StdRng::seed_from_u64(2);
        let mut gru_blob = ModelWeights::initialize(Architecture::GatedRecurrent, &mut rng);
        gru_blob.architecture = "lstm".to_string();
        store.put_json(&key, ArtifactFile::Weights, &gru_blob);
        store.put_json(&key, ArtifactFile::Scaler, &valid_scaler());

        let registry = ArtifactRegistry::new(Arc::new(store));
        let err = registry
            .load(Architecture::StackedRecurrent, "TSLA")
            .unwrap_err();
        assert!(matches!(err, ForecastError::ArchitectureMismatch { .. }));
        let msg = err.to_string();
        assert!(msg.contains("stacked-recurrent"));
        assert!(msg.contains("tsla"));
        assert!(msg.contains("retrain"));
    }

    #[test]
    fn test_undecodable_file_is_corrupt() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::new(Architecture::GatedRecurrent, "NVDA");
        store.put_bytes(&key, ArtifactFile::Weights, b"{not json".to_vec());
        store.put_json(&key, ArtifactFile::Scaler, &valid_scaler());

        let registry = ArtifactRegistry::new(Arc::new(store));
        let err = registry.load(Architecture::GatedRecurrent, "NVDA").unwrap_err();
        assert!(matches!(err, ForecastError::ArtifactCorrupt { .. }));
        assert!(err.requires_retraining());
    }

    #[test]
    fn test_scaler_feature_count_mismatch() {
        let store = store_with(&[Architecture::GatedRecurrent], "AMD", 3);
        let key = ArtifactKey::new(Architecture::GatedRecurrent, "AMD");
        let mut scaler = valid_scaler();
        scaler.data_min.push(0.0);
        scaler.data_max.push(1.0);
        scaler.feature_names.push("Volume".to_string());
        store.put_json(&key, ArtifactFile::Scaler, &scaler);

        let registry = ArtifactRegistry::new(store);
        let err = registry.load(Architecture::GatedRecurrent, "AMD").unwrap_err();
        assert!(matches!(err, ForecastError::ScalerMismatch { .. }));
    }

    #[test]
    fn test_ttl_retention_reloads() {
        let store = store_with(&[Architecture::GatedRecurrent], "AAPL", 1);
        let registry =
            ArtifactRegistry::new(store).with_retention(RetentionPolicy::Ttl(Duration::ZERO));

        registry.load(Architecture::GatedRecurrent, "AAPL").unwrap();
        registry.load(Architecture::GatedRecurrent, "AAPL").unwrap();
        assert_eq!(registry.load_count(), 2);
    }

    #[test]
    fn test_status_reports_training_time_only_when_available() {
        let store = store_with(&[Architecture::AttentionRecurrent], "SPY", 4);
        let registry = ArtifactRegistry::new(store);
        let status = registry.status("SPY");
        assert_eq!(status.len(), 3);
        for entry in status {
            let expected = entry.architecture == Architecture::AttentionRecurrent;
            assert_eq!(entry.available, expected);
            assert_eq!(entry.last_trained.is_some(), expected);
        }
        // Status never deserializes
        assert_eq!(registry.load_count(), 0);
    }

    fn slot_count(registry: &ArtifactRegistry) -> usize {
        match registry.slots.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    #[test]
    fn test_read_error_is_transient_not_corrupt() {
        let store = Arc::new(FlakyArtifactStore::new(store_with(
            &[Architecture::GatedRecurrent],
            "AAPL",
            5,
        )));
        let registry = ArtifactRegistry::new(store.clone());

        let err = registry.load(Architecture::GatedRecurrent, "AAPL").unwrap_err();
        assert!(matches!(err, ForecastError::ArtifactIo { .. }));
        assert!(!err.requires_retraining());
        assert_eq!(err.category(), crate::domain::errors::ErrorCategory::Unavailable);

        store.set_failing(false);
        assert!(registry.load(Architecture::GatedRecurrent, "AAPL").is_ok());
        assert_eq!(registry.load_count(), 1);
    }

    #[test]
    fn test_failed_loads_leave_no_entries() {
        let registry = ArtifactRegistry::new(Arc::new(MemoryArtifactStore::new()));
        for i in 0..200 {
            let symbol = format!("SYM{}", i);
            assert!(registry.load(Architecture::StackedRecurrent, &symbol).is_err());
        }
        assert_eq!(slot_count(&registry), 0);
        assert_eq!(registry.cached_count(), 0);

        let store = store_with(&[Architecture::GatedRecurrent], "AAPL", 6);
        let registry = ArtifactRegistry::new(store);
        registry.load(Architecture::GatedRecurrent, "AAPL").unwrap();
        assert!(registry.load(Architecture::StackedRecurrent, "AAPL").is_err());
        assert_eq!(slot_count(&registry), 1);
    }
}
