//! Artifact fixtures for tests and local demos. Training is external, so
//! these produce randomly initialised weights that satisfy the tensor
//! contract, paired with a scaler for the synthetic price band used by
//! the mock market-data provider.

use crate::application::ml::weights::ModelWeights;
use crate::domain::errors::ArtifactError;
use crate::domain::ml::feature_registry::FEATURE_NAMES;
use crate::domain::ml::{Architecture, ArtifactFile, ArtifactKey, MinMaxScaler};
use crate::domain::ports::ArtifactStore;
use crate::infrastructure::artifacts::MemoryArtifactStore;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Scaler covering closes between 60 and 160 and volatility up to 8.
pub fn valid_scaler() -> MinMaxScaler {
    MinMaxScaler {
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        data_min: vec![60.0, 65.0, 70.0, 0.0],
        data_max: vec![160.0, 155.0, 150.0, 8.0],
    }
}

/// Serializes and writes both files of one artifact.
pub fn install(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
    weights: &ModelWeights,
    scaler: &MinMaxScaler,
) -> Result<(), ArtifactError> {
    let encode = |file: ArtifactFile, value: serde_json::Result<Vec<u8>>| {
        value.map_err(|source| ArtifactError::Encode {
            path: store.describe(key, file),
            source,
        })
    };
    let weights = encode(ArtifactFile::Weights, serde_json::to_vec(weights))?;
    let scaler = encode(ArtifactFile::Scaler, serde_json::to_vec(scaler))?;
    store.write(key, ArtifactFile::Weights, &weights)?;
    store.write(key, ArtifactFile::Scaler, &scaler)?;
    Ok(())
}

/// Installs seeded random artifacts for each architecture.
pub fn install_random(
    store: &dyn ArtifactStore,
    architectures: &[Architecture],
    symbol: &str,
    seed: u64,
) -> Result<(), ArtifactError> {
    let mut rng = StdRng::seed_from_u64(seed);
    for &architecture in architectures {
        let weights = ModelWeights::initialize(architecture, &mut rng);
        install(
            store,
            &ArtifactKey::new(architecture, symbol),
            &weights,
            &valid_scaler(),
        )?;
    }
    Ok(())
}

/// In-memory store holding seeded random artifacts for each architecture.
pub fn store_with(
    architectures: &[Architecture],
    symbol: &str,
    seed: u64,
) -> Arc<MemoryArtifactStore> {
    let store = Arc::new(MemoryArtifactStore::new());
    let mut rng = StdRng::seed_from_u64(seed);
    for &architecture in architectures {
        let key = ArtifactKey::new(architecture, symbol);
        let weights = ModelWeights::initialize(architecture, &mut rng);
        store.put_json(&key, ArtifactFile::Weights, &weights);
        store.put_json(&key, ArtifactFile::Scaler, &valid_scaler());
    }
    store
}

/// Zeroes the input-projection columns of every feature not in `keep`, so
/// the network output cannot depend on them.
pub fn mask_input_features(weights: &mut ModelWeights, architecture: Architecture, keep: &[usize]) {
    let first_layer = match architecture {
        Architecture::GatedRecurrent => "gru1.weight_ih_l0",
        Architecture::StackedRecurrent | Architecture::AttentionRecurrent => "lstm1.weight_ih_l0",
    };
    if let Some(tensor) = weights.tensor_mut(first_layer) {
        let cols = tensor.shape.get(1).copied().unwrap_or(1);
        for (i, value) in tensor.data.iter_mut().enumerate() {
            if !keep.contains(&(i % cols)) {
                *value = 0.0;
            }
        }
    }
}

/// Wraps a store so reads can be made to fail with a transient I/O error.
/// Existence checks keep answering from the wrapped store.
pub struct FlakyArtifactStore {
    inner: Arc<MemoryArtifactStore>,
    failing: AtomicBool,
}

impl FlakyArtifactStore {
    pub fn new(inner: Arc<MemoryArtifactStore>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(true),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ArtifactStore for FlakyArtifactStore {
    fn exists(&self, key: &ArtifactKey, file: ArtifactFile) -> bool {
        self.inner.exists(key, file)
    }

    fn read(&self, key: &ArtifactKey, file: ArtifactFile) -> Result<Vec<u8>, ArtifactError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ArtifactError::Io {
                path: self.describe(key, file),
                source: IoError::new(ErrorKind::Interrupted, "interrupted system call"),
            });
        }
        self.inner.read(key, file)
    }

    fn write(
        &self,
        key: &ArtifactKey,
        file: ArtifactFile,
        bytes: &[u8],
    ) -> Result<(), ArtifactError> {
        self.inner.write(key, file, bytes)
    }

    fn modified(&self, key: &ArtifactKey, file: ArtifactFile) -> Option<DateTime<Utc>> {
        self.inner.modified(key, file)
    }

    fn describe(&self, key: &ArtifactKey, file: ArtifactFile) -> String {
        self.inner.describe(key, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_writes_both_files() {
        let store = MemoryArtifactStore::new();
        install_random(&store, &[Architecture::GatedRecurrent], "AAPL", 1).unwrap();
        let key = ArtifactKey::new(Architecture::GatedRecurrent, "AAPL");
        assert!(store.exists(&key, ArtifactFile::Weights));
        assert!(store.exists(&key, ArtifactFile::Scaler));
    }

    #[test]
    fn test_flaky_store_recovers() {
        let store = FlakyArtifactStore::new(store_with(&[Architecture::GatedRecurrent], "AAPL", 2));
        let key = ArtifactKey::new(Architecture::GatedRecurrent, "AAPL");
        assert!(store.exists(&key, ArtifactFile::Weights));
        assert!(matches!(
            store.read(&key, ArtifactFile::Weights),
            Err(ArtifactError::Io { .. })
        ));
        store.set_failing(false);
        assert!(store.read(&key, ArtifactFile::Weights).is_ok());
    }
}
