use crate::domain::errors::ArtifactError;
use crate::domain::ml::{ArtifactFile, ArtifactKey};
use crate::domain::ports::ArtifactStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory artifact store for tests and embedding.
#[derive(Default)]
pub struct MemoryArtifactStore {
    files: RwLock<HashMap<(ArtifactKey, ArtifactFile), (Vec<u8>, DateTime<Utc>)>>,
    reads: AtomicUsize,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_bytes(&self, key: &ArtifactKey, file: ArtifactFile, bytes: Vec<u8>) {
        let mut files = match self.files.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        files.insert((key.clone(), file), (bytes, Utc::now()));
    }

    /// Serializes `value` as the artifact file. Serialization of plain data
    /// structs cannot fail, so an error stores an empty (corrupt) file.
    pub fn put_json<T: Serialize>(&self, key: &ArtifactKey, file: ArtifactFile, value: &T) {
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        self.put_bytes(key, file, bytes);
    }

    pub fn remove(&self, key: &ArtifactKey, file: ArtifactFile) {
        let mut files = match self.files.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        files.remove(&(key.clone(), file));
    }

    /// Number of successful reads, for asserting load behaviour.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn with_file<R>(
        &self,
        key: &ArtifactKey,
        file: ArtifactFile,
        f: impl FnOnce(&(Vec<u8>, DateTime<Utc>)) -> R,
    ) -> Option<R> {
        let files = match self.files.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        files.get(&(key.clone(), file)).map(f)
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn exists(&self, key: &ArtifactKey, file: ArtifactFile) -> bool {
        self.with_file(key, file, |_| ()).is_some()
    }

    fn read(&self, key: &ArtifactKey, file: ArtifactFile) -> Result<Vec<u8>, ArtifactError> {
        let bytes = self
            .with_file(key, file, |(bytes, _)| bytes.clone())
            .ok_or_else(|| ArtifactError::NotFound {
                path: self.describe(key, file),
            })?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(bytes)
    }

    fn write(
        &self,
        key: &ArtifactKey,
        file: ArtifactFile,
        bytes: &[u8],
    ) -> Result<(), ArtifactError> {
        self.put_bytes(key, file, bytes.to_vec());
        Ok(())
    }

    fn modified(&self, key: &ArtifactKey, file: ArtifactFile) -> Option<DateTime<Utc>> {
        self.with_file(key, file, |(_, modified)| *modified)
    }

    fn describe(&self, key: &ArtifactKey, file: ArtifactFile) -> String {
        format!("memory://{}", file.file_name(key))
    }
}
