use crate::domain::errors::ArtifactError;
use crate::domain::ml::{ArtifactFile, ArtifactKey};
use crate::domain::ports::ArtifactStore;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Artifacts stored as `{tag}_{symbol}.json` and `{tag}_{symbol}_scaler.json`
/// in a single directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &ArtifactKey, file: ArtifactFile) -> PathBuf {
        self.dir.join(file.file_name(key))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, key: &ArtifactKey, file: ArtifactFile) -> bool {
        self.path(key, file).is_file()
    }

    fn read(&self, key: &ArtifactKey, file: ArtifactFile) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path(key, file);
        fs::read(&path).map_err(|source| {
            let path = path.display().to_string();
            if source.kind() == ErrorKind::NotFound {
                ArtifactError::NotFound { path }
            } else {
                ArtifactError::Io { path, source }
            }
        })
    }

    /// Writes through a temporary file and renames it into place, so readers
    /// never observe a partially written artifact.
    fn write(
        &self,
        key: &ArtifactKey,
        file: ArtifactFile,
        bytes: &[u8],
    ) -> Result<(), ArtifactError> {
        let path = self.path(key, file);
        let io_err = |source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;
        debug!("FsArtifactStore: Wrote {}", path.display());
        Ok(())
    }

    fn modified(&self, key: &ArtifactKey, file: ArtifactFile) -> Option<DateTime<Utc>> {
        fs::metadata(self.path(key, file))
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    }

    fn describe(&self, key: &ArtifactKey, file: ArtifactFile) -> String {
        self.path(key, file).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::Architecture;

    #[test]
    fn test_write_read_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("models"));
        let key = ArtifactKey::new(Architecture::GatedRecurrent, "AAPL");

        assert!(!store.exists(&key, ArtifactFile::Weights));
        assert!(matches!(
            store.read(&key, ArtifactFile::Weights),
            Err(ArtifactError::NotFound { .. })
        ));

        store.write(&key, ArtifactFile::Weights, b"{}").unwrap();
        assert!(store.exists(&key, ArtifactFile::Weights));
        assert!(!store.exists(&key, ArtifactFile::Scaler));
        assert_eq!(store.read(&key, ArtifactFile::Weights).unwrap(), b"{}");
        assert!(store.modified(&key, ArtifactFile::Weights).is_some());
        assert!(store.describe(&key, ArtifactFile::Weights).ends_with("gru_aapl.json"));
    }
}
