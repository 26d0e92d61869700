use std::{
    collections::BTreeMap,
    io::Write as _,
    path::{Path, PathBuf},
};

use crate::error::{LoopmuxError, LoopmuxResult};

/// Last rendered background for one source basename.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry {
    pub digest: String,
    pub artifact: PathBuf,
}

/// Persisted map from background-source basename to the digest and artifact
/// of its last render. One writer per basename, last writer wins; no
/// cross-process locking.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheIndex {
    entries: BTreeMap<String, CacheEntry>,
}

impl CacheIndex {
    pub const FILE_NAME: &'static str = "loopmux-cache.json";

    /// Loads the index, degrading to empty (all-miss) when the file is
    /// missing, unreadable or corrupt. Cache trouble never aborts a run.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(
                    "cache index '{}' unreadable ({e}), treating all backgrounds as cache misses",
                    path.display()
                );
                return Self::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(
                    "cache index '{}' is corrupt ({e}), treating all backgrounds as cache misses",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Digest recorded for a basename, but only while its artifact is still
    /// on disk; a vanished artifact is a miss regardless of the record.
    pub fn recorded_digest(&self, basename: &str) -> Option<&str> {
        let entry = self.entries.get(basename)?;
        if entry.artifact.exists() {
            Some(&entry.digest)
        } else {
            None
        }
    }

    pub fn artifact(&self, basename: &str) -> Option<&Path> {
        self.entries.get(basename).map(|e| e.artifact.as_path())
    }

    pub fn record(&mut self, basename: &str, digest: &str, artifact: &Path) {
        self.entries.insert(
            basename.to_string(),
            CacheEntry {
                digest: digest.to_string(),
                artifact: artifact.to_path_buf(),
            },
        );
    }

    /// Atomic write: temp file in the target directory, then rename.
    pub fn save(&self, path: &Path) -> LoopmuxResult<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            LoopmuxError::cache_io(format!(
                "failed to create temp file next to '{}': {e}",
                path.display()
            ))
        })?;
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| LoopmuxError::cache_io(format!("failed to encode cache index: {e}")))?;
        tmp.write_all(&json).map_err(|e| {
            LoopmuxError::cache_io(format!("failed to write cache index: {e}"))
        })?;
        tmp.persist(path).map_err(|e| {
            LoopmuxError::cache_io(format!(
                "failed to move cache index into place at '{}': {e}",
                path.display()
            ))
        })?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join(CacheIndex::FILE_NAME);
        let artifact = dir.path().join("bg-city-0011223344556677.mp4");
        std::fs::write(&artifact, b"fake mp4").unwrap();

        let mut index = CacheIndex::default();
        index.record("city.mp4", "abc123", &artifact);
        index.save(&index_path).unwrap();

        let loaded = CacheIndex::load(&index_path);
        assert_eq!(loaded, index);
        assert_eq!(loaded.recorded_digest("city.mp4"), Some("abc123"));
    }

    #[test]
    fn missing_index_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CacheIndex::load(&dir.path().join("nope.json"));
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_index_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CacheIndex::FILE_NAME);
        std::fs::write(&path, b"{ not json").unwrap();
        let loaded = CacheIndex::load(&path);
        assert!(loaded.is_empty());
    }

    #[test]
    fn vanished_artifact_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("gone.mp4");

        let mut index = CacheIndex::default();
        index.record("city.mp4", "abc123", &artifact);
        assert_eq!(index.recorded_digest("city.mp4"), None);

        std::fs::write(&artifact, b"here now").unwrap();
        assert_eq!(index.recorded_digest("city.mp4"), Some("abc123"));
    }
}
