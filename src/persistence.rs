//! §4.6 Persistence — key→value override store, one JSON file per policy.
//!
//! Grounded in the original source's `JsonFilePersistence`/`KeyValuePersistence`,
//! upgraded to atomic whole-file writes (write-to-temp + rename) since the
//! original performs a plain read-modify-write.

use crate::error::{BridgeError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A durable key→string map persisted to one JSON file.
pub struct KeyValuePersistence {
    path: PathBuf,
}

impl KeyValuePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads all entries. A missing file or malformed JSON is treated as an
    /// empty store with a warning logged; this method never fails.
    pub async fn load_all(&self) -> HashMap<String, String> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read persistence file");
                return HashMap::new();
            }
        };
        match serde_json::from_str::<HashMap<String, String>>(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to parse persistence file, treating as empty");
                HashMap::new()
            }
        }
    }

    /// Stores one key, rewriting the whole file atomically (temp + rename).
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.load_all().await;
        map.insert(key.to_string(), value.to_string());
        self.write_all(&map).await
    }

    async fn write_all(&self, map: &HashMap<String, String>) -> Result<()> {
        let serialized = serde_json::to_string_pretty(map).map_err(|e| BridgeError::PersistenceIo {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, serialized).await.map_err(|e| BridgeError::PersistenceIo {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| BridgeError::PersistenceIo {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_like_helper::temp_file_path;

    mod tempfile_like_helper {
        use std::path::PathBuf;
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub fn temp_file_path(name: &str) -> PathBuf {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            std::env::temp_dir().join(format!("fieldbus-bridge-test-{name}-{n}.json"))
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let path = temp_file_path("missing");
        let store = KeyValuePersistence::new(path);
        assert!(store.load_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_put_then_load_round_trips() {
        let path = temp_file_path("roundtrip");
        let store = KeyValuePersistence::new(&path);
        store.put("dev1.t", "250").await.unwrap();
        let loaded = store.load_all().await;
        assert_eq!(loaded.get("dev1.t"), Some(&"250".to_string()));
        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn test_malformed_file_treated_as_empty() {
        let path = temp_file_path("malformed");
        tokio::fs::write(&path, "not json").await.unwrap();
        let store = KeyValuePersistence::new(&path);
        assert!(store.load_all().await.is_empty());
        tokio::fs::remove_file(&path).await.ok();
    }
}
