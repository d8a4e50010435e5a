//! JSON file store.
//!
//! The whole map is rewritten on every `set`/`delete` (temp file + rename), which
//! suits the handful of checkpoint keys a runtime holds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{PersistenceError, PersistenceStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Store backed by a single JSON file.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Entry>>,
}

impl FileStore {
    /// Open the store, loading existing entries if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let mut entries: HashMap<String, Entry> = HashMap::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            entries = serde_json::from_reader(reader)?;
            let now = Utc::now();
            entries.retain(|_, entry| entry.expires_at > now);
            tracing::info!(path = %path.display(), entries = entries.len(), "Loaded persisted state");
        }

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, entries: &HashMap<String, Entry>) -> Result<(), PersistenceError> {
        let encoded = serde_json::to_vec(entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, encoded).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::trace!(path = %self.path.display(), entries = entries.len(), "Persisted state file");
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), PersistenceError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        self.flush(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStore::open(&path).unwrap();
        store.set("circuitbreaker:a", "{}".into(), Duration::from_secs(60)).await.unwrap();
        store.set("ratelimiter:a", "[]".into(), Duration::from_secs(60)).await.unwrap();
        store.delete("ratelimiter:a").await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("circuitbreaker:a").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(reopened.get("ratelimiter:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("state.json")).unwrap();
        store.set("k", "v".into(), Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(FileStore::open(&path), Err(PersistenceError::Encoding(_))));
    }
}
