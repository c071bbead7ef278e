//! Durable key-value storage

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::UpdateError;
use crate::filesys::file::File;

/// Key holding the version the user currently runs
pub const CURRENT_VERSION_KEY: &str = "currentAppVersion";

/// Key holding the access token of the logged in user
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Key holding the JSON encoded user profile
pub const USER_KEY: &str = "user";

/// Key holding the JSON encoded session returned by the login endpoint
pub const SESSION_KEY: &str = "session";

/// Baseline reported when no version has been accepted yet
pub const DEFAULT_CURRENT_VERSION: &str = "Build #0";

/// String key-value storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, UpdateError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), UpdateError>;

    async fn remove(&self, key: &str) -> Result<(), UpdateError>;
}

/// Key-value store persisted as a single JSON object on disk
pub struct FileKeyValueStore {
    file: File,
    entries: RwLock<Option<BTreeMap<String, String>>>,
}

impl FileKeyValueStore {
    pub fn new(file: File) -> Self {
        Self {
            file,
            entries: RwLock::new(None),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, UpdateError> {
        if !self.file.exists().await {
            return Ok(BTreeMap::new());
        }

        match self.file.read_json::<BTreeMap<String, String>>().await {
            Ok(entries) => Ok(entries),
            Err(UpdateError::JsonError(e)) => {
                warn!(
                    "Storage file {} is corrupt, starting empty: {}",
                    self.file.path().display(),
                    e
                );
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), UpdateError> {
        self.file.write_json(entries).await?;
        self.file.set_permissions_600().await?;
        debug!("Persisted {} storage entries", entries.len());
        Ok(())
    }

    async fn update<F>(&self, mutate: F) -> Result<(), UpdateError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) + Send,
    {
        let mut guard = self.entries.write().await;
        let current = match guard.take() {
            Some(entries) => entries,
            None => self.load().await?,
        };

        // the cache only ever holds what reached the disk
        let mut next = current.clone();
        mutate(&mut next);
        match self.persist(&next).await {
            Ok(()) => {
                *guard = Some(next);
                Ok(())
            }
            Err(e) => {
                *guard = Some(current);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, UpdateError> {
        {
            let cached = self.entries.read().await;
            if let Some(entries) = cached.as_ref() {
                return Ok(entries.get(key).cloned());
            }
        }

        let mut guard = self.entries.write().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.as_ref().and_then(|entries| entries.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), UpdateError> {
        let key = key.to_string();
        let value = value.to_string();
        self.update(move |entries| {
            entries.insert(key, value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), UpdateError> {
        let key = key.to_string();
        self.update(move |entries| {
            entries.remove(&key);
        })
        .await
    }
}

/// In-memory key-value store
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given entries
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, UpdateError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), UpdateError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), UpdateError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Read the persisted baseline version, falling back to the default sentinel
pub async fn current_version(store: &dyn KeyValueStore) -> Result<String, UpdateError> {
    Ok(store
        .get(CURRENT_VERSION_KEY)
        .await?
        .unwrap_or_else(|| DEFAULT_CURRENT_VERSION.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> File {
        let dir = std::env::temp_dir().join(format!(
            "upnotifier-kv-{}-{}",
            name,
            std::process::id()
        ));
        File::new(dir.join("storage.json"))
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.set(CURRENT_VERSION_KEY, "2.2.0").await.unwrap();
        assert_eq!(current_version(&store).await.unwrap(), "2.2.0");

        store.remove(CURRENT_VERSION_KEY).await.unwrap();
        assert_eq!(current_version(&store).await.unwrap(), DEFAULT_CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let file = temp_file("reopen");
        file.delete().await.unwrap();

        let store = FileKeyValueStore::new(file.clone());
        store.set(CURRENT_VERSION_KEY, "Build #12").await.unwrap();
        store.set(ACCESS_TOKEN_KEY, "token").await.unwrap();
        store.remove(ACCESS_TOKEN_KEY).await.unwrap();

        let reopened = FileKeyValueStore::new(file.clone());
        assert_eq!(
            reopened.get(CURRENT_VERSION_KEY).await.unwrap().as_deref(),
            Some("Build #12")
        );
        assert_eq!(reopened.get(ACCESS_TOKEN_KEY).await.unwrap(), None);

        file.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_tolerates_corrupt_file() {
        let file = temp_file("corrupt");
        file.write_atomic(b"not json").await.unwrap();

        let store = FileKeyValueStore::new(file.clone());
        assert_eq!(store.get(CURRENT_VERSION_KEY).await.unwrap(), None);

        store.set(CURRENT_VERSION_KEY, "1.0.0").await.unwrap();
        let reopened = FileKeyValueStore::new(file.clone());
        assert_eq!(
            reopened.get(CURRENT_VERSION_KEY).await.unwrap().as_deref(),
            Some("1.0.0")
        );

        file.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_untouched() {
        let blocker = temp_file("blocked");
        blocker.write_atomic(b"{}").await.unwrap();

        // parent directory is a regular file, so every write fails
        let store = FileKeyValueStore::new(File::new(blocker.path().join("storage.json")));
        assert_eq!(store.get(CURRENT_VERSION_KEY).await.unwrap(), None);

        assert!(store.set(CURRENT_VERSION_KEY, "9.9.9").await.is_err());
        assert_eq!(store.get(CURRENT_VERSION_KEY).await.unwrap(), None);

        blocker.delete().await.unwrap();
    }
}
