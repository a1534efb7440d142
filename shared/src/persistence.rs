use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::PersistenceError;
use crate::model::{RecordKind, TripRecord};

pub const MAX_KEY_LENGTH: usize = 128;
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// Name under which one record collection is persisted.
///
/// Keys double as file names for [`FilePersistence`], so they are validated
/// up front.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: impl Into<String>) -> Result<Self, PersistenceError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    pub fn for_kind(kind: RecordKind) -> Self {
        Self(kind.default_storage_key().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<(), PersistenceError> {
        let invalid = |reason: &str| PersistenceError::InvalidKey {
            key: key.chars().take(50).collect(),
            reason: reason.to_string(),
        };

        if key.trim().is_empty() {
            return Err(invalid("key cannot be empty"));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(invalid("key is too long"));
        }
        if key.contains("..") {
            return Err(invalid("key cannot contain path traversal sequences"));
        }
        if key.contains('/') || key.contains('\\') {
            return Err(invalid("key cannot contain path separators"));
        }
        if key.chars().any(char::is_control) {
            return Err(invalid("key contains control characters"));
        }
        Ok(())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable home of a local-mode collection.
///
/// `read` returns `Ok(None)` when nothing was ever written under `key`.
#[async_trait::async_trait]
pub trait LocalPersistence: Send + Sync {
    async fn read(&self, key: &StorageKey) -> Result<Option<Vec<TripRecord>>, PersistenceError>;
    async fn write(&self, key: &StorageKey, records: &[TripRecord]) -> Result<(), PersistenceError>;
}

fn encode(records: &[TripRecord]) -> Result<Vec<u8>, PersistenceError> {
    let data =
        serde_json::to_vec(records).map_err(|e| PersistenceError::Serialization(e.to_string()))?;
    if data.len() > MAX_VALUE_SIZE {
        return Err(PersistenceError::ValueTooLarge {
            size: data.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(data)
}

fn decode(key: &StorageKey, data: &[u8]) -> Result<Vec<TripRecord>, PersistenceError> {
    if data.len() > MAX_VALUE_SIZE {
        return Err(PersistenceError::ValueTooLarge {
            size: data.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    serde_json::from_slice(data).map_err(|e| PersistenceError::Corrupted {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local storage holding the same JSON bytes a durable store would.
///
/// It can be switched unavailable to behave like blocked browser storage.
#[derive(Default)]
pub struct MemoryPersistence {
    entries: Mutex<HashMap<StorageKey, Vec<u8>>>,
    unavailable: AtomicBool,
    writes: AtomicU64,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Stores bytes verbatim, bypassing encoding.
    pub fn insert_raw(&self, key: &StorageKey, data: impl Into<Vec<u8>>) {
        self.entries.lock().insert(key.clone(), data.into());
    }

    pub fn raw(&self, key: &StorageKey) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("storage disabled".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LocalPersistence for MemoryPersistence {
    async fn read(&self, key: &StorageKey) -> Result<Option<Vec<TripRecord>>, PersistenceError> {
        self.check_available()?;
        let data = self.entries.lock().get(key).cloned();
        data.map(|bytes| decode(key, &bytes)).transpose()
    }

    async fn write(&self, key: &StorageKey, records: &[TripRecord]) -> Result<(), PersistenceError> {
        self.check_available()?;
        let data = encode(records)?;
        self.entries.lock().insert(key.clone(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Files
// ============================================================================

/// One JSON file per key inside `dir`, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait::async_trait]
impl LocalPersistence for FilePersistence {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn read(&self, key: &StorageKey) -> Result<Option<Vec<TripRecord>>, PersistenceError> {
        let path = self.path_for(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no stored collection");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if data.is_empty() {
            return Err(PersistenceError::Corrupted {
                key: key.to_string(),
                reason: "empty file".into(),
            });
        }

        decode(key, &data).map(Some)
    }

    #[instrument(skip(self, key, records), fields(key = %key, count = records.len()))]
    async fn write(&self, key: &StorageKey, records: &[TripRecord]) -> Result<(), PersistenceError> {
        let data = encode(records)?;

        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Position, RecordDraft, RecordId, TripDate};
    use tempfile::tempdir;

    fn sample(id: &str) -> TripRecord {
        RecordDraft::new("Lisbon", Position::new(38.7, -9.1), TripDate::new("2024-03-01"))
            .into_record(RecordId::new(id))
    }

    #[test]
    fn key_validation() {
        assert!(StorageKey::new("guest_cities").is_ok());
        assert!(StorageKey::new("").is_err());
        assert!(StorageKey::new("   ").is_err());
        assert!(StorageKey::new("../etc/passwd").is_err());
        assert!(StorageKey::new("a/b").is_err());
        assert!(StorageKey::new("key\0x").is_err());
        assert!(StorageKey::new("k".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }

    #[test]
    fn default_keys_are_distinct_and_valid() {
        let visited = StorageKey::for_kind(RecordKind::Visited);
        let planned = StorageKey::for_kind(RecordKind::Planned);
        assert_ne!(visited, planned);
        assert!(StorageKey::new(visited.as_str()).is_ok());
        assert!(StorageKey::new(planned.as_str()).is_ok());
    }

    #[tokio::test]
    async fn memory_roundtrip_and_missing_key() {
        let store = MemoryPersistence::new();
        let key = StorageKey::for_kind(RecordKind::Visited);

        assert_eq!(store.read(&key).await.unwrap(), None);

        store.write(&key, &[sample("a")]).await.unwrap();
        let back = store.read(&key).await.unwrap().unwrap();
        assert_eq!(back, vec![sample("a")]);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn memory_reports_corruption() {
        let store = MemoryPersistence::new();
        let key = StorageKey::for_kind(RecordKind::Planned);
        store.insert_raw(&key, b"{not json".to_vec());

        let result = store.read(&key).await;
        assert!(matches!(result, Err(PersistenceError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn memory_unavailable() {
        let store = MemoryPersistence::new();
        let key = StorageKey::for_kind(RecordKind::Visited);
        store.set_available(false);

        assert!(matches!(store.read(&key).await, Err(PersistenceError::Unavailable(_))));
        assert!(matches!(
            store.write(&key, &[]).await,
            Err(PersistenceError::Unavailable(_))
        ));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn file_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FilePersistence::new(dir.path().join("nested"));
        let key = StorageKey::for_kind(RecordKind::Visited);

        store.write(&key, &[sample("a"), sample("b")]).await.unwrap();

        let reopened = FilePersistence::new(dir.path().join("nested"));
        let back = reopened.read(&key).await.unwrap().unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].id.as_str(), "b");
    }

    #[tokio::test]
    async fn file_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = FilePersistence::new(dir.path());
        let key = StorageKey::for_kind(RecordKind::Planned);
        assert_eq!(store.read(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_empty_is_corrupted() {
        let dir = tempdir().unwrap();
        let store = FilePersistence::new(dir.path());
        let key = StorageKey::for_kind(RecordKind::Planned);
        std::fs::write(store.path_for(&key), b"").unwrap();

        assert!(matches!(
            store.read(&key).await,
            Err(PersistenceError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_tmp() {
        let dir = tempdir().unwrap();
        let store = FilePersistence::new(dir.path());
        let key = StorageKey::for_kind(RecordKind::Visited);

        store.write(&key, &[sample("a")]).await.unwrap();

        let path = store.path_for(&key);
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn keys_do_not_collide_on_disk() {
        let dir = tempdir().unwrap();
        let store = FilePersistence::new(dir.path());
        let visited = StorageKey::for_kind(RecordKind::Visited);
        let planned = StorageKey::for_kind(RecordKind::Planned);

        store.write(&visited, &[sample("v")]).await.unwrap();
        store.write(&planned, &[]).await.unwrap();

        assert_eq!(store.read(&visited).await.unwrap().unwrap().len(), 1);
        assert!(store.read(&planned).await.unwrap().unwrap().is_empty());
    }
}
