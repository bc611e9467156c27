use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tsredact_common::{Result, StudyError};

/// Keys the study reads and writes in the key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StorageKey {
    ParticipantId,
    OptInDate,
    MsuChoices,
    ViewCounts,
    LastReport,
    OptIn, // legacy participation flag, only ever read
}

impl StorageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::ParticipantId => "studyParticipantId",
            StorageKey::OptInDate => "studyOptInDate",
            StorageKey::MsuChoices => "msuChoices",
            StorageKey::ViewCounts => "viewCounts",
            StorageKey::LastReport => "studyLastReport",
            StorageKey::OptIn => "studyOptIn",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial view of the store: only keys that are present appear.
pub type Entries = BTreeMap<StorageKey, Value>;

/// Async key-value persistence over JSON values.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, keys: &[StorageKey]) -> impl Future<Output = Result<Entries>> + Send;
    fn set(&self, entries: Entries) -> impl Future<Output = Result<()>> + Send;
    fn remove(&self, keys: &[StorageKey]) -> impl Future<Output = Result<()>> + Send;
}

/// In-process store. Writes can be made to fail to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Entries>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Entries) -> Self {
        Self {
            data: Mutex::new(entries),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn dump(&self) -> Entries {
        self.data.lock().await.clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StudyError::Storage("memory store rejected write".into()));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[StorageKey]) -> Result<Entries> {
        let data = self.data.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| data.get(k).map(|v| (*k, v.clone())))
            .collect())
    }

    async fn set(&self, entries: Entries) -> Result<()> {
        self.check_writable()?;
        self.data.lock().await.extend(entries);
        Ok(())
    }

    async fn remove(&self, keys: &[StorageKey]) -> Result<()> {
        self.check_writable()?;
        let mut data = self.data.lock().await;
        for k in keys {
            data.remove(k);
        }
        Ok(())
    }
}

/// Whole store kept as one JSON object in a file. Unknown keys in the file
/// are preserved. Writes go through a temp file + rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(StudyError::Storage(format!("{}: {e}", self.path.display()))),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StudyError::Storage(format!(
                "{}: expected a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(StudyError::Storage(format!("{}: {e}", self.path.display()))),
        }
    }

    async fn write_all(&self, map: Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(&Value::Object(map))?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| StudyError::Storage(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StudyError::Storage(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[StorageKey]) -> Result<Entries> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        Ok(keys
            .iter()
            .filter_map(|k| map.remove(k.as_str()).map(|v| (*k, v)))
            .collect())
    }

    async fn set(&self, entries: Entries) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        for (k, v) in entries {
            map.insert(k.as_str().to_string(), v);
        }
        self.write_all(map).await
    }

    async fn remove(&self, keys: &[StorageKey]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        let before = map.len();
        for k in keys {
            map.remove(k.as_str());
        }
        if map.len() == before {
            return Ok(());
        }
        self.write_all(map).await
    }
}

#[cfg(test)]
mod tests_storage {
    use super::*;
    use serde_json::json;

    fn entries(pairs: &[(StorageKey, Value)]) -> Entries {
        pairs.iter().cloned().collect()
    }

    #[tokio::test]
    async fn memory_get_returns_only_present_keys() {
        let store = MemoryStore::new();
        store
            .set(entries(&[(StorageKey::ParticipantId, json!("abc"))]))
            .await
            .unwrap();
        let got = store
            .get(&[StorageKey::ParticipantId, StorageKey::OptInDate])
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[&StorageKey::ParticipantId], json!("abc"));
    }

    #[tokio::test]
    async fn memory_failed_write_leaves_state() {
        let store = MemoryStore::with_entries(entries(&[(StorageKey::ViewCounts, json!({}))]));
        store.set_fail_writes(true);
        let err = store
            .set(entries(&[(StorageKey::ViewCounts, json!({ "0": { "a": 1 } }))]))
            .await;
        assert!(matches!(err, Err(StudyError::Storage(_))));
        assert!(store.remove(&[StorageKey::ViewCounts]).await.is_err());
        assert_eq!(store.dump().await[&StorageKey::ViewCounts], json!({}));
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("storage.json"));
        assert!(store.get(&[StorageKey::MsuChoices]).await.unwrap().is_empty());
        // removing from an absent file does not create it
        store.remove(&[StorageKey::MsuChoices]).await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");
        {
            let store = JsonFileStore::new(&path);
            store
                .set(entries(&[
                    (StorageKey::OptInDate, json!("2020-01-01")),
                    (StorageKey::MsuChoices, json!([])),
                ]))
                .await
                .unwrap();
        }
        let store = JsonFileStore::new(&path);
        let got = store.get(&[StorageKey::OptInDate]).await.unwrap();
        assert_eq!(got[&StorageKey::OptInDate], json!("2020-01-01"));

        store.remove(&[StorageKey::OptInDate]).await.unwrap();
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, json!({ "msuChoices": [] }));
    }

    #[tokio::test]
    async fn file_store_keeps_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, r#"{"ghrOn": true}"#).unwrap();
        let store = JsonFileStore::new(&path);
        store
            .set(entries(&[(StorageKey::ParticipantId, json!("p"))]))
            .await
            .unwrap();
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["ghrOn"], json!(true));
        assert_eq!(raw["studyParticipantId"], json!("p"));
    }

    #[tokio::test]
    async fn file_store_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "[1, 2").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.get(&[StorageKey::ViewCounts]).await,
            Err(StudyError::Storage(_))
        ));
    }
}
