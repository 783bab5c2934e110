//! Key-value backends and the chain repository on top of them
//!
//! [`KeyValueStore`] is the durable collaborator: string keys, string values,
//! prefix listing. [`ChainStateStore`] owns the JSON encoding of
//! [`ChainState`] and the key namespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::warn;

use super::schema::{self, CHAIN_PREFIX};
use super::state::ChainState;
use crate::fingerprint::Fingerprint;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Malformed record at {key}: {message}")]
    Deserialization { key: String, message: String },

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Removing an absent key is not an error.
    fn delete(&self, key: &str) -> StoreResult<()>;
    /// Keys starting with `prefix`, in ascending order.
    fn list_keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

// =========================================================================
// In-memory backend
// =========================================================================

/// Process-local store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let map = self.map.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut map = self.map.write().map_err(|_| StoreError::LockPoisoned)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut map = self.map.write().map_err(|_| StoreError::LockPoisoned)?;
        map.remove(key);
        Ok(())
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let map = self.map.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// =========================================================================
// JSON file backend
// =========================================================================

/// Whole-file JSON object store. Every write replaces the file through a
/// temp file + rename, so readers never observe a torn document.
#[derive(Debug)]
pub struct JsonFileKv {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileKv {
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| StoreError::Deserialization {
            key: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn save(&self, map: &BTreeMap<String, String>) -> StoreResult<()> {
        let json =
            serde_json::to_string_pretty(map).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> StoreResult<T> {
        let _guard = self.guard.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut map = self.load()?;
        let out = f(&mut map);
        self.save(&map)?;
        Ok(out)
    }
}

impl KeyValueStore for JsonFileKv {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.guard.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.update(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.update(|map| {
            map.remove(key);
        })
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let _guard = self.guard.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(self
            .load()?
            .into_keys()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

// =========================================================================
// Chain repository
// =========================================================================

/// Repository of [`ChainState`] records keyed by fingerprint.
#[derive(Clone)]
pub struct ChainStateStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ChainStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Load one chain. A record that no longer parses is reported as
    /// [`StoreError::Deserialization`] so the caller can discard it.
    pub fn get(&self, fingerprint: &Fingerprint) -> StoreResult<Option<ChainState>> {
        let key = schema::keys::chain(fingerprint.as_str());
        match self.kv.get(&key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Deserialization {
                    key,
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Persist the whole record (last write wins).
    pub fn put(&self, state: &ChainState) -> StoreResult<()> {
        let key = schema::keys::chain(state.fingerprint.as_str());
        let json =
            serde_json::to_string(state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv.set(&key, &json)
    }

    pub fn delete(&self, fingerprint: &Fingerprint) -> StoreResult<()> {
        self.kv.delete(&schema::keys::chain(fingerprint.as_str()))
    }

    /// Fingerprints of every persisted record, parseable or not.
    pub fn list_fingerprints(&self) -> StoreResult<Vec<Fingerprint>> {
        Ok(self
            .kv
            .list_keys_with_prefix(CHAIN_PREFIX)?
            .iter()
            .filter_map(|key| schema::keys::parse_chain(key))
            .map(Fingerprint::from_raw)
            .collect())
    }

    /// Every chain that still parses; malformed records are skipped.
    pub fn list_all(&self) -> StoreResult<Vec<ChainState>> {
        let mut chains = Vec::new();
        for fingerprint in self.list_fingerprints()? {
            match self.get(&fingerprint) {
                Ok(Some(state)) => chains.push(state),
                Ok(None) => {}
                Err(StoreError::Deserialization { key, message }) => {
                    warn!(key = %key, error = %message, "Skipping malformed chain record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(chains)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.kv.list_keys_with_prefix(CHAIN_PREFIX)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::state::SourceMeta;
    use crate::plan::Block;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn chain(fp: &str) -> ChainState {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap();
        ChainState::new(
            Fingerprint::from_raw(fp),
            SourceMeta {
                subject: "Login code".into(),
                link: Some("https://mail.example/msg/1".into()),
                received_at: t0,
                deadline_at: t0,
            },
            vec![Block {
                start: t0,
                lead_minutes: vec![0],
            }],
            "evt-1".into(),
            t0,
        )
    }

    #[test]
    fn test_memory_kv_prefix_listing() {
        let kv = MemoryKv::new();
        kv.set("a:1", "x").unwrap();
        kv.set("a:2", "y").unwrap();
        kv.set("b:1", "z").unwrap();
        assert_eq!(kv.list_keys_with_prefix("a:").unwrap(), vec!["a:1", "a:2"]);
        kv.delete("a:1").unwrap();
        kv.delete("missing").unwrap();
        assert_eq!(kv.get("a:1").unwrap(), None);
        assert_eq!(kv.get("b:1").unwrap().as_deref(), Some("z"));
    }

    #[test]
    fn test_json_file_kv_persists_across_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let kv = JsonFileKv::open(&path).unwrap();
        kv.set("escalation:chain:one", "{}").unwrap();
        kv.set("other", "1").unwrap();
        drop(kv);

        let reopened = JsonFileKv::open(&path).unwrap();
        assert_eq!(
            reopened.list_keys_with_prefix("escalation:").unwrap(),
            vec!["escalation:chain:one"]
        );
        reopened.delete("other").unwrap();
        assert_eq!(reopened.get("other").unwrap(), None);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_chain_store_crud() {
        let store = ChainStateStore::new(Arc::new(MemoryKv::new()));
        assert!(store.is_empty().unwrap());

        let state = chain("LIVE-1-aaaa");
        store.put(&state).unwrap();
        let loaded = store.get(&state.fingerprint).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(store.list_fingerprints().unwrap(), vec![state.fingerprint.clone()]);

        store.delete(&state.fingerprint).unwrap();
        assert!(store.get(&state.fingerprint).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_malformed_record_is_reported_and_skipped() {
        let kv = Arc::new(MemoryKv::new());
        let store = ChainStateStore::new(kv.clone());
        store.put(&chain("LIVE-1-good")).unwrap();
        kv.set(&schema::keys::chain("LIVE-1-bad"), "{not json").unwrap();

        let bad = Fingerprint::from_raw("LIVE-1-bad");
        assert!(matches!(
            store.get(&bad),
            Err(StoreError::Deserialization { .. })
        ));
        assert_eq!(store.list_fingerprints().unwrap().len(), 2);
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].fingerprint.as_str(), "LIVE-1-good");
    }
}
