// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - KEY-VALUE STORE
//
// The engine treats storage as an opaque byte-oriented key→value store.
// Two backends: sled (persistent) and an in-memory map (tests, tooling).
// A block transition writes into a `StagedStore` overlay and only reaches
// the backend, as one batch, once the block has been accepted.
// Every key the engine writes is built by `CacheKey` so namespaces never
// collide between ledger checkpoints, trie nodes and persisted snapshots.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::header::RewardKind;
use crate::{Hash, ENGINE_NAMESPACE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("codec failure: {0}")]
    Codec(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

/// Blocking byte store. No retries: a failure surfaces to the caller as-is.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply puts (`Some`) and deletes (`None`) together. Backends that can
    /// apply them atomically override this.
    fn write_batch(&self, batch: &[(Vec<u8>, Option<Vec<u8>>)]) -> Result<(), StoreError> {
        for (key, value) in batch {
            match value {
                Some(value) => self.put(key, value)?,
                None => self.delete(key)?,
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// KEY NAMESPACES
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey {
    /// Per-block lock ledger checkpoint, keyed by block hash
    LockL1(RewardKind, Hash),
    /// Merged lock ledger checkpoint, keyed by the block that produced it
    LockL2(RewardKind, Hash),
    /// Trie node, keyed by node hash
    TrieNode(Hash),
    /// Persisted snapshot, keyed by block hash
    Snapshot(Hash),
    /// Flat FUL balance map, keyed by its content hash
    FulBalances(Hash),
}

impl CacheKey {
    pub fn to_bytes(&self) -> Vec<u8> {
        let (prefix, hash) = match self {
            CacheKey::LockL1(kind, hash) => {
                (format!("{}-{}-l1-", ENGINE_NAMESPACE, kind.namespace()), hash)
            }
            CacheKey::LockL2(kind, hash) => {
                (format!("{}-{}-l2-", ENGINE_NAMESPACE, kind.namespace()), hash)
            }
            CacheKey::TrieNode(hash) => (format!("{}-trie-", ENGINE_NAMESPACE), hash),
            CacheKey::Snapshot(hash) => (format!("{}-snapshot-", ENGINE_NAMESPACE), hash),
            CacheKey::FulBalances(hash) => (format!("{}-ful-", ENGINE_NAMESPACE), hash),
        };
        let mut key = prefix.into_bytes();
        key.extend_from_slice(hash.as_bytes());
        key
    }
}

/// Load and decode a blob that must exist.
pub fn load_blob<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &CacheKey,
) -> Result<T, StoreError> {
    match try_load_blob(store, key)? {
        Some(value) => Ok(value),
        None => Err(StoreError::NotFound(format!("{:?}", key))),
    }
}

pub fn try_load_blob<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &CacheKey,
) -> Result<Option<T>, StoreError> {
    match store.get(&key.to_bytes())? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

pub fn save_blob<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &CacheKey,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = bincode::serialize(value)?;
    store.put(&key.to_bytes(), &bytes)
}

// ─────────────────────────────────────────────────────────────────
// BACKENDS
// ─────────────────────────────────────────────────────────────────

/// Persistent store on sled
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        Ok(Self { db })
    }

    /// Write dirty pages to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db.remove(key)?;
        Ok(())
    }

    fn write_batch(&self, batch: &[(Vec<u8>, Option<Vec<u8>>)]) -> Result<(), StoreError> {
        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch {
            match value {
                Some(value) => sled_batch.insert(key.as_slice(), value.as_slice()),
                None => sled_batch.remove(key.as_slice()),
            }
        }
        self.db.apply_batch(sled_batch)?;
        Ok(())
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys under a byte prefix
    pub fn count_prefix(&self, prefix: &[u8]) -> usize {
        self.entries
            .read()
            .map(|e| e.keys().filter(|k| k.starts_with(prefix)).count())
            .unwrap_or(0)
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: &[(Vec<u8>, Option<Vec<u8>>)]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        for (key, value) in batch {
            match value {
                Some(value) => entries.insert(key.clone(), value.clone()),
                None => entries.remove(key),
            };
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// STAGING OVERLAY
// ─────────────────────────────────────────────────────────────────

/// Write overlay on top of another store.
///
/// Reads see pending writes first. Nothing reaches the base until `commit`,
/// which hands every pending write to `KeyValueStore::write_batch` at once.
/// Dropping the overlay discards its writes.
pub struct StagedStore {
    base: Arc<dyn KeyValueStore>,
    pending: RwLock<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl StagedStore {
    pub fn new(base: Arc<dyn KeyValueStore>) -> Self {
        Self {
            base,
            pending: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn base(&self) -> &Arc<dyn KeyValueStore> {
        &self.base
    }

    /// Pending puts and deletes
    pub fn pending_len(&self) -> usize {
        self.pending.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Flush every pending write to the base; returns how many were written
    pub fn commit(&self) -> Result<usize, StoreError> {
        let mut pending = self.pending.write().map_err(|_| poisoned())?;
        if pending.is_empty() {
            return Ok(0);
        }
        let batch: Vec<(Vec<u8>, Option<Vec<u8>>)> =
            pending.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.base.write_batch(&batch)?;
        pending.clear();
        Ok(batch.len())
    }
}

impl KeyValueStore for StagedStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let pending = self.pending.read().map_err(|_| poisoned())?;
        match pending.get(key) {
            Some(value) => Ok(value.clone()),
            None => self.base.get(key),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut pending = self.pending.write().map_err(|_| poisoned())?;
        pending.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut pending = self.pending.write().map_err(|_| poisoned())?;
        pending.insert(key.to_vec(), None);
        Ok(())
    }
}
