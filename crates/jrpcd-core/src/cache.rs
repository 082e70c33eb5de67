//! Persistent response cache.
//!
//! A thin wrapper over an embedded ordered key/value store. Keys are the
//! UTF-8 bytes of request fingerprints; values are canonical JSON response
//! mappings with their `id` field removed. There is no TTL and no
//! eviction: only calls whose result is a pure function of their params
//! are ever written here.

use std::path::Path;

use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache store error: {0}")]
    Store(#[from] sled::Error),
}

/// Handle to the response cache, shared across requests.
///
/// The disabled variant is used when no cache directory is configured:
/// reads always miss and writes are dropped.
#[derive(Debug, Clone)]
pub struct CacheStore {
    db: Option<sled::Db>,
}

impl CacheStore {
    /// Opens (or creates) the store under the given directory.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        Ok(Self { db: Some(sled::open(dir)?) })
    }

    /// A store that misses every read and ignores every write.
    pub fn disabled() -> Self {
        Self { db: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.db.is_some()
    }

    /// Point read. Store failures are logged and reported as a miss; a
    /// cache problem must never affect the response to the client.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let db = self.db.as_ref()?;
        match db.get(key) {
            Ok(value) => value.map(|bytes| bytes.to_vec()),
            Err(err) => {
                error!(key = %String::from_utf8_lossy(key), error = %err, "cache read failed");
                None
            }
        }
    }

    /// Atomic multi-key write: either all pairs become visible or none.
    pub fn put_many(&self, pairs: Vec<(String, Vec<u8>)>) -> Result<(), CacheError> {
        let Some(db) = self.db.as_ref() else {
            return Ok(());
        };

        let mut batch = sled::Batch::default();
        for (key, value) in pairs {
            batch.insert(key.as_bytes(), value);
        }
        db.apply_batch(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_many_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();

        store
            .put_many(vec![
                ("k1".to_string(), b"v1".to_vec()),
                ("k2".to_string(), b"v2".to_vec()),
            ])
            .unwrap();

        assert_eq!(store.get(b"k1").as_deref(), Some(b"v1".as_ref()));
        assert_eq!(store.get(b"k2").as_deref(), Some(b"v2".as_ref()));
        assert_eq!(store.get(b"k3"), None);
    }

    #[test]
    fn later_writes_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();

        store.put_many(vec![("k".to_string(), b"old".to_vec())]).unwrap();
        store.put_many(vec![("k".to_string(), b"new".to_vec())]).unwrap();

        assert_eq!(store.get(b"k").as_deref(), Some(b"new".as_ref()));
    }

    #[test]
    fn disabled_store_is_inert() {
        let store = CacheStore::disabled();
        assert!(!store.is_enabled());
        store.put_many(vec![("k".to_string(), b"v".to_vec())]).unwrap();
        assert_eq!(store.get(b"k"), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CacheStore::open(dir.path()).unwrap();
            store.put_many(vec![("k".to_string(), b"v".to_vec())]).unwrap();
        }
        let store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"k").as_deref(), Some(b"v".as_ref()));
    }
}
