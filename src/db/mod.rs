//! Namespaced key-value store abstraction.
//!
//! Every persistent record family of the node (block bytes, indexes, trie
//! nodes, metadata) goes through this trait. Two implementations: an
//! in-memory store for tests and a sled-backed durable store where each
//! namespace is an independent tree created on first write.

use thiserror::Error;

pub mod memory;
pub mod sled_store;

pub use memory::MemKvStore;
pub use sled_store::SledKvStore;

#[derive(Debug, Error)]
pub enum DbError {
    /// Malformed request, e.g. mismatched batch vector lengths.
    #[error("invalid db operation: {0}")]
    InvalidOperation(String),
    #[error("not found: ns = {ns}, key = {key}")]
    NotFound { ns: String, key: String },
    #[error("already exists: ns = {ns}, key = {key}")]
    AlreadyExists { ns: String, key: String },
    #[error("backend failure: {0}")]
    Backend(String),
}

impl DbError {
    pub(crate) fn not_found(ns: &str, key: &[u8]) -> Self {
        DbError::NotFound { ns: ns.to_string(), key: hex::encode(key) }
    }

    pub(crate) fn already_exists(ns: &str, key: &[u8]) -> Self {
        DbError::AlreadyExists { ns: ns.to_string(), key: hex::encode(key) }
    }
}

impl From<sled::Error> for DbError {
    fn from(e: sled::Error) -> Self {
        DbError::Backend(e.to_string())
    }
}

/// Namespaced byte record store.
///
/// `batch_put` is atomic: on any per-record failure the store is observably
/// unchanged. The store is a scoped resource: `start` acquires the backing
/// resource, `stop` releases it; both are idempotent.
pub trait KVStore: Send + Sync {
    fn start(&self) -> Result<(), DbError>;
    fn stop(&self) -> Result<(), DbError>;

    /// Insert or update the record at (ns, key).
    fn put(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), DbError>;
    /// Atomically insert or update a slice of records in one namespace.
    fn batch_put(&self, ns: &str, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<(), DbError>;
    /// Insert only when no record exists at (ns, key).
    fn put_if_absent(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), DbError>;
    /// Fetch the record at (ns, key).
    fn get(&self, ns: &str, key: &[u8]) -> Result<Vec<u8>, DbError>;
    /// Remove the record at (ns, key). Missing keys are not an error.
    fn delete(&self, ns: &str, key: &[u8]) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn exercise_store(store: &dyn KVStore) {
        store.put("ns1", b"k1", b"v1").unwrap();
        assert_eq!(store.get("ns1", b"k1").unwrap(), b"v1");

        // upsert overwrites
        store.put("ns1", b"k1", b"v2").unwrap();
        assert_eq!(store.get("ns1", b"k1").unwrap(), b"v2");

        // namespaces are isolated
        assert!(matches!(store.get("ns2", b"k1"), Err(DbError::NotFound { .. })));

        store.put_if_absent("ns1", b"k2", b"v3").unwrap();
        assert!(matches!(
            store.put_if_absent("ns1", b"k2", b"v4"),
            Err(DbError::AlreadyExists { .. })
        ));
        assert_eq!(store.get("ns1", b"k2").unwrap(), b"v3");

        let keys = vec![b"a".to_vec(), b"b".to_vec()];
        let vals = vec![b"1".to_vec(), b"2".to_vec()];
        store.batch_put("ns3", &keys, &vals).unwrap();
        assert_eq!(store.get("ns3", b"a").unwrap(), b"1");
        assert_eq!(store.get("ns3", b"b").unwrap(), b"2");

        // length mismatch rejected without touching the store
        let short = vec![b"c".to_vec()];
        assert!(matches!(
            store.batch_put("ns3", &short, &vals),
            Err(DbError::InvalidOperation(_))
        ));
        assert!(matches!(store.get("ns3", b"c"), Err(DbError::NotFound { .. })));

        store.delete("ns1", b"k1").unwrap();
        assert!(matches!(store.get("ns1", b"k1"), Err(DbError::NotFound { .. })));
        // idempotent on missing keys
        store.delete("ns1", b"k1").unwrap();
    }

    #[test]
    fn mem_store_semantics() {
        let store = MemKvStore::new();
        store.start().unwrap();
        exercise_store(&store);
        store.stop().unwrap();
    }

    #[test]
    fn sled_store_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledKvStore::new(dir.path().join("kv.db"));
        store.start().unwrap();
        exercise_store(&store);
        store.stop().unwrap();
    }

    #[test]
    fn mem_store_concurrent_writers() {
        let store = Arc::new(MemKvStore::new());
        let mut handles = Vec::new();
        for t in 0..4u8 {
            let s = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100u32 {
                    let key = [&[t], i.to_be_bytes().as_slice()].concat();
                    s.put("ns", &key, b"v").unwrap();
                    s.get("ns", &key).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
