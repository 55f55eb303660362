//! Durable KV store backed by sled.
//!
//! Each namespace maps to one sled tree, created on first touch. Batch
//! writes go through `sled::Batch`, which the engine applies atomically;
//! `put_if_absent` uses compare-and-swap so the existence check and the
//! insert land in one step. The store owns its file handle between `start`
//! and `stop`; `stop` flushes before releasing.

use super::{DbError, KVStore};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct SledKvStore {
    path: PathBuf,
    db: RwLock<Option<sled::Db>>,
}

impl SledKvStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            db: RwLock::new(None),
        }
    }

    fn tree(&self, ns: &str) -> Result<sled::Tree, DbError> {
        let guard = self.db.read();
        let db = guard
            .as_ref()
            .ok_or_else(|| DbError::InvalidOperation("store not started".into()))?;
        Ok(db.open_tree(ns)?)
    }

    /// Stage a full batch, then abort the transaction. Exercises the
    /// engine's rollback path: the tree must be unchanged afterwards.
    #[cfg(test)]
    fn batch_put_force_fail(
        &self,
        ns: &str,
        keys: &[Vec<u8>],
        values: &[Vec<u8>],
    ) -> Result<(), DbError> {
        use sled::transaction::{abort, TransactionError};

        if keys.len() != values.len() {
            return Err(DbError::InvalidOperation(format!(
                "batch put size mismatch: {} keys, {} values",
                keys.len(),
                values.len()
            )));
        }
        let tree = self.tree(ns)?;
        let res: Result<(), TransactionError<()>> = tree.transaction(|tx| {
            for (k, v) in keys.iter().zip(values) {
                tx.insert(k.as_slice(), v.as_slice())?;
            }
            abort(())
        });
        match res {
            Err(TransactionError::Abort(())) => {
                Err(DbError::InvalidOperation("forced batch failure".into()))
            }
            Err(TransactionError::Storage(e)) => Err(e.into()),
            Ok(()) => Ok(()),
        }
    }
}

impl KVStore for SledKvStore {
    fn start(&self) -> Result<(), DbError> {
        let mut guard = self.db.write();
        if guard.is_some() {
            return Ok(());
        }
        let existed = self.path.exists();
        let db = sled::open(&self.path)?;
        if !existed {
            restrict_permissions(&self.path);
        }
        *guard = Some(db);
        Ok(())
    }

    fn stop(&self) -> Result<(), DbError> {
        let mut guard = self.db.write();
        if let Some(db) = guard.take() {
            db.flush()?;
        }
        Ok(())
    }

    fn put(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let tree = self.tree(ns)?;
        tree.insert(key, value)?;
        tree.flush()?;
        Ok(())
    }

    fn batch_put(&self, ns: &str, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<(), DbError> {
        if keys.len() != values.len() {
            return Err(DbError::InvalidOperation(format!(
                "batch put size mismatch: {} keys, {} values",
                keys.len(),
                values.len()
            )));
        }
        let tree = self.tree(ns)?;
        let mut batch = sled::Batch::default();
        for (k, v) in keys.iter().zip(values) {
            batch.insert(k.as_slice(), v.as_slice());
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    fn put_if_absent(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let tree = self.tree(ns)?;
        match tree.compare_and_swap(key, None::<&[u8]>, Some(value))? {
            Ok(()) => {
                tree.flush()?;
                Ok(())
            }
            Err(_) => Err(DbError::already_exists(ns, key)),
        }
    }

    fn get(&self, ns: &str, key: &[u8]) -> Result<Vec<u8>, DbError> {
        let tree = self.tree(ns)?;
        tree.get(key)?
            .map(|ivec| ivec.to_vec())
            .ok_or_else(|| DbError::not_found(ns, key))
    }

    fn delete(&self, ns: &str, key: &[u8]) -> Result<(), DbError> {
        let tree = self.tree(ns)?;
        tree.remove(key)?;
        tree.flush()?;
        Ok(())
    }
}

impl Drop for SledKvStore {
    fn drop(&mut self) {
        if let Some(db) = self.db.write().take() {
            if let Err(e) = db.flush() {
                warn!("kv store flush on drop failed: {e}");
            }
        }
    }
}

/// Owner-only access on the database directory.
#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)) {
        warn!("could not restrict db permissions: {e}");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stop_reopen_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        {
            let store = SledKvStore::new(&path);
            store.start().unwrap();
            store.put("blocks", b"k", b"v").unwrap();
            store.stop().unwrap();
        }
        let store = SledKvStore::new(&path);
        store.start().unwrap();
        assert_eq!(store.get("blocks", b"k").unwrap(), b"v");
        store.stop().unwrap();
    }

    #[test]
    fn ops_before_start_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledKvStore::new(dir.path().join("kv.db"));
        assert!(matches!(
            store.put("ns", b"k", b"v"),
            Err(DbError::InvalidOperation(_))
        ));
    }

    #[test]
    fn forced_batch_failure_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledKvStore::new(dir.path().join("kv.db"));
        store.start().unwrap();

        store.put("ns", b"pre", b"existing").unwrap();

        let keys = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let vals = vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()];
        assert!(store.batch_put_force_fail("ns", &keys, &vals).is_err());

        // The aborted batch left the namespace exactly as before.
        assert_eq!(store.get("ns", b"pre").unwrap(), b"existing");
        for k in &keys {
            assert!(matches!(store.get("ns", k), Err(DbError::NotFound { .. })));
        }
        store.stop().unwrap();
    }
}
