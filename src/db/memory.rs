//! In-memory KV store used by tests and `chain.in_mem_test` runs.

use super::{DbError, KVStore};
use parking_lot::RwLock;
use std::collections::HashMap;

type NsKey = (String, Vec<u8>);

#[derive(Default)]
pub struct MemKvStore {
    data: RwLock<HashMap<NsKey, Vec<u8>>>,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KVStore for MemKvStore {
    fn start(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn put(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.data
            .write()
            .insert((ns.to_string(), key.to_vec()), value.to_vec());
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
        // Single write-lock scope keeps the batch atomic for readers.
        let mut data = self.data.write();
        for (k, v) in keys.iter().zip(values) {
            data.insert((ns.to_string(), k.clone()), v.clone());
        }
        Ok(())
    }

    fn put_if_absent(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let mut data = self.data.write();
        let nskey = (ns.to_string(), key.to_vec());
        if data.contains_key(&nskey) {
            return Err(DbError::already_exists(ns, key));
        }
        data.insert(nskey, value.to_vec());
        Ok(())
    }

    fn get(&self, ns: &str, key: &[u8]) -> Result<Vec<u8>, DbError> {
        self.data
            .read()
            .get(&(ns.to_string(), key.to_vec()))
            .cloned()
            .ok_or_else(|| DbError::not_found(ns, key))
    }

    fn delete(&self, ns: &str, key: &[u8]) -> Result<(), DbError> {
        self.data.write().remove(&(ns.to_string(), key.to_vec()));
        Ok(())
    }
}
