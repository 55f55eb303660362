//! Persistent authenticated key/value map over one KV namespace.
//!
//! Radix-16 trie with content-addressed nodes: every node is stored under
//! the Sha256 of its canonical encoding, so mutations copy-on-write the
//! path from leaf to root and historical roots stay readable until pruned.
//! Structure is canonical in the key set: a subtree holding one key is a
//! `Leaf` carrying the remaining nibbles, a subtree holding more is a
//! `Branch`, and a key ending at a branch occupies the branch value slot.
//! Two tries with the same contents therefore have equal roots regardless
//! of insertion or deletion order.
//!
//! Dirty nodes live in a memory overlay until `commit` flushes them with a
//! single batch write; `root_hash` always reflects the overlay, and
//! `reset_to` drops the overlay, which is the rollback primitive used when
//! a block fails to apply.

use crate::db::{DbError, KVStore};
use crate::types::Hash32;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrieError {
    #[error("missing trie node {0}")]
    MissingNode(Hash32),
    #[error("corrupt trie node: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Branch {
        children: Box<[Option<Hash32>; 16]>,
        value: Option<Vec<u8>>,
    },
}

impl Node {
    /// Canonical node hash: Sha256 with 0x00 (leaf) / 0x01 (branch) domain
    /// separators, all variable fields length-prefixed.
    fn hash(&self) -> Hash32 {
        let mut h = Sha256::new();
        match self {
            Node::Leaf { path, value } => {
                h.update([0x00]);
                h.update((path.len() as u32).to_le_bytes());
                h.update(path);
                h.update((value.len() as u32).to_le_bytes());
                h.update(value);
            }
            Node::Branch { children, value } => {
                h.update([0x01]);
                for child in children.iter() {
                    match child {
                        Some(ch) => {
                            h.update([1]);
                            h.update(ch.0);
                        }
                        None => h.update([0]),
                    }
                }
                match value {
                    Some(v) => {
                        h.update([1]);
                        h.update((v.len() as u32).to_le_bytes());
                        h.update(v);
                    }
                    None => h.update([0]),
                }
            }
        }
        Hash32(h.finalize().into())
    }
}

fn nibbles(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 2);
    for b in key {
        out.push(b >> 4);
        out.push(b & 0x0f);
    }
    out
}

pub struct Trie {
    store: Arc<dyn KVStore>,
    namespace: String,
    root: Hash32,
    dirty: HashMap<Hash32, Node>,
}

impl Trie {
    /// Open a trie at `root` (`Hash32::zero()` for an empty one). Nodes are
    /// read and flushed through `namespace` of the shared store.
    pub fn new(store: Arc<dyn KVStore>, namespace: impl Into<String>, root: Hash32) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            root,
            dirty: HashMap::new(),
        }
    }

    pub fn root_hash(&self) -> Hash32 {
        self.root
    }

    fn node(&self, h: &Hash32) -> Result<Node, TrieError> {
        if let Some(n) = self.dirty.get(h) {
            return Ok(n.clone());
        }
        match self.store.get(&self.namespace, &h.0) {
            Ok(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| TrieError::Corrupt(e.to_string()))
            }
            Err(DbError::NotFound { .. }) => Err(TrieError::MissingNode(*h)),
            Err(e) => Err(e.into()),
        }
    }

    fn put_node(&mut self, node: Node) -> Hash32 {
        let h = node.hash();
        self.dirty.insert(h, node);
        h
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        if self.root.is_zero() {
            return Ok(None);
        }
        let path = nibbles(key);
        let mut h = self.root;
        let mut depth = 0;
        loop {
            match self.node(&h)? {
                Node::Leaf { path: lp, value } => {
                    return Ok(if lp == path[depth..] { Some(value) } else { None });
                }
                Node::Branch { children, value } => {
                    if depth == path.len() {
                        return Ok(value);
                    }
                    match children[path[depth] as usize] {
                        Some(ch) => {
                            h = ch;
                            depth += 1;
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    pub fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        let path = nibbles(key);
        self.root = if self.root.is_zero() {
            self.put_node(Node::Leaf { path, value: value.to_vec() })
        } else {
            let root = self.root;
            self.insert_at(root, &path, value.to_vec())?
        };
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), TrieError> {
        if self.root.is_zero() {
            return Ok(());
        }
        let path = nibbles(key);
        let root = self.root;
        self.root = self.remove_at(root, &path)?.unwrap_or_else(Hash32::zero);
        Ok(())
    }

    /// Flush the dirty overlay to the store in one atomic batch.
    pub fn commit(&mut self) -> Result<(), TrieError> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        let mut keys = Vec::with_capacity(self.dirty.len());
        let mut values = Vec::with_capacity(self.dirty.len());
        for (h, node) in &self.dirty {
            keys.push(h.0.to_vec());
            values.push(
                bincode::serialize(node).map_err(|e| TrieError::Corrupt(e.to_string()))?,
            );
        }
        self.store.batch_put(&self.namespace, &keys, &values)?;
        self.dirty.clear();
        Ok(())
    }

    /// Drop uncommitted nodes and point the trie at `root`. Used to roll a
    /// failed block application back to the pre-commit root.
    pub fn reset_to(&mut self, root: Hash32) {
        self.dirty.clear();
        self.root = root;
    }

    fn insert_at(&mut self, h: Hash32, path: &[u8], value: Vec<u8>) -> Result<Hash32, TrieError> {
        match self.node(&h)? {
            Node::Leaf { path: lp, value: lv } => {
                if lp == path {
                    Ok(self.put_node(Node::Leaf { path: lp, value }))
                } else {
                    Ok(self.two_leaves(&lp, lv, path, value))
                }
            }
            Node::Branch { mut children, value: bval } => {
                if path.is_empty() {
                    return Ok(self.put_node(Node::Branch { children, value: Some(value) }));
                }
                let idx = path[0] as usize;
                let child = match children[idx] {
                    Some(ch) => self.insert_at(ch, &path[1..], value)?,
                    None => self.put_node(Node::Leaf { path: path[1..].to_vec(), value }),
                };
                children[idx] = Some(child);
                Ok(self.put_node(Node::Branch { children, value: bval }))
            }
        }
    }

    /// Minimal subtree holding two distinct keys: shared leading nibbles
    /// become single-child branches, the divergence point fans out.
    fn two_leaves(&mut self, a: &[u8], av: Vec<u8>, b: &[u8], bv: Vec<u8>) -> Hash32 {
        if !a.is_empty() && !b.is_empty() && a[0] == b[0] {
            let child = self.two_leaves(&a[1..], av, &b[1..], bv);
            let mut children: Box<[Option<Hash32>; 16]> = Default::default();
            children[a[0] as usize] = Some(child);
            return self.put_node(Node::Branch { children, value: None });
        }
        let mut children: Box<[Option<Hash32>; 16]> = Default::default();
        let mut value = None;
        if a.is_empty() {
            value = Some(av);
        } else {
            let leaf = self.put_node(Node::Leaf { path: a[1..].to_vec(), value: av });
            children[a[0] as usize] = Some(leaf);
        }
        if b.is_empty() {
            value = Some(bv);
        } else {
            let leaf = self.put_node(Node::Leaf { path: b[1..].to_vec(), value: bv });
            children[b[0] as usize] = Some(leaf);
        }
        self.put_node(Node::Branch { children, value })
    }

    fn remove_at(&mut self, h: Hash32, path: &[u8]) -> Result<Option<Hash32>, TrieError> {
        match self.node(&h)? {
            Node::Leaf { path: lp, .. } => {
                if lp == path {
                    Ok(None)
                } else {
                    Ok(Some(h))
                }
            }
            Node::Branch { mut children, mut value } => {
                if path.is_empty() {
                    if value.is_none() {
                        return Ok(Some(h));
                    }
                    value = None;
                } else {
                    let idx = path[0] as usize;
                    match children[idx] {
                        Some(ch) => children[idx] = self.remove_at(ch, &path[1..])?,
                        None => return Ok(Some(h)),
                    }
                }
                self.collapse(children, value)
            }
        }
    }

    /// Restore the canonical shape after a removal: a branch left with a
    /// single key collapses back into a leaf.
    fn collapse(
        &mut self,
        children: Box<[Option<Hash32>; 16]>,
        value: Option<Vec<u8>>,
    ) -> Result<Option<Hash32>, TrieError> {
        let live: Vec<(usize, Hash32)> = children
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|h| (i, h)))
            .collect();
        match (live.len(), value) {
            (0, None) => Ok(None),
            (0, Some(v)) => Ok(Some(self.put_node(Node::Leaf { path: Vec::new(), value: v }))),
            (1, None) => {
                let (nib, ch) = live[0];
                match self.node(&ch)? {
                    Node::Leaf { path: cp, value: cv } => {
                        let mut path = Vec::with_capacity(1 + cp.len());
                        path.push(nib as u8);
                        path.extend_from_slice(&cp);
                        Ok(Some(self.put_node(Node::Leaf { path, value: cv })))
                    }
                    // Child subtree still holds several keys; the single
                    // child branch is part of a shared prefix chain.
                    Node::Branch { .. } => {
                        Ok(Some(self.put_node(Node::Branch { children, value: None })))
                    }
                }
            }
            (_, value) => Ok(Some(self.put_node(Node::Branch { children, value }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemKvStore;

    fn mem_trie() -> Trie {
        Trie::new(Arc::new(MemKvStore::new()), "state", Hash32::zero())
    }

    #[test]
    fn upsert_get_delete_round_trip() {
        let mut t = mem_trie();
        assert_eq!(t.get(b"alpha").unwrap(), None);

        t.upsert(b"alpha", b"1").unwrap();
        t.upsert(b"beta", b"2").unwrap();
        assert_eq!(t.get(b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(t.get(b"beta").unwrap(), Some(b"2".to_vec()));

        t.upsert(b"alpha", b"3").unwrap();
        assert_eq!(t.get(b"alpha").unwrap(), Some(b"3".to_vec()));

        t.delete(b"alpha").unwrap();
        assert_eq!(t.get(b"alpha").unwrap(), None);
        assert_eq!(t.get(b"beta").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn root_is_insertion_order_independent() {
        let pairs: Vec<(&[u8], &[u8])> = vec![
            (b"abcd", b"1"),
            (b"abce", b"2"),
            (b"ab", b"3"),
            (b"zz", b"4"),
            (b"", b"5"),
        ];
        let mut t1 = mem_trie();
        for (k, v) in &pairs {
            t1.upsert(k, v).unwrap();
        }
        let mut t2 = mem_trie();
        for (k, v) in pairs.iter().rev() {
            t2.upsert(k, v).unwrap();
        }
        assert!(!t1.root_hash().is_zero());
        assert_eq!(t1.root_hash(), t2.root_hash());
    }

    #[test]
    fn delete_restores_previous_root() {
        let mut t = mem_trie();
        t.upsert(b"account-a", b"1").unwrap();
        t.upsert(b"account-b", b"2").unwrap();
        let before = t.root_hash();

        t.upsert(b"account-c", b"3").unwrap();
        assert_ne!(t.root_hash(), before);
        t.delete(b"account-c").unwrap();
        assert_eq!(t.root_hash(), before);

        // prefix keys collapse cleanly too
        t.upsert(b"account", b"4").unwrap();
        t.delete(b"account").unwrap();
        assert_eq!(t.root_hash(), before);
    }

    #[test]
    fn delete_to_empty_yields_zero_root() {
        let mut t = mem_trie();
        t.upsert(b"k", b"v").unwrap();
        t.delete(b"k").unwrap();
        assert!(t.root_hash().is_zero());
    }

    #[test]
    fn commit_persists_and_reopens_at_root() {
        let store: Arc<dyn KVStore> = Arc::new(MemKvStore::new());
        let root = {
            let mut t = Trie::new(store.clone(), "state", Hash32::zero());
            t.upsert(b"alpha", b"1").unwrap();
            t.upsert(b"beta", b"2").unwrap();
            t.commit().unwrap();
            t.root_hash()
        };
        let reopened = Trie::new(store, "state", root);
        assert_eq!(reopened.get(b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(reopened.get(b"beta").unwrap(), Some(b"2".to_vec()));
        assert_eq!(reopened.get(b"gamma").unwrap(), None);
    }

    #[test]
    fn reset_rolls_back_uncommitted_mutations() {
        let mut t = mem_trie();
        t.upsert(b"alpha", b"1").unwrap();
        t.commit().unwrap();
        let committed = t.root_hash();

        t.upsert(b"alpha", b"changed").unwrap();
        t.upsert(b"beta", b"2").unwrap();
        assert_ne!(t.root_hash(), committed);

        t.reset_to(committed);
        assert_eq!(t.root_hash(), committed);
        assert_eq!(t.get(b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(t.get(b"beta").unwrap(), None);
    }

    #[test]
    fn historical_roots_stay_readable() {
        let store: Arc<dyn KVStore> = Arc::new(MemKvStore::new());
        let mut t = Trie::new(store.clone(), "state", Hash32::zero());
        t.upsert(b"k", b"old").unwrap();
        t.commit().unwrap();
        let old_root = t.root_hash();

        t.upsert(b"k", b"new").unwrap();
        t.commit().unwrap();

        let old = Trie::new(store, "state", old_root);
        assert_eq!(old.get(b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(t.get(b"k").unwrap(), Some(b"new".to_vec()));
    }
}
