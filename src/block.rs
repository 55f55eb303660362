//! Blocks: ordered action bundles with a hashed, producer-signed header.
//!
//! The block hash is blake3 over the canonical header bytes, which include
//! `tx_root` and `state_root` but exclude `producer_sig`. `tx_root` is a
//! pairwise Merkle fold over the action hashes, transfers first then votes,
//! duplicating the last node on odd levels; inner nodes are blake3 with the
//! "MRD_MRK" domain tag. Persisted block bytes use bincode and round-trip
//! bit-exact.

use crate::action::{ActionError, Keypair, Transfer, Vote, verify_detached};
use crate::types::{hash_bytes, Hash32};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BLOCK_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block codec failure: {0}")]
    Codec(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub height: u64,
    pub timestamp: u64,
    pub prev_hash: Hash32,
    pub tx_root: Hash32,
    pub state_root: Hash32,
    pub producer_pubkey: Vec<u8>,
    pub producer_sig: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transfers: Vec<Transfer>,
    pub votes: Vec<Vote>,
}

/// Merkle root of an ordered hash list: zero for the empty list, otherwise
/// fold pairs upward, duplicating the last node on odd levels.
pub fn merkle_root(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return Hash32::zero();
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / 2 + 1);
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            let mut buf = Vec::with_capacity(7 + 64);
            buf.extend_from_slice(b"MRD_MRK");
            buf.extend_from_slice(&pair[0].0);
            buf.extend_from_slice(&right.0);
            next.push(hash_bytes(&buf));
        }
        level = next;
    }
    level[0]
}

impl Block {
    /// Assemble an unsigned block; `tx_root` is computed from the action
    /// lists, `state_root` is filled in by the minter after the dry run.
    pub fn new(
        height: u64,
        timestamp: u64,
        prev_hash: Hash32,
        transfers: Vec<Transfer>,
        votes: Vec<Vote>,
    ) -> Self {
        let mut block = Self {
            header: BlockHeader {
                version: BLOCK_VERSION,
                height,
                timestamp,
                prev_hash,
                tx_root: Hash32::zero(),
                state_root: Hash32::zero(),
                producer_pubkey: Vec::new(),
                producer_sig: Vec::new(),
            },
            transfers,
            votes,
        };
        block.header.tx_root = block.tx_root();
        block
    }

    /// Action hashes in canonical block order: transfers, then votes.
    pub fn action_hashes(&self) -> Vec<Hash32> {
        self.transfers
            .iter()
            .map(Transfer::hash)
            .chain(self.votes.iter().map(Vote::hash))
            .collect()
    }

    pub fn tx_root(&self) -> Hash32 {
        merkle_root(&self.action_hashes())
    }

    /// Canonical header bytes, producer signature excluded.
    ///
    /// "MRD_BLK" || version(4 LE) || height(8 LE) || timestamp(8 LE) ||
    /// prev_hash(32) || tx_root(32) || state_root(32) ||
    /// pubkey_len(2 LE) || producer_pubkey
    fn header_sign_bytes(&self) -> Vec<u8> {
        let h = &self.header;
        let mut buf = Vec::with_capacity(7 + 4 + 8 + 8 + 96 + 2 + h.producer_pubkey.len());
        buf.extend_from_slice(b"MRD_BLK");
        buf.extend_from_slice(&h.version.to_le_bytes());
        buf.extend_from_slice(&h.height.to_le_bytes());
        buf.extend_from_slice(&h.timestamp.to_le_bytes());
        buf.extend_from_slice(&h.prev_hash.0);
        buf.extend_from_slice(&h.tx_root.0);
        buf.extend_from_slice(&h.state_root.0);
        buf.extend_from_slice(&(h.producer_pubkey.len() as u16).to_le_bytes());
        buf.extend_from_slice(&h.producer_pubkey);
        buf
    }

    pub fn hash(&self) -> Hash32 {
        hash_bytes(&self.header_sign_bytes())
    }

    /// Attach the producer key and sign the header.
    pub fn sign(&mut self, kp: &Keypair) {
        self.header.producer_pubkey = kp.public_key();
        let msg = self.header_sign_bytes();
        self.header.producer_sig = kp.sign(&msg);
    }

    pub fn verify_signature(&self) -> Result<(), ActionError> {
        if self.header.producer_sig.is_empty() {
            return Err(ActionError::Unsigned);
        }
        verify_detached(
            &self.header.producer_pubkey,
            &self.header_sign_bytes(),
            &self.header.producer_sig,
        )
    }

    pub fn serialize(&self) -> Result<Vec<u8>, BlockError> {
        bincode::serialize(self).map_err(|e| BlockError::Codec(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, BlockError> {
        bincode::deserialize(bytes).map_err(|e| BlockError::Codec(e.to_string()))
    }
}
