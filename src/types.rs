use serde::{Deserialize, Serialize};
use std::fmt;

pub type Height = u64;

/// 32-byte content hash. The all-zero value is reserved: it never names a
/// real block or action and doubles as the "empty" marker (genesis prev
/// hash, empty Merkle root, empty trie root).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Printable account identifier. The chain core never looks inside an
/// address beyond equality and map-key use; derivation from a public key
/// lives in `address_from_pubkey`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

pub fn hash_bytes(b: &[u8]) -> Hash32 {
    let h = blake3::hash(b);
    let mut out = [0u8; 32];
    out.copy_from_slice(h.as_bytes());
    Hash32(out)
}

/// Account address derived from an ed25519 public key: first 20 bytes of
/// blake3(pubkey), hex-encoded.
pub fn address_from_pubkey(pubkey: &[u8]) -> Address {
    let h = blake3::hash(pubkey);
    Address(hex::encode(&h.as_bytes()[..20]))
}
