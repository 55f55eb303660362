//! Signed chain actions: value transfers and delegate votes.
//!
//! Hashing and signing never go through serde. Each action has a canonical
//! byte form with an ASCII domain tag and length-prefixed fields, signature
//! excluded, so the same bytes round-trip across implementations and the
//! hash is stable against encoder changes. The serde derives exist only for
//! the block codec.

use crate::types::{address_from_pubkey, hash_bytes, Address, Hash32};
use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, Verifier as DalekVerifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("key error: {0}")]
    Key(String),
    #[error("sender address does not match public key")]
    SenderMismatch,
    #[error("action is unsigned")]
    Unsigned,
}

#[derive(Clone)]
pub struct Keypair {
    sk: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self { sk: SigningKey::generate(&mut rng) }
    }

    pub fn from_seed(seed32: [u8; 32]) -> Self {
        Self { sk: SigningKey::from_bytes(&seed32) }
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.sk.verifying_key().to_bytes().to_vec()
    }

    pub fn address(&self) -> Address {
        address_from_pubkey(&self.public_key())
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let sig: Signature = self.sk.sign(msg);
        sig.to_bytes().to_vec()
    }
}

pub fn verify_detached(pk: &[u8], msg: &[u8], sig: &[u8]) -> Result<(), ActionError> {
    let vk = VerifyingKey::from_bytes(
        pk.try_into().map_err(|_| ActionError::Key("bad pubkey length".into()))?,
    )
    .map_err(|e| ActionError::Key(e.to_string()))?;
    let sig = Signature::from_bytes(
        sig.try_into().map_err(|_| ActionError::Key("bad signature length".into()))?,
    );
    vk.verify(msg, &sig).map_err(|_| ActionError::InvalidSignature)
}

/// Where a transfer's funds come from. The coinbase case is a distinct
/// variant, not a null-signature convention, so every consumer has to
/// handle it explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOrigin {
    /// Block-reward transfer synthesized by the producer at mint time.
    Coinbase,
    Account {
        sender: Address,
        sender_pubkey: Vec<u8>,
        signature: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub nonce: u64,
    pub amount: u64,
    pub recipient: Address,
    pub payload: Vec<u8>,
    pub origin: TransferOrigin,
}

impl Transfer {
    /// Unsigned account transfer; call `sign` before submitting it.
    pub fn new(nonce: u64, amount: u64, sender: Address, recipient: Address) -> Self {
        Self {
            nonce,
            amount,
            recipient,
            payload: Vec::new(),
            origin: TransferOrigin::Account {
                sender,
                sender_pubkey: Vec::new(),
                signature: Vec::new(),
            },
        }
    }

    /// Block-reward transfer. Carries the block height as its nonce so
    /// that equal-amount coinbases of different blocks hash apart.
    pub fn coinbase(block_height: u64, amount: u64, recipient: Address, payload: Vec<u8>) -> Self {
        Self {
            nonce: block_height,
            amount,
            recipient,
            payload,
            origin: TransferOrigin::Coinbase,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self.origin, TransferOrigin::Coinbase)
    }

    pub fn sender(&self) -> Option<&Address> {
        match &self.origin {
            TransferOrigin::Coinbase => None,
            TransferOrigin::Account { sender, .. } => Some(sender),
        }
    }

    /// Canonical bytes, signature excluded.
    ///
    /// "MRD_TSF" || coinbase flag || nonce(8 LE) || amount(8 LE) ||
    /// sender_len(2 LE) || sender || pubkey_len(2 LE) || pubkey ||
    /// recipient_len(2 LE) || recipient || payload_len(4 LE) || payload
    fn sign_bytes(&self) -> Vec<u8> {
        let (sender, pubkey): (&[u8], &[u8]) = match &self.origin {
            TransferOrigin::Coinbase => (b"", b""),
            TransferOrigin::Account { sender, sender_pubkey, .. } => {
                (sender.as_bytes(), sender_pubkey)
            }
        };
        let recipient = self.recipient.as_bytes();
        let mut buf = Vec::with_capacity(
            8 + 1 + 16 + 2 + sender.len() + 2 + pubkey.len() + 2 + recipient.len() + 4
                + self.payload.len(),
        );
        buf.extend_from_slice(b"MRD_TSF");
        buf.push(self.is_coinbase() as u8);
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(&(sender.len() as u16).to_le_bytes());
        buf.extend_from_slice(sender);
        buf.extend_from_slice(&(pubkey.len() as u16).to_le_bytes());
        buf.extend_from_slice(pubkey);
        buf.extend_from_slice(&(recipient.len() as u16).to_le_bytes());
        buf.extend_from_slice(recipient);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn hash(&self) -> Hash32 {
        hash_bytes(&self.sign_bytes())
    }

    /// Attach the signer's public key and a detached signature over the
    /// canonical bytes. No-op for coinbase transfers.
    pub fn sign(mut self, kp: &Keypair) -> Self {
        if let TransferOrigin::Account { sender_pubkey, signature, .. } = &mut self.origin {
            *sender_pubkey = kp.public_key();
            *signature = Vec::new();
        }
        let msg = self.sign_bytes();
        if let TransferOrigin::Account { signature, .. } = &mut self.origin {
            *signature = kp.sign(&msg);
        }
        self
    }

    pub fn verify(&self) -> Result<(), ActionError> {
        match &self.origin {
            // Coinbase carries no signature; placement rules are enforced
            // by block validation.
            TransferOrigin::Coinbase => Ok(()),
            TransferOrigin::Account { sender, sender_pubkey, signature } => {
                if signature.is_empty() {
                    return Err(ActionError::Unsigned);
                }
                if *sender != address_from_pubkey(sender_pubkey) {
                    return Err(ActionError::SenderMismatch);
                }
                verify_detached(sender_pubkey, &self.sign_bytes(), signature)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub nonce: u64,
    pub voter_pubkey: Vec<u8>,
    /// Empty means unvote: the voter detaches from its current votee.
    pub votee_pubkey: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Vote {
    pub fn new(nonce: u64, voter_pubkey: Vec<u8>, votee_pubkey: Vec<u8>) -> Self {
        Self { nonce, voter_pubkey, votee_pubkey, signature: Vec::new() }
    }

    pub fn is_unvote(&self) -> bool {
        self.votee_pubkey.is_empty()
    }

    pub fn voter_address(&self) -> Address {
        address_from_pubkey(&self.voter_pubkey)
    }

    pub fn votee_address(&self) -> Option<Address> {
        if self.is_unvote() {
            None
        } else {
            Some(address_from_pubkey(&self.votee_pubkey))
        }
    }

    /// Canonical bytes, signature excluded.
    ///
    /// "MRD_VOT" || nonce(8 LE) || voter_len(2 LE) || voter_pubkey ||
    /// votee_len(2 LE) || votee_pubkey
    fn sign_bytes(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(7 + 8 + 2 + self.voter_pubkey.len() + 2 + self.votee_pubkey.len());
        buf.extend_from_slice(b"MRD_VOT");
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&(self.voter_pubkey.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.voter_pubkey);
        buf.extend_from_slice(&(self.votee_pubkey.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.votee_pubkey);
        buf
    }

    pub fn hash(&self) -> Hash32 {
        hash_bytes(&self.sign_bytes())
    }

    pub fn sign(mut self, kp: &Keypair) -> Self {
        self.voter_pubkey = kp.public_key();
        self.signature = Vec::new();
        let msg = self.sign_bytes();
        self.signature = kp.sign(&msg);
        self
    }

    pub fn verify(&self) -> Result<(), ActionError> {
        if self.signature.is_empty() {
            return Err(ActionError::Unsigned);
        }
        verify_detached(&self.voter_pubkey, &self.sign_bytes(), &self.signature)
    }
}
