//! Pluggable block validation policy.
//!
//! The chain manager always enforces the structural rules itself (height
//! sequence, prev-hash linkage, tx root, replay); the validator covers the
//! content rules: producer signature, per-action signatures, and the state
//! dry run. An external layer can swap in its own policy, e.g. a harness
//! node that accepts everything, without being able to corrupt the chain
//! structure.

use super::{ChainError, InvalidBlockReason};
use crate::block::Block;
use crate::state::StateFactory;
use crate::types::Hash32;
use tracing::warn;

pub trait BlockValidator: Send + Sync {
    fn validate(
        &self,
        block: &Block,
        tip_height: u64,
        tip_hash: Hash32,
        sf: &mut StateFactory,
    ) -> Result<(), ChainError>;
}

/// Standard policy: producer signature, action signatures with the
/// coinbase-at-index-0 rule, and a full dry run against the current state.
pub struct DefaultValidator;

impl BlockValidator for DefaultValidator {
    fn validate(
        &self,
        block: &Block,
        _tip_height: u64,
        _tip_hash: Hash32,
        sf: &mut StateFactory,
    ) -> Result<(), ChainError> {
        // Unsigned blocks, dummy blocks included, stop here.
        if block.verify_signature().is_err() {
            return Err(ChainError::InvalidBlock(InvalidBlockReason::Signature));
        }

        for (i, transfer) in block.transfers.iter().enumerate() {
            if transfer.is_coinbase() && i != 0 {
                warn!(height = block.header.height, index = i, "coinbase out of place");
                return Err(ChainError::InvalidBlock(InvalidBlockReason::Signature));
            }
            if transfer.verify().is_err() {
                return Err(ChainError::InvalidBlock(InvalidBlockReason::Signature));
            }
        }
        for vote in &block.votes {
            if vote.verify().is_err() {
                return Err(ChainError::InvalidBlock(InvalidBlockReason::Signature));
            }
        }

        // Dry-run application: nonce and balance rules, and the claimed
        // state root must be the root the block actually produces.
        let root = sf.dry_root(block)?;
        if root != block.header.state_root {
            return Err(ChainError::State(format!(
                "state root mismatch at height {}: block claims {}, dry run gives {}",
                block.header.height, block.header.state_root, root
            )));
        }
        Ok(())
    }
}

/// Accepts every block. Used by Byzantine test harnesses; the structural
/// checks in the chain manager still apply.
pub struct AcceptAllValidator;

impl BlockValidator for AcceptAllValidator {
    fn validate(
        &self,
        _block: &Block,
        _tip_height: u64,
        _tip_hash: Hash32,
        _sf: &mut StateFactory,
    ) -> Result<(), ChainError> {
        Ok(())
    }
}
