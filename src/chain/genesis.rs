//! Deterministic genesis construction.
//!
//! Genesis is a function of the genesis config alone: a creator account
//! holding the total supply, ten transfers handing a tenth of a percent
//! each to fixed bootstrap accounts, and twenty-one delegate self-votes
//! that seed the candidate set. All keypairs derive from fixed labels, so every node
//! builds the same block and the genesis hash matches across the network.

use crate::action::{Keypair, Transfer, Vote};
use crate::block::Block;
use crate::config::GenesisSection;
use crate::types::{Address, Hash32};

/// Fixed genesis timestamp; wall clock would break hash reproducibility.
pub const GENESIS_TIMESTAMP: u64 = 0;

const TRANSFER_COUNT: u64 = 10;
const DELEGATE_COUNT: u64 = 21;

fn seeded_keypair(label: &str) -> Keypair {
    let mut seed = [0u8; 32];
    seed.copy_from_slice(blake3::hash(label.as_bytes()).as_bytes());
    Keypair::from_seed(seed)
}

/// Well-known creator keypair, used when no `creator_addr` is configured.
pub fn creator_keypair() -> Keypair {
    seeded_keypair("meridian-genesis-creator")
}

pub fn creator_address(cfg: &GenesisSection) -> Address {
    if cfg.creator_addr.is_empty() {
        creator_keypair().address()
    } else {
        Address(cfg.creator_addr.clone())
    }
}

/// Amount of each of the ten genesis transfers: 0.1% of supply, so the
/// creator keeps 99% after all ten.
pub fn transfer_share(cfg: &GenesisSection) -> u64 {
    cfg.total_supply / 1000
}

/// Assemble the unsigned genesis block. The caller fills `state_root`
/// after creating the creator account and dry-running the block.
pub fn build_block(cfg: &GenesisSection) -> Block {
    let creator = creator_address(cfg);
    let share = transfer_share(cfg);

    let transfers = (0..TRANSFER_COUNT)
        .map(|i| {
            let recipient = seeded_keypair(&format!("meridian-account-{i}")).address();
            Transfer::new(i + 1, share, creator.clone(), recipient)
        })
        .collect();

    let votes = (0..DELEGATE_COUNT)
        .map(|i| {
            let delegate = seeded_keypair(&format!("meridian-delegate-{i}"));
            Vote::new(1, delegate.public_key(), delegate.public_key()).sign(&delegate)
        })
        .collect();

    Block::new(0, GENESIS_TIMESTAMP, Hash32::zero(), transfers, votes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenesisSection;

    #[test]
    fn genesis_block_is_reproducible() {
        let cfg = GenesisSection::default();
        let a = build_block(&cfg);
        let b = build_block(&cfg);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.tx_root(), b.tx_root());
        assert_eq!(a.transfers.len(), 10);
        assert_eq!(a.votes.len(), 21);
        assert!(a.header.prev_hash.is_zero());
        assert_eq!(a.header.height, 0);
    }

    #[test]
    fn genesis_shares_leave_creator_with_the_rest() {
        let cfg = GenesisSection::default();
        let share = transfer_share(&cfg);
        let spent: u64 = build_block(&cfg).transfers.iter().map(|t| t.amount).sum();
        assert_eq!(spent, share * 10);
        assert_eq!(cfg.total_supply - spent, 9_900_000_000);
    }

    #[test]
    fn explicit_creator_addr_is_honored() {
        let cfg = GenesisSection {
            creator_addr: "named-creator".into(),
            ..GenesisSection::default()
        };
        assert_eq!(creator_address(&cfg).as_str(), "named-creator");
        let blk = build_block(&cfg);
        assert_eq!(
            blk.transfers[0].sender().unwrap().as_str(),
            "named-creator"
        );
    }

    #[test]
    fn delegate_votes_are_self_votes() {
        let blk = build_block(&GenesisSection::default());
        for vote in &blk.votes {
            assert_eq!(vote.votee_address(), Some(vote.voter_address()));
            vote.verify().unwrap();
        }
    }
}
