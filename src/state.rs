//! Account state factory over the authenticated trie.
//!
//! Accounts live in the trie under their address bytes, bincode-encoded.
//! A block is applied into a working account map first; only when every
//! action passes the balance and nonce checks are the accounts written to
//! the trie overlay and flushed. Any failure rolls the trie back to the
//! pre-commit root, so a half-applied block is never observable.
//!
//! Voting keeps the `votee`/`voters` edges as address keys, never owning
//! references, and the denormalized `voting_weight` is maintained by delta:
//! a vote moves the voter's whole balance, later balance changes of the
//! voter move the difference.

use crate::action::TransferOrigin;
use crate::block::Block;
use crate::db::{DbError, KVStore};
use crate::trie::{Trie, TrieError};
use crate::types::{Address, Hash32};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Trie node namespace in the backing store.
pub const STATE_NS: &str = "state";
/// Candidate set record namespace.
const CANDIDATES_NS: &str = "candidates";
const CANDIDATES_KEY: &[u8] = b"set";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("account {0} already exists")]
    AlreadyExists(Address),
    #[error("insufficient balance: {addr} has {balance}, needs {needed}")]
    InsufficientBalance { addr: Address, balance: u64, needed: u64 },
    #[error("bad nonce for {addr}: got {got}, expected {expected}")]
    BadNonce { addr: Address, got: u64, expected: u64 },
    #[error("coinbase transfer misplaced at index {0}")]
    MisplacedCoinbase(usize),
    #[error("corrupt account record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub nonce: u64,
    pub balance: u64,
    pub is_candidate: bool,
    pub voting_weight: u64,
    pub votee: Option<Address>,
    pub voters: BTreeMap<Address, u64>,
}

impl Account {
    /// Zero-initialized account for an address without state.
    pub fn empty(address: Address) -> Self {
        Self {
            address,
            nonce: 0,
            balance: 0,
            is_candidate: false,
            voting_weight: 0,
            votee: None,
            voters: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub address: Address,
    pub voting_weight: u64,
}

pub struct StateFactory {
    store: Arc<dyn KVStore>,
    trie: Trie,
    /// All accounts ever marked candidate, with their current weight. The
    /// ranked, capped view is produced by `candidates()`.
    candidate_weights: BTreeMap<Address, u64>,
    candidates_height: u64,
    max_candidates: usize,
}

impl StateFactory {
    /// Open the factory at `root` (zero for a fresh chain). Trie nodes and
    /// the candidate record share the given store.
    pub fn new(
        store: Arc<dyn KVStore>,
        root: Hash32,
        max_candidates: usize,
    ) -> Result<Self, StateError> {
        let trie = Trie::new(store.clone(), STATE_NS, root);
        let (candidates_height, candidate_weights) = match store.get(CANDIDATES_NS, CANDIDATES_KEY)
        {
            Ok(bytes) => bincode::deserialize::<(u64, Vec<(Address, u64)>)>(&bytes)
                .map(|(h, pairs)| (h, pairs.into_iter().collect()))
                .map_err(|e| StateError::Corrupt(e.to_string()))?,
            Err(DbError::NotFound { .. }) => (0, BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            store,
            trie,
            candidate_weights,
            candidates_height,
            max_candidates,
        })
    }

    pub fn root_hash(&self) -> Hash32 {
        self.trie.root_hash()
    }

    /// Create an account with an initial balance. Fails if the address
    /// already has state.
    pub fn create_state(&mut self, address: Address, balance: u64) -> Result<Account, StateError> {
        if self.trie.get(address.as_bytes())?.is_some() {
            return Err(StateError::AlreadyExists(address));
        }
        let mut account = Account::empty(address);
        account.balance = balance;
        self.write_account(&account)?;
        self.trie.commit()?;
        Ok(account)
    }

    /// Copy of the account state; absent addresses read as a zero account.
    pub fn state_by_addr(&self, address: &Address) -> Result<Account, StateError> {
        match self.trie.get(address.as_bytes())? {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| StateError::Corrupt(e.to_string()))
            }
            None => Ok(Account::empty(address.clone())),
        }
    }

    /// Ranked candidate view: weight descending, ties by address byte
    /// order, truncated to the configured cap. Returns the height at which
    /// the set was last recomputed.
    pub fn candidates(&self) -> (u64, Vec<Candidate>) {
        let mut list: Vec<Candidate> = self
            .candidate_weights
            .iter()
            .map(|(address, weight)| Candidate {
                address: address.clone(),
                voting_weight: *weight,
            })
            .collect();
        list.sort_by(|a, b| {
            b.voting_weight
                .cmp(&a.voting_weight)
                .then_with(|| a.address.cmp(&b.address))
        });
        list.truncate(self.max_candidates);
        (self.candidates_height, list)
    }

    /// Apply every action of the block atomically. On any violation the
    /// trie rolls back to the pre-commit root and nothing is persisted.
    pub fn commit_block(&mut self, block: &Block) -> Result<(), StateError> {
        let pre_root = self.trie.root_hash();
        let updates = match self.apply_actions(block) {
            Ok(updates) => updates,
            Err(e) => {
                self.trie.reset_to(pre_root);
                return Err(e);
            }
        };
        if let Err(e) = self.trie.commit() {
            self.trie.reset_to(pre_root);
            return Err(e.into());
        }
        for (addr, weight) in updates {
            self.candidate_weights.insert(addr, weight);
        }
        if !block.votes.is_empty() {
            self.candidates_height = block.header.height;
        }
        self.persist_candidates()?;
        Ok(())
    }

    /// Root the trie would have after applying `block`, without committing
    /// anything. Used to fill `state_root` at mint time and as the dry run
    /// backing block validation.
    pub fn dry_root(&mut self, block: &Block) -> Result<Hash32, StateError> {
        let pre_root = self.trie.root_hash();
        let result = self.apply_actions(block).map(|_| self.trie.root_hash());
        self.trie.reset_to(pre_root);
        result
    }

    fn write_account(&mut self, account: &Account) -> Result<(), StateError> {
        let bytes =
            bincode::serialize(account).map_err(|e| StateError::Corrupt(e.to_string()))?;
        self.trie.upsert(account.address.as_bytes(), &bytes)?;
        Ok(())
    }

    fn persist_candidates(&self) -> Result<(), StateError> {
        let pairs: Vec<(&Address, &u64)> = self.candidate_weights.iter().collect();
        let bytes = bincode::serialize(&(self.candidates_height, pairs))
            .map_err(|e| StateError::Corrupt(e.to_string()))?;
        self.store.put(CANDIDATES_NS, CANDIDATES_KEY, &bytes)?;
        Ok(())
    }

    /// Run the block's actions against a working account map, then stage
    /// the touched accounts into the trie overlay. Returns the candidate
    /// weight updates observed.
    fn apply_actions(&mut self, block: &Block) -> Result<Vec<(Address, u64)>, StateError> {
        let mut accts: HashMap<Address, Account> = HashMap::new();
        let mut seen: HashSet<Address> = HashSet::new();

        for (i, transfer) in block.transfers.iter().enumerate() {
            match &transfer.origin {
                TransferOrigin::Coinbase => {
                    if i != 0 {
                        return Err(StateError::MisplacedCoinbase(i));
                    }
                    credit(&self.trie, &mut accts, &transfer.recipient, transfer.amount)?;
                }
                TransferOrigin::Account { sender, .. } => {
                    {
                        let acct = fetch(&self.trie, &mut accts, sender)?;
                        check_nonce(acct, &mut seen, transfer.nonce)?;
                        if acct.balance < transfer.amount {
                            return Err(StateError::InsufficientBalance {
                                addr: sender.clone(),
                                balance: acct.balance,
                                needed: transfer.amount,
                            });
                        }
                        acct.nonce = transfer.nonce;
                    }
                    debit(&self.trie, &mut accts, sender, transfer.amount)?;
                    credit(&self.trie, &mut accts, &transfer.recipient, transfer.amount)?;
                }
            }
        }

        for vote in &block.votes {
            let voter_addr = vote.voter_address();
            let (old_votee, voter_balance) = {
                let voter = fetch(&self.trie, &mut accts, &voter_addr)?;
                check_nonce(voter, &mut seen, vote.nonce)?;
                voter.nonce = vote.nonce;
                (voter.votee.take(), voter.balance)
            };
            if let Some(old) = old_votee {
                let prev = fetch(&self.trie, &mut accts, &old)?;
                let contributed = prev.voters.remove(&voter_addr).unwrap_or(0);
                prev.voting_weight = prev.voting_weight.saturating_sub(contributed);
            }
            if let Some(votee_addr) = vote.votee_address() {
                {
                    let votee = fetch(&self.trie, &mut accts, &votee_addr)?;
                    votee.voting_weight = votee.voting_weight.saturating_add(voter_balance);
                    votee.voters.insert(voter_addr.clone(), voter_balance);
                    votee.is_candidate = true;
                }
                let voter = fetch(&self.trie, &mut accts, &voter_addr)?;
                voter.votee = Some(votee_addr);
            }
        }

        let mut updates = Vec::new();
        for account in accts.values() {
            if account.is_candidate {
                updates.push((account.address.clone(), account.voting_weight));
            }
        }
        for account in accts.values() {
            let bytes =
                bincode::serialize(account).map_err(|e| StateError::Corrupt(e.to_string()))?;
            self.trie.upsert(account.address.as_bytes(), &bytes)?;
        }
        Ok(updates)
    }
}

fn fetch<'a>(
    trie: &Trie,
    accts: &'a mut HashMap<Address, Account>,
    addr: &Address,
) -> Result<&'a mut Account, StateError> {
    if !accts.contains_key(addr) {
        let account = match trie.get(addr.as_bytes())? {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| StateError::Corrupt(e.to_string()))?
            }
            None => Account::empty(addr.clone()),
        };
        accts.insert(addr.clone(), account);
    }
    Ok(accts.get_mut(addr).expect("account just inserted"))
}

/// First action of a sender in a block must carry `account.nonce + 1`;
/// later ones must keep increasing.
fn check_nonce(
    acct: &Account,
    seen: &mut HashSet<Address>,
    got: u64,
) -> Result<(), StateError> {
    let first = seen.insert(acct.address.clone());
    let ok = if first { got == acct.nonce + 1 } else { got > acct.nonce };
    if !ok {
        return Err(StateError::BadNonce {
            addr: acct.address.clone(),
            got,
            expected: acct.nonce + 1,
        });
    }
    Ok(())
}

/// Balance changes ripple into the votee's weight by the delta.
fn credit(
    trie: &Trie,
    accts: &mut HashMap<Address, Account>,
    addr: &Address,
    amount: u64,
) -> Result<(), StateError> {
    let (votee, new_balance) = {
        let acct = fetch(trie, accts, addr)?;
        acct.balance = acct.balance.saturating_add(amount);
        (acct.votee.clone(), acct.balance)
    };
    if let Some(votee_addr) = votee {
        let votee = fetch(trie, accts, &votee_addr)?;
        votee.voting_weight = votee.voting_weight.saturating_add(amount);
        votee.voters.insert(addr.clone(), new_balance);
    }
    Ok(())
}

fn debit(
    trie: &Trie,
    accts: &mut HashMap<Address, Account>,
    addr: &Address,
    amount: u64,
) -> Result<(), StateError> {
    let (votee, new_balance) = {
        let acct = fetch(trie, accts, addr)?;
        acct.balance = acct.balance.saturating_sub(amount);
        (acct.votee.clone(), acct.balance)
    };
    if let Some(votee_addr) = votee {
        let votee = fetch(trie, accts, &votee_addr)?;
        votee.voting_weight = votee.voting_weight.saturating_sub(amount);
        votee.voters.insert(addr.clone(), new_balance);
    }
    Ok(())
}
