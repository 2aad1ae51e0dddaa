//! Core domain types: rounds, bet events, per-wallet history, and the
//! deduplication key that makes delivery idempotent.

use ethers::types::{Address, I256, U256};
use serde::{Deserialize, Serialize};

/// One betting round of the prediction contract, as returned by `rounds(epoch)`.
///
/// Fetched on demand; never cached beyond one scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub epoch: u64,
    pub start_timestamp: u64,
    pub lock_timestamp: u64,
    pub close_timestamp: u64,
    pub lock_price: I256,
    pub close_price: I256,
    pub total_amount: U256,
    pub bull_amount: U256,
    pub bear_amount: U256,
    pub oracle_called: bool,
}

/// Which side of a round an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetKind {
    Bull,
    Bear,
    Claim,
}

impl std::fmt::Display for BetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BetKind::Bull => write!(f, "bull"),
            BetKind::Bear => write!(f, "bear"),
            BetKind::Claim => write!(f, "claim"),
        }
    }
}

/// A parsed bet or claim, as delivered to subscribers.
///
/// `amount` is an exact decimal string decoded from the chain's fixed-point
/// integer representation; no rounding happens at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetEvent {
    pub kind: BetKind,
    pub epoch: u64,
    pub amount: String,
}

/// A single (epoch, amount) entry within one kind of history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub epoch: u64,
    pub amount: String,
}

/// Rolling bet/claim history for one watched address.
///
/// Rebuilt from scratch on each full resync rather than mutated in place;
/// treat it as a best-effort snapshot, not a completeness guarantee, since
/// failed fetch chunks are skipped (see `fetch`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletHistory {
    pub address: String,
    pub bulls: Vec<HistoryEntry>,
    pub bears: Vec<HistoryEntry>,
    pub claims: Vec<HistoryEntry>,
}

impl WalletHistory {
    pub fn new(address: Address) -> Self {
        Self { address: format!("{:?}", address), ..Default::default() }
    }

    pub fn total_events(&self) -> usize {
        self.bulls.len() + self.bears.len() + self.claims.len()
    }
}

/// At-most-once delivery key. `Address` is a raw 20-byte value, so the
/// case-insensitivity required of string keys is absorbed by parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub address: Address,
    pub epoch: u64,
    pub kind: BetKind,
}

impl DedupKey {
    pub fn new(address: Address, epoch: u64, kind: BetKind) -> Self {
        Self { address, epoch, kind }
    }
}
