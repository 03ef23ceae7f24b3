//! Deterministic masternode scoring and committee formation.
//!
//! Every node derives the same ranking for a height from the same chain state: the
//! score of a masternode is a hash over its collateral outpoint, the block at which the
//! collateral became eligible and the block at the ranked height, read as a 256-bit
//! integer. Committees for payment and instant-lock voting are the top of that ranking.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use rusty_crypto::hash::blake3_concat;
use rusty_shared_types::{Hash, MasternodeID, OutPoint};

/// Committee size and vote quorum of one voting protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumConfig {
    /// Number of top-ranked masternodes allowed to vote
    pub committee_size: usize,
    /// Matching votes needed to finalize
    pub signatures_required: usize,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            committee_size: 10,
            signatures_required: 6,
        }
    }
}

impl QuorumConfig {
    pub fn is_committee_rank(&self, rank: usize) -> bool {
        rank >= 1 && rank <= self.committee_size
    }

    pub fn is_reached(&self, votes: usize) -> bool {
        votes >= self.signatures_required
    }
}

/// Voting protocols that draw a committee from the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuorumType {
    Payment,
    InstantLock,
}

impl QuorumType {
    pub fn name(&self) -> &'static str {
        match self {
            QuorumType::Payment => "payment",
            QuorumType::InstantLock => "instant-lock",
        }
    }
}

/// Score of `outpoint` for the block `block_hash`.
///
/// `collateral_anchor` is the hash of the block at which the collateral reached its
/// required confirmations, so the score cannot be steered by picking future blocks.
pub fn calculate_score(outpoint: &OutPoint, collateral_anchor: &Hash, block_hash: &Hash) -> U256 {
    let outpoint_bytes = bincode::serialize(outpoint).unwrap_or_default();
    let digest = blake3_concat(&[&outpoint_bytes, collateral_anchor, block_hash]);
    U256::from_big_endian(&digest)
}

/// A masternode with its score and 1-based rank at some height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedMasternode {
    pub id: MasternodeID,
    pub score: U256,
    pub rank: usize,
}

/// Sorts scored masternodes best first and numbers them from 1.
///
/// Ties on score fall back to the outpoint so the result never depends on the order
/// the input was collected in.
pub fn rank_by_score(mut scored: Vec<(MasternodeID, U256)>) -> Vec<RankedMasternode> {
    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored
        .into_iter()
        .enumerate()
        .map(|(index, (id, score))| RankedMasternode { id, score, rank: index + 1 })
        .collect()
}

/// The voting committee of one protocol at one height.
#[derive(Debug, Clone)]
pub struct Committee {
    pub quorum_type: QuorumType,
    pub block_height: u64,
    pub members: Vec<MasternodeID>,
    pub threshold: usize,
}

impl Committee {
    pub fn form(quorum_type: QuorumType, block_height: u64, ranking: &[RankedMasternode], config: &QuorumConfig) -> Self {
        let members = ranking
            .iter()
            .filter(|ranked| config.is_committee_rank(ranked.rank))
            .map(|ranked| ranked.id)
            .collect();
        Committee {
            quorum_type,
            block_height,
            members,
            threshold: config.signatures_required,
        }
    }

    pub fn is_member(&self, id: &MasternodeID) -> bool {
        self.members.contains(id)
    }

    /// Whether the committee is large enough to ever reach its threshold.
    pub fn can_reach_quorum(&self) -> bool {
        self.members.len() >= self.threshold
    }
}
