use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::{hash_serialized, Hash, OutPoint};

/// Number of previous block hashes a version 2 ping carries as witnesses.
pub const PING_WITNESS_COUNT: usize = 10;

/// Represents the unique identifier for a Masternode, derived from its collateral UTXO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MasternodeID(pub OutPoint);

impl MasternodeID {
    /// Get the bytes representation of the MasternodeID
    pub fn as_bytes(&self) -> Vec<u8> {
        bincode::serialize(&self.0).unwrap_or_default()
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.0
    }
}

impl From<OutPoint> for MasternodeID {
    fn from(outpoint: OutPoint) -> Self {
        MasternodeID(outpoint)
    }
}

impl fmt::Display for MasternodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a registered masternode.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum MasternodeState {
    Enabled,
    Expired,
    VinSpent,
    Remove,
}

impl MasternodeState {
    /// States the periodic sweep deletes from the live set.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MasternodeState::VinSpent | MasternodeState::Remove)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MasternodeState::Enabled => "ENABLED",
            MasternodeState::Expired => "EXPIRED",
            MasternodeState::VinSpent => "VIN_SPENT",
            MasternodeState::Remove => "REMOVE",
        }
    }
}

/// Registration data shared by an announce and the record built from it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MasternodeIdentity {
    pub collateral_outpoint: OutPoint,
    pub network_address: SocketAddr,
    /// Key owning the collateral output; signs announces and the stake signover.
    #[serde(with = "serde_bytes")]
    pub collateral_public_key: Vec<u8>,
    /// Key of the running node; signs pings and votes.
    #[serde(with = "serde_bytes")]
    pub operator_public_key: Vec<u8>,
    pub protocol_version: u32,
}

impl MasternodeIdentity {
    pub fn id(&self) -> MasternodeID {
        MasternodeID(self.collateral_outpoint)
    }
}

/// Periodic signed heartbeat proving a masternode is online and following the chain.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MasternodePing {
    pub masternode_id: MasternodeID,
    /// Recent block the ping is anchored to.
    pub block_hash: Hash,
    pub sig_time: u64,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    /// Hashes of the blocks preceding the anchor, newest first. Empty for version 1 pings.
    pub witness_hashes: Vec<Hash>,
}

impl MasternodePing {
    /// Placeholder ping carried by announces that have not pinged yet.
    pub fn empty(masternode_id: MasternodeID) -> Self {
        MasternodePing {
            masternode_id,
            block_hash: [0u8; 32],
            sig_time: 0,
            signature: Vec::new(),
            witness_hashes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sig_time == 0 && self.signature.is_empty()
    }

    pub fn is_v2(&self) -> bool {
        !self.witness_hashes.is_empty()
    }

    pub fn hash(&self) -> Hash {
        hash_serialized(&(&self.masternode_id, self.sig_time))
    }

    pub fn signing_message(&self) -> Vec<u8> {
        let mut message = self.masternode_id.0.to_short_string().into_bytes();
        message.extend_from_slice(hex::encode(self.block_hash).as_bytes());
        message.extend_from_slice(self.sig_time.to_string().as_bytes());
        for witness in &self.witness_hashes {
            message.extend_from_slice(hex::encode(witness).as_bytes());
        }
        message
    }
}

/// Signed announcement of a masternode identity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MasternodeAnnounce {
    pub identity: MasternodeIdentity,
    /// Collateral key signature over [`MasternodeAnnounce::signing_message`].
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    pub sig_time: u64,
    pub last_ping: MasternodePing,
    /// Collateral key signature authorizing the operator key to stake.
    pub stake_signover: Option<Vec<u8>>,
}

impl MasternodeAnnounce {
    pub fn id(&self) -> MasternodeID {
        self.identity.id()
    }

    pub fn hash(&self) -> Hash {
        hash_serialized(&(self.sig_time, &self.identity.collateral_public_key))
    }

    pub fn signing_message(&self) -> Vec<u8> {
        let identity = &self.identity;
        let mut message = identity.network_address.to_string().into_bytes();
        message.extend_from_slice(self.sig_time.to_string().as_bytes());
        message.extend_from_slice(&identity.collateral_public_key);
        message.extend_from_slice(&identity.operator_public_key);
        message.extend_from_slice(identity.protocol_version.to_string().as_bytes());
        message
    }
}

/// Registry-side record of a masternode.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MasternodeEntry {
    pub identity: MasternodeIdentity,
    pub announce_signature: Vec<u8>,
    pub sig_time: u64,
    pub state: MasternodeState,
    pub last_ping: Option<MasternodePing>,
    /// Local time the last announce for this record was accepted.
    pub last_announce_time: u64,
    /// Local time of the last state check.
    pub last_checked: u64,
    pub stake_signover: Option<Vec<u8>>,
    /// Cached result of the last payment lookup.
    pub last_paid: u64,
}

impl MasternodeEntry {
    pub fn from_announce(announce: &MasternodeAnnounce, now: u64) -> Self {
        MasternodeEntry {
            identity: announce.identity.clone(),
            announce_signature: announce.signature.clone(),
            sig_time: announce.sig_time,
            state: MasternodeState::Enabled,
            last_ping: (!announce.last_ping.is_empty()).then(|| announce.last_ping.clone()),
            last_announce_time: now,
            last_checked: 0,
            stake_signover: announce.stake_signover.clone(),
            last_paid: 0,
        }
    }

    /// Rebuilds the announce this record was created from, for relaying to peers.
    pub fn to_announce(&self) -> MasternodeAnnounce {
        MasternodeAnnounce {
            identity: self.identity.clone(),
            signature: self.announce_signature.clone(),
            sig_time: self.sig_time,
            last_ping: self
                .last_ping
                .clone()
                .unwrap_or_else(|| MasternodePing::empty(self.id())),
            stake_signover: self.stake_signover.clone(),
        }
    }

    pub fn id(&self) -> MasternodeID {
        self.identity.id()
    }

    pub fn is_enabled(&self) -> bool {
        self.state == MasternodeState::Enabled
    }

    /// Whether the node pinged (or announced, before its first ping) within `seconds` of `now`.
    pub fn is_pinged_within(&self, seconds: u64, now: u64) -> bool {
        let last = self
            .last_ping
            .as_ref()
            .map(|ping| ping.sig_time)
            .unwrap_or(self.sig_time);
        now.saturating_sub(last) < seconds
    }

    pub fn is_announced_within(&self, seconds: u64, now: u64) -> bool {
        now.saturating_sub(self.last_announce_time) < seconds
    }

    /// Merges a newer announce into the record. Returns false when the announce is not newer.
    pub fn update_from_announce(&mut self, announce: &MasternodeAnnounce, now: u64) -> bool {
        if announce.sig_time <= self.sig_time {
            return false;
        }
        self.identity = announce.identity.clone();
        self.announce_signature = announce.signature.clone();
        self.sig_time = announce.sig_time;
        self.stake_signover = announce.stake_signover.clone();
        self.last_announce_time = now;
        if !announce.last_ping.is_empty() {
            self.last_ping = Some(announce.last_ping.clone());
        }
        true
    }
}

/// Signed vote for the script that must receive the masternode subsidy at a height.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PaymentWinnerVote {
    pub voter: MasternodeID,
    pub block_height: u64,
    #[serde(with = "serde_bytes")]
    pub payee: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl PaymentWinnerVote {
    pub fn new(voter: MasternodeID, block_height: u64, payee: Vec<u8>) -> Self {
        PaymentWinnerVote { voter, block_height, payee, signature: Vec::new() }
    }

    pub fn hash(&self) -> Hash {
        hash_serialized(&(&self.payee, self.block_height, &self.voter))
    }

    pub fn signing_message(&self) -> Vec<u8> {
        let mut message = self.voter.0.to_short_string().into_bytes();
        message.extend_from_slice(self.block_height.to_string().as_bytes());
        message.extend_from_slice(hex::encode(&self.payee).as_bytes());
        message
    }
}

/// Signed vote locking the inputs of a transaction at a given height.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConsensusVote {
    pub voter: MasternodeID,
    pub txid: Hash,
    pub block_height: u64,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    /// Local expiry; not part of the wire format.
    #[serde(skip)]
    pub expiration: u64,
}

impl ConsensusVote {
    pub fn new(voter: MasternodeID, txid: Hash, block_height: u64) -> Self {
        ConsensusVote { voter, txid, block_height, signature: Vec::new(), expiration: 0 }
    }

    pub fn hash(&self) -> Hash {
        hash_serialized(&(&self.voter, &self.txid))
    }

    pub fn signing_message(&self) -> Vec<u8> {
        let mut message = hex::encode(self.txid).into_bytes();
        message.extend_from_slice(self.block_height.to_string().as_bytes());
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> MasternodeIdentity {
        MasternodeIdentity {
            collateral_outpoint: OutPoint::new([1u8; 32], 0),
            network_address: "10.1.2.3:9340".parse().unwrap(),
            collateral_public_key: vec![2u8; 32],
            operator_public_key: vec![3u8; 32],
            protocol_version: 70040,
        }
    }

    #[test]
    fn test_vote_hash_ignores_signature() {
        let mut vote = PaymentWinnerVote::new(MasternodeID(OutPoint::new([5u8; 32], 1)), 100, vec![1, 2]);
        let unsigned = vote.hash();
        vote.signature = vec![9u8; 64];
        assert_eq!(unsigned, vote.hash());
        vote.block_height = 101;
        assert_ne!(unsigned, vote.hash());
    }

    #[test]
    fn test_consensus_vote_hash_is_per_voter_and_tx() {
        let voter = MasternodeID(OutPoint::new([5u8; 32], 1));
        let a = ConsensusVote::new(voter, [1u8; 32], 10);
        let b = ConsensusVote::new(voter, [1u8; 32], 11);
        let c = ConsensusVote::new(voter, [2u8; 32], 10);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_entry_only_accepts_newer_announce() {
        let announce = MasternodeAnnounce {
            identity: test_identity(),
            signature: vec![1u8; 64],
            sig_time: 1000,
            last_ping: MasternodePing::empty(test_identity().id()),
            stake_signover: None,
        };
        let mut entry = MasternodeEntry::from_announce(&announce, 1000);
        assert!(entry.last_ping.is_none());
        assert!(!entry.update_from_announce(&announce, 1100));

        let mut newer = announce.clone();
        newer.sig_time = 2000;
        assert!(entry.update_from_announce(&newer, 2000));
        assert_eq!(entry.sig_time, 2000);
        assert_eq!(entry.to_announce().hash(), newer.hash());
    }

    #[test]
    fn test_ping_signing_message_covers_witnesses() {
        let mut ping = MasternodePing::empty(test_identity().id());
        ping.sig_time = 50;
        let v1 = ping.signing_message();
        ping.witness_hashes = vec![[7u8; 32]; PING_WITNESS_COUNT];
        assert!(ping.is_v2());
        assert_ne!(v1, ping.signing_message());
    }
}
