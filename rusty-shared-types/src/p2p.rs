use serde::{Deserialize, Serialize};

use crate::masternode::{ConsensusVote, MasternodeAnnounce, MasternodePing, PaymentWinnerVote};
use crate::{Hash, OutPoint, Transaction, TypesError};

/// Identifier the transport uses for a connected peer.
pub type PeerId = String;

/// Masternode-layer gossip messages.
///
/// Decoded once at the transport boundary and dispatched by exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipMessage {
    Announce(MasternodeAnnounce),
    Ping(MasternodePing),
    /// Ask for the whole list, or only for one masternode.
    RequestList(Option<OutPoint>),
    PaymentWinner(PaymentWinnerVote),
    /// Ask for stored payment votes; the payload is the number of blocks wanted.
    RequestPaymentSync(u32),
    LockRequest(Transaction),
    LockVote(ConsensusVote),
    /// Ask for every stored lock vote.
    RequestLockVotes,
    /// Number of items sent in reply to a sync request.
    SyncStatusCount(SyncItem, u32),
}

impl GossipMessage {
    pub fn encode(&self) -> Result<Vec<u8>, TypesError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TypesError> {
        bincode::deserialize(bytes).map_err(|e| TypesError::Deserialization(e.to_string()))
    }

    /// Short command name used in logs.
    pub fn command(&self) -> &'static str {
        match self {
            GossipMessage::Announce(_) => "mnb",
            GossipMessage::Ping(_) => "mnp",
            GossipMessage::RequestList(_) => "dseg",
            GossipMessage::PaymentWinner(_) => "mnw",
            GossipMessage::RequestPaymentSync(_) => "mnget",
            GossipMessage::LockRequest(_) => "ix",
            GossipMessage::LockVote(_) => "txlvote",
            GossipMessage::RequestLockVotes => "txllist",
            GossipMessage::SyncStatusCount(..) => "ssc",
        }
    }
}

/// Items tracked by the list synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncItem {
    List,
    Winners,
}

/// Inventory message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Inv {
    pub inv_type: InvType,
    pub hash: Hash,
}

impl Inv {
    pub fn new(inv_type: InvType, hash: Hash) -> Self {
        Inv { inv_type, hash }
    }
}

/// Inventory types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvType {
    MasternodeAnnounce,
    MasternodePing,
    PaymentWinner,
    LockRequest,
    LockVote,
}
