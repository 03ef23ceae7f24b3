//! Collaborator interfaces the masternode layer consumes.
//!
//! Chain state, mempool admission and the peer-to-peer transport belong to other parts
//! of the node. The registry and the voting engines only see them through these traits,
//! which are shared between components as `Arc<dyn ...>` inside a [`NodeContext`].

use std::sync::Arc;

use rusty_crypto::SignatureService;
use rusty_shared_types::{GossipMessage, Hash, Inv, OutPoint, PeerId, Transaction};

use crate::active_masternode::LocalMasternode;
use crate::clock::Clock;
use crate::config::MasternodeConfig;

/// Read-only view of the best chain and its UTXO set.
pub trait ChainView: Send + Sync {
    /// Height of the best block, `None` before genesis is connected.
    fn tip_height(&self) -> Option<u64>;

    fn block_hash_at(&self, height: u64) -> Option<Hash>;

    /// Height of a block on the best chain.
    fn block_height_of(&self, hash: &Hash) -> Option<u64>;

    /// Header timestamp of the block at `height`.
    fn block_time_at(&self, height: u64) -> Option<u64>;

    /// Confirmations of an unspent output; `None` if it is unknown or spent.
    fn confirmations(&self, outpoint: &OutPoint) -> Option<u64>;

    fn is_spent(&self, outpoint: &OutPoint) -> bool;

    /// Value of an output whether or not it is spent.
    fn amount_of(&self, outpoint: &OutPoint) -> Option<u64>;

    /// Locking script of an output whether or not it is spent.
    fn script_of(&self, outpoint: &OutPoint) -> Option<Vec<u8>>;

    /// Confirmations of a mined transaction; `None` when it is not in the chain.
    fn tx_confirmations(&self, txid: &Hash) -> Option<u64>;

    /// Masternode share of the value created by the block at `height`.
    fn masternode_payment(&self, height: u64, block_value: u64) -> u64;

    /// Height of the block that created an unspent output.
    fn coin_height(&self, outpoint: &OutPoint) -> Option<u64> {
        let confirmations = self.confirmations(outpoint)?;
        let tip = self.tip_height()?;
        (confirmations > 0).then(|| tip + 1 - confirmations.min(tip + 1))
    }
}

/// Write side of the chain the instant-lock engine needs.
pub trait ChainActions: Send + Sync {
    /// Runs mempool admission; true when the transaction was accepted.
    fn accept_to_mempool(&self, tx: &Transaction) -> bool;

    /// Re-validates the last `depth` blocks.
    fn reprocess_blocks(&self, depth: u64);
}

/// Peer-to-peer transport.
pub trait Transport: Send + Sync {
    /// Announces an inventory item to all peers.
    fn relay(&self, inv: Inv);

    fn push_to(&self, peer: &PeerId, message: GossipMessage);

    fn misbehaving(&self, peer: &PeerId, score: u32);

    /// Whether the peer connects from a local or private address.
    fn peer_is_local(&self, peer: &PeerId) -> bool;
}

/// Collaborators and configuration shared by every component.
#[derive(Clone)]
pub struct NodeContext {
    pub config: Arc<MasternodeConfig>,
    pub chain: Arc<dyn ChainView>,
    pub actions: Arc<dyn ChainActions>,
    pub signer: Arc<dyn SignatureService>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
    /// Keys and collateral of this node when it runs as a masternode.
    pub local: Option<Arc<LocalMasternode>>,
}

impl NodeContext {
    pub fn now(&self) -> u64 {
        self.clock.now()
    }
}
