//! In-memory collaborators for regtest setups and tests.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};

use rusty_crypto::hash::blake3_concat;
use rusty_shared_types::{GossipMessage, Hash, Inv, OutPoint, PeerId, Transaction};

use crate::chain::{ChainActions, ChainView, Transport};

#[derive(Debug, Clone)]
struct Coin {
    value: u64,
    script: Vec<u8>,
    height: u64,
    spent: bool,
}

#[derive(Default)]
struct ChainState {
    /// (hash, time) per height
    blocks: Vec<(Hash, u64)>,
    coins: HashMap<OutPoint, Coin>,
    txs: HashMap<Hash, u64>,
}

/// A best chain and UTXO set held in memory.
pub struct MemoryChain {
    state: RwLock<ChainState>,
    /// Masternode share of the block value, in percent
    masternode_share_percent: u64,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChainState::default()),
            masternode_share_percent: 20,
        }
    }

    /// Appends a block and returns its hash.
    pub fn push_block(&self, time: u64) -> Hash {
        let mut state = self.state.write();
        let height = state.blocks.len() as u64;
        let previous = state.blocks.last().map(|(hash, _)| *hash).unwrap_or([0u8; 32]);
        let hash = blake3_concat(&[&height.to_le_bytes(), &previous, &time.to_le_bytes()]);
        state.blocks.push((hash, time));
        hash
    }

    /// Extends the chain up to `height` with blocks `spacing` seconds apart.
    pub fn extend_to(&self, height: u64, spacing: u64) {
        loop {
            let (next, last_time) = {
                let state = self.state.read();
                (state.blocks.len() as u64, state.blocks.last().map(|(_, t)| *t).unwrap_or(0))
            };
            if next > height {
                break;
            }
            self.push_block(last_time + spacing);
        }
    }

    pub fn add_coin(&self, outpoint: OutPoint, value: u64, script: Vec<u8>, height: u64) {
        self.state
            .write()
            .coins
            .insert(outpoint, Coin { value, script, height, spent: false });
    }

    pub fn spend(&self, outpoint: &OutPoint) {
        if let Some(coin) = self.state.write().coins.get_mut(outpoint) {
            coin.spent = true;
        }
    }

    pub fn add_transaction(&self, txid: Hash, height: u64) {
        self.state.write().txs.insert(txid, height);
    }

    pub fn block_count(&self) -> u64 {
        self.state.read().blocks.len() as u64
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainView for MemoryChain {
    fn tip_height(&self) -> Option<u64> {
        (self.state.read().blocks.len() as u64).checked_sub(1)
    }

    fn block_hash_at(&self, height: u64) -> Option<Hash> {
        self.state.read().blocks.get(height as usize).map(|(hash, _)| *hash)
    }

    fn block_height_of(&self, hash: &Hash) -> Option<u64> {
        self.state
            .read()
            .blocks
            .iter()
            .position(|(h, _)| h == hash)
            .map(|p| p as u64)
    }

    fn block_time_at(&self, height: u64) -> Option<u64> {
        self.state.read().blocks.get(height as usize).map(|(_, time)| *time)
    }

    fn confirmations(&self, outpoint: &OutPoint) -> Option<u64> {
        let tip = self.tip_height()?;
        let state = self.state.read();
        let coin = state.coins.get(outpoint).filter(|c| !c.spent)?;
        (coin.height <= tip).then(|| tip - coin.height + 1)
    }

    fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.state.read().coins.get(outpoint).map_or(false, |c| c.spent)
    }

    fn amount_of(&self, outpoint: &OutPoint) -> Option<u64> {
        self.state.read().coins.get(outpoint).map(|c| c.value)
    }

    fn script_of(&self, outpoint: &OutPoint) -> Option<Vec<u8>> {
        self.state.read().coins.get(outpoint).map(|c| c.script.clone())
    }

    fn tx_confirmations(&self, txid: &Hash) -> Option<u64> {
        let tip = self.tip_height()?;
        let height = *self.state.read().txs.get(txid)?;
        (height <= tip).then(|| tip - height + 1)
    }

    fn masternode_payment(&self, _height: u64, block_value: u64) -> u64 {
        block_value / 100 * self.masternode_share_percent
    }
}

/// Mempool stand-in that accepts everything except listed transactions.
#[derive(Default)]
pub struct MemoryActions {
    refused: RwLock<HashSet<Hash>>,
    accepted: Mutex<Vec<Hash>>,
    reprocessed: Mutex<Vec<u64>>,
}

impl MemoryActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(&self, txid: Hash) {
        self.refused.write().insert(txid);
    }

    pub fn accepted(&self) -> Vec<Hash> {
        self.accepted.lock().clone()
    }

    /// Depths passed to `reprocess_blocks`, in call order.
    pub fn reprocessed(&self) -> Vec<u64> {
        self.reprocessed.lock().clone()
    }
}

impl ChainActions for MemoryActions {
    fn accept_to_mempool(&self, tx: &Transaction) -> bool {
        let txid = tx.txid();
        if self.refused.read().contains(&txid) {
            return false;
        }
        self.accepted.lock().push(txid);
        true
    }

    fn reprocess_blocks(&self, depth: u64) {
        self.reprocessed.lock().push(depth);
    }
}

/// Transport that records everything sent through it.
#[derive(Default)]
pub struct RecordingTransport {
    relayed: Mutex<Vec<Inv>>,
    pushed: Mutex<Vec<(PeerId, GossipMessage)>>,
    misbehavior: Mutex<HashMap<PeerId, u32>>,
    local_peers: RwLock<HashSet<PeerId>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_local(&self, peer: &PeerId) {
        self.local_peers.write().insert(peer.clone());
    }

    pub fn relayed(&self) -> Vec<Inv> {
        self.relayed.lock().clone()
    }

    pub fn pushed_to(&self, peer: &PeerId) -> Vec<GossipMessage> {
        self.pushed
            .lock()
            .iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn misbehavior_of(&self, peer: &PeerId) -> u32 {
        self.misbehavior.lock().get(peer).copied().unwrap_or(0)
    }

    pub fn clear(&self) {
        self.relayed.lock().clear();
        self.pushed.lock().clear();
        self.misbehavior.lock().clear();
    }
}

impl Transport for RecordingTransport {
    fn relay(&self, inv: Inv) {
        self.relayed.lock().push(inv);
    }

    fn push_to(&self, peer: &PeerId, message: GossipMessage) {
        self.pushed.lock().push((peer.clone(), message));
    }

    fn misbehaving(&self, peer: &PeerId, score: u32) {
        *self.misbehavior.lock().entry(peer.clone()).or_insert(0) += score;
    }

    fn peer_is_local(&self, peer: &PeerId) -> bool {
        self.local_peers.read().contains(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmations_follow_the_tip() {
        let chain = MemoryChain::new();
        chain.extend_to(10, 60);
        assert_eq!(chain.tip_height(), Some(10));

        let outpoint = OutPoint::new([4u8; 32], 1);
        chain.add_coin(outpoint, 500, vec![1, 2], 8);
        assert_eq!(chain.confirmations(&outpoint), Some(3));
        assert_eq!(chain.coin_height(&outpoint), Some(8));

        chain.push_block(10_000);
        assert_eq!(chain.confirmations(&outpoint), Some(4));

        chain.spend(&outpoint);
        assert_eq!(chain.confirmations(&outpoint), None);
        assert!(chain.is_spent(&outpoint));
        assert_eq!(chain.amount_of(&outpoint), Some(500));
    }

    #[test]
    fn test_block_lookup_both_ways() {
        let chain = MemoryChain::new();
        chain.extend_to(5, 60);
        let hash = chain.block_hash_at(3).unwrap();
        assert_eq!(chain.block_height_of(&hash), Some(3));
        assert_eq!(chain.block_time_at(3), Some(240));
    }
}
