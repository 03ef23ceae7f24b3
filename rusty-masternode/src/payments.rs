//! Masternode payment voting.
//!
//! The top-ranked masternodes vote on which masternode is paid at each height. Votes are
//! folded into one tally per height; a payee backed by enough votes becomes mandatory in
//! the coinbase of that block.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;

use rusty_crypto::hash::payee_script;
use rusty_shared_types::{
    GossipMessage, Hash, Inv, InvType, MasternodeID, PaymentWinnerVote, PeerId, SyncItem, Transaction, TxOutput,
};

use crate::chain::NodeContext;
use crate::config::Network;
use crate::constants::*;
use crate::error::{MasternodeError, MasternodeResult};
use crate::registry::{PaymentHistory, Registry};
use crate::sync::SyncTracker;

/// Votes collected for one payee script at one height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayeeTally {
    pub script: Vec<u8>,
    pub votes: u32,
}

/// Tally of every payee voted for at one height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPayees {
    pub block_height: u64,
    pub payees: Vec<PayeeTally>,
}

impl BlockPayees {
    pub fn new(block_height: u64) -> Self {
        Self { block_height, payees: Vec::new() }
    }

    pub fn add_payee(&mut self, script: &[u8], weight: u32) {
        match self.payees.iter_mut().find(|p| p.script == script) {
            Some(tally) => tally.votes = tally.votes.saturating_add(weight),
            None => self.payees.push(PayeeTally { script: script.to_vec(), votes: weight }),
        }
    }

    /// Payee with the most votes; ties go to the smallest script.
    pub fn best_payee(&self) -> Option<&PayeeTally> {
        self.payees
            .iter()
            .max_by(|a, b| a.votes.cmp(&b.votes).then_with(|| b.script.cmp(&a.script)))
    }

    pub fn has_payee_with_votes(&self, script: &[u8], votes: u32) -> bool {
        self.payees.iter().any(|p| p.script == script && p.votes >= votes)
    }

    /// Whether `tx` pays one of the payees that reached `required_votes`.
    ///
    /// Passes when no payee reached the threshold. With `slot_only` the payment must be
    /// the output at the fixed masternode slot.
    pub fn is_transaction_valid(&self, tx: &Transaction, required_amount: u64, required_votes: u32, slot_only: bool) -> bool {
        let max_votes = self.payees.iter().map(|p| p.votes).max().unwrap_or(0);
        if max_votes < required_votes {
            return true;
        }

        let outputs = tx.get_outputs();
        let candidates: &[TxOutput] = if slot_only {
            outputs.get(MN_PMT_SLOT..MN_PMT_SLOT + 1).unwrap_or(&[])
        } else {
            outputs
        };

        let paid = self
            .payees
            .iter()
            .filter(|p| p.votes >= required_votes)
            .any(|p| candidates.iter().any(|out| out.script_pubkey == p.script && out.value == required_amount));
        if !paid {
            warn!(
                "Missing required masternode payment at height {}, expected one of {}",
                self.block_height,
                self.required_payments_string(required_votes)
            );
        }
        paid
    }

    /// Payees with at least `min_votes` votes, as `script:votes` pairs.
    pub fn required_payments_string(&self, min_votes: u32) -> String {
        let parts: Vec<String> = self
            .payees
            .iter()
            .filter(|p| p.votes >= min_votes)
            .map(|p| format!("{}:{}", hex::encode(&p.script), p.votes))
            .collect();
        if parts.is_empty() {
            "Unknown".to_string()
        } else {
            parts.join(", ")
        }
    }
}

#[derive(Default)]
struct PaymentState {
    votes: HashMap<Hash, PaymentWinnerVote>,
    blocks: BTreeMap<u64, BlockPayees>,
    /// (voter, height) pairs that already voted
    voted: HashSet<(MasternodeID, u64)>,
    last_local_vote_height: u64,
    /// Peers that already received a payment sync
    synced_peers: HashSet<PeerId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentStats {
    pub votes: usize,
    pub tallies: usize,
    pub last_local_vote_height: u64,
}

/// Collects payment votes and validates coinbase payees.
pub struct PaymentVoting {
    ctx: NodeContext,
    registry: Arc<Registry>,
    sync: Arc<SyncTracker>,
    state: RwLock<PaymentState>,
}

impl PaymentVoting {
    pub fn new(ctx: NodeContext, registry: Arc<Registry>, sync: Arc<SyncTracker>) -> Self {
        Self {
            ctx,
            registry,
            sync,
            state: RwLock::new(PaymentState::default()),
        }
    }

    pub fn min_payment_protocol(&self) -> u32 {
        self.ctx.config.min_payment_protocol()
    }

    fn lookback(&self) -> u64 {
        self.ctx
            .config
            .lookback_blocks(self.registry.count_enabled(Some(self.min_payment_protocol())))
    }

    fn required_votes(&self) -> u32 {
        self.ctx.config.payments.quorum.signatures_required as u32
    }

    fn vote_weight(&self, voter: &MasternodeID) -> u32 {
        if self.ctx.config.is_reference_node(voter) {
            self.ctx.config.payments.reference_node_weight
        } else {
            1
        }
    }

    /// True the first time `voter` asks to vote at `block_height`, false afterwards.
    pub fn can_vote(&self, voter: &MasternodeID, block_height: u64) -> bool {
        self.state.write().voted.insert((*voter, block_height))
    }

    /// Validates and records a payment vote received from the network, then relays it.
    pub fn process_winner_vote(&self, vote: &PaymentWinnerVote) -> MasternodeResult<()> {
        let hash = vote.hash();
        if self.state.read().votes.contains_key(&hash) {
            return Err(MasternodeError::Duplicate(format!("payment vote {}", hex::encode(hash))));
        }

        let tip = self
            .ctx
            .chain
            .tip_height()
            .ok_or_else(|| MasternodeError::NotReady("no chain tip".to_string()))?;
        let lowest = tip.saturating_sub(self.lookback());
        let highest = tip + self.ctx.config.payments.future_window;
        if vote.block_height < lowest || vote.block_height > highest {
            return Err(MasternodeError::Stale(format!(
                "payment vote for height {} outside {}..={}",
                vote.block_height, lowest, highest
            )));
        }

        let voter = self
            .registry
            .find(&vote.voter)
            .ok_or(MasternodeError::UnknownMasternode(vote.voter))?;
        let min_protocol = self.min_payment_protocol();
        if voter.identity.protocol_version < min_protocol {
            return Err(MasternodeError::policy(
                format!("voter {} runs outdated protocol {}", vote.voter, voter.identity.protocol_version),
                0,
            ));
        }

        if !self.ctx.config.is_reference_node(&vote.voter) {
            self.check_voter_rank(&vote.voter, vote.block_height, min_protocol)?;
        }

        if !self
            .ctx
            .signer
            .verify(&voter.identity.operator_public_key, &vote.signature, &vote.signing_message())
        {
            return Err(MasternodeError::InvalidSignature {
                what: format!("payment vote from {}", vote.voter),
                dos: DOS_PAYMENT_VOTE,
                signer: Some(vote.voter),
            });
        }

        if !self.can_vote(&vote.voter, vote.block_height) {
            return Err(MasternodeError::policy(
                format!("{} already voted for height {}", vote.voter, vote.block_height),
                0,
            ));
        }

        self.add_winning_masternode(vote, self.vote_weight(&vote.voter))?;
        debug!(
            "Payment vote from {} for {} at height {}",
            vote.voter,
            hex::encode(&vote.payee),
            vote.block_height
        );
        self.ctx.transport.relay(Inv::new(InvType::PaymentWinner, hash));
        Ok(())
    }

    fn check_voter_rank(&self, voter: &MasternodeID, block_height: u64, min_protocol: u32) -> MasternodeResult<()> {
        let rank_height = block_height.saturating_sub(self.ctx.config.payments.rank_offset);
        let committee_size = self.ctx.config.payments.quorum.committee_size;
        match self.registry.rank_of(voter, rank_height, min_protocol, true) {
            None => Err(MasternodeError::NotReady(format!("no rank for {} at height {}", voter, rank_height))),
            Some(rank) if !self.ctx.config.payments.quorum.is_committee_rank(rank) => {
                let dos = if rank > committee_size * 2 { DOS_PAYMENT_VOTE } else { 0 };
                Err(MasternodeError::policy(format!("voter {} has rank {}", voter, rank), dos))
            }
            Some(_) => Ok(()),
        }
    }

    /// Stores a vote and folds it into the tally of its height.
    pub fn add_winning_masternode(&self, vote: &PaymentWinnerVote, weight: u32) -> MasternodeResult<()> {
        let scored_height = vote.block_height.saturating_sub(self.ctx.config.payments.rank_offset);
        if self.ctx.chain.block_hash_at(scored_height).is_none() {
            return Err(MasternodeError::NotReady(format!("no block at height {}", scored_height)));
        }

        let hash = vote.hash();
        let mut state = self.state.write();
        if state.votes.contains_key(&hash) {
            return Err(MasternodeError::Duplicate(format!("payment vote {}", hex::encode(hash))));
        }
        state.votes.insert(hash, vote.clone());
        state
            .blocks
            .entry(vote.block_height)
            .or_insert_with(|| BlockPayees::new(vote.block_height))
            .add_payee(&vote.payee, weight);
        Ok(())
    }

    // ---------------------------------------------------------------------------------
    // Tallies
    // ---------------------------------------------------------------------------------

    /// Script with the most votes at `block_height`, whatever its vote count.
    pub fn block_payee(&self, block_height: u64) -> Option<Vec<u8>> {
        self.state
            .read()
            .blocks
            .get(&block_height)
            .and_then(|b| b.best_payee())
            .map(|p| p.script.clone())
    }

    /// Leading payee at `block_height` once it has enough votes to be enforced.
    pub fn winner(&self, block_height: u64) -> Option<PayeeTally> {
        let required = self.required_votes();
        self.state
            .read()
            .blocks
            .get(&block_height)
            .and_then(|b| b.best_payee())
            .filter(|p| p.votes >= required)
            .cloned()
    }

    pub fn tally(&self, block_height: u64) -> Option<BlockPayees> {
        self.state.read().blocks.get(&block_height).cloned()
    }

    pub fn is_transaction_valid(&self, tx: &Transaction, block_height: u64, required_amount: u64) -> bool {
        let slot_only = self.ctx.config.pos_start_height.map_or(false, |start| block_height >= start);
        let required = self.required_votes();
        match self.state.read().blocks.get(&block_height) {
            Some(payees) => payees.is_transaction_valid(tx, required_amount, required, slot_only),
            None => true,
        }
    }

    /// Whether the coinbase of the block at `block_height` pays the elected masternode.
    pub fn is_block_payee_valid(&self, coinbase: &Transaction, block_height: u64, block_time: u64, block_value: u64) -> bool {
        if !self.sync.is_synced(SyncItem::List) {
            debug!("Masternode list not synced, skipping payee check at height {}", block_height);
            return true;
        }

        let previous_time = block_height
            .checked_sub(1)
            .and_then(|height| self.ctx.chain.block_time_at(height));
        if let Some(previous_time) = previous_time {
            if block_time.saturating_sub(previous_time) > self.ctx.config.chain_stall_duration_secs {
                info!("Chain stalled before height {}, accepting any masternode payee", block_height);
                return true;
            }
        }

        let required_amount = self.ctx.chain.masternode_payment(block_height, block_value);
        if self.is_transaction_valid(coinbase, block_height, required_amount) {
            return true;
        }
        if self.ctx.config.payments.enforce_payments {
            false
        } else {
            warn!("Masternode payment enforcement is off, accepting invalid payee at height {}", block_height);
            true
        }
    }

    /// Payee the next block producer should pay at `block_height`.
    pub fn compute_intended_payee(&self, block_height: u64) -> Option<Vec<u8>> {
        if let Some(script) = self.block_payee(block_height) {
            return Some(script);
        }
        if let (Some(entry), _) = self.registry.next_due_for_payment(block_height, true, self) {
            return Some(payee_script(&entry.identity.collateral_public_key));
        }
        let tip = self.ctx.chain.tip_height()?;
        self.registry
            .current_masternode(tip, self.min_payment_protocol())
            .map(|entry| payee_script(&entry.identity.collateral_public_key))
    }

    /// Inserts the masternode payment at its coinbase slot, taking the amount from output 0.
    ///
    /// Returns the payee script, or `None` when no payee is known.
    pub fn fill_block_payee(&self, coinbase: &mut Transaction, block_height: u64, block_value: u64) -> MasternodeResult<Option<Vec<u8>>> {
        let payee = match self.compute_intended_payee(block_height) {
            Some(payee) => payee,
            None => {
                debug!("No masternode to pay at height {}", block_height);
                return Ok(None);
            }
        };
        let amount = self.ctx.chain.masternode_payment(block_height, block_value);

        let reward = coinbase
            .outputs
            .first_mut()
            .ok_or_else(|| MasternodeError::Logic("coinbase has no outputs".to_string()))?;
        reward.value = reward
            .value
            .checked_sub(amount)
            .ok_or_else(|| MasternodeError::Logic("masternode payment exceeds the block reward".to_string()))?;

        let slot = MN_PMT_SLOT.min(coinbase.outputs.len());
        coinbase.outputs.insert(slot, TxOutput::new(amount, payee.clone()));
        info!("Masternode payment of {} to {} at height {}", amount, hex::encode(&payee), block_height);
        Ok(Some(payee))
    }

    pub fn required_payments_string(&self, block_height: u64) -> String {
        match self.state.read().blocks.get(&block_height) {
            Some(payees) => payees.required_payments_string(0),
            None => "Unknown".to_string(),
        }
    }

    // ---------------------------------------------------------------------------------
    // Local voting
    // ---------------------------------------------------------------------------------

    /// Casts this masternode's vote for `block_height` if it is on the committee.
    ///
    /// Returns whether a vote was cast.
    pub fn process_block(&self, block_height: u64) -> MasternodeResult<bool> {
        let local = match &self.ctx.local {
            Some(local) => local.clone(),
            None => return Ok(false),
        };
        if block_height <= self.state.read().last_local_vote_height {
            return Ok(false);
        }

        let id = local.id();
        let min_protocol = self.min_payment_protocol();
        if !self.ctx.config.is_reference_node(&id) {
            let rank_height = block_height.saturating_sub(self.ctx.config.payments.rank_offset);
            match self.registry.rank_of(&id, rank_height, min_protocol, true) {
                Some(rank) if self.ctx.config.payments.quorum.is_committee_rank(rank) => {}
                other => {
                    debug!("Not voting on payments for height {}, rank {:?}", block_height, other);
                    return Ok(false);
                }
            }
        }

        let (entry, candidates) = self.registry.next_due_for_payment(block_height, true, self);
        let entry = entry.ok_or_else(|| {
            MasternodeError::NotReady(format!("no payee due at height {} among {} candidates", block_height, candidates))
        })?;

        let mut vote = PaymentWinnerVote::new(id, block_height, payee_script(&entry.identity.collateral_public_key));
        vote.signature = self.ctx.signer.sign(&vote.signing_message(), &local.operator_key)?;

        if !self.can_vote(&id, block_height) {
            return Ok(false);
        }
        self.add_winning_masternode(&vote, self.vote_weight(&id))?;
        self.state.write().last_local_vote_height = block_height;

        info!("Voted for masternode {} at height {}", entry.id(), block_height);
        self.ctx.transport.relay(Inv::new(InvType::PaymentWinner, vote.hash()));
        Ok(true)
    }

    // ---------------------------------------------------------------------------------
    // Sync
    // ---------------------------------------------------------------------------------

    /// Sends a peer every stored vote near the tip. On the main network a peer may ask once.
    ///
    /// Returns the number of votes sent.
    pub fn handle_sync_request(&self, peer: &PeerId, count_needed: u32) -> MasternodeResult<usize> {
        if self.ctx.config.network == Network::Main && !self.ctx.transport.peer_is_local(peer) {
            let mut state = self.state.write();
            if !state.synced_peers.insert(peer.clone()) {
                return Err(MasternodeError::policy(
                    format!("peer {} asked for payment votes again", peer),
                    DOS_PAYMENT_VOTE,
                ));
            }
        }

        let tip = self
            .ctx
            .chain
            .tip_height()
            .ok_or_else(|| MasternodeError::NotReady("no chain tip".to_string()))?;
        let needed = (count_needed as u64).min(self.lookback());
        let lowest = tip.saturating_sub(needed);
        let highest = tip + self.ctx.config.payments.future_window;

        let votes: Vec<PaymentWinnerVote> = self
            .state
            .read()
            .votes
            .values()
            .filter(|v| v.block_height >= lowest && v.block_height <= highest)
            .cloned()
            .collect();

        let count = votes.len();
        for vote in votes {
            self.ctx.transport.push_to(peer, GossipMessage::PaymentWinner(vote));
        }
        self.ctx
            .transport
            .push_to(peer, GossipMessage::SyncStatusCount(SyncItem::Winners, count as u32));
        debug!("Sent {} payment votes to peer {}", count, peer);
        Ok(count)
    }

    /// Asks a peer for the payment votes of the current lookback window.
    pub fn request_sync(&self, peer: &PeerId) {
        let count = self.lookback().min(u32::MAX as u64) as u32;
        self.ctx.transport.push_to(peer, GossipMessage::RequestPaymentSync(count));
    }

    // ---------------------------------------------------------------------------------
    // Maintenance and queries
    // ---------------------------------------------------------------------------------

    /// Drops votes and tallies that fell out of the retained window.
    pub fn check_and_remove(&self) -> usize {
        let tip = match self.ctx.chain.tip_height() {
            Some(tip) => tip,
            None => return 0,
        };
        let keep = self.lookback().max(self.ctx.config.payments.min_retained_blocks);
        let cutoff = tip.saturating_sub(keep);

        let mut state = self.state.write();
        let before = state.votes.len();
        state.votes.retain(|_, vote| vote.block_height >= cutoff);
        state.voted.retain(|(_, height)| *height >= cutoff);
        let kept = state.blocks.split_off(&cutoff);
        state.blocks = kept;
        let removed = before - state.votes.len();
        if removed > 0 {
            debug!("Removed {} payment votes below height {}", removed, cutoff);
        }
        removed
    }

    pub fn vote(&self, hash: &Hash) -> Option<PaymentWinnerVote> {
        self.state.read().votes.get(hash).cloned()
    }

    pub fn has_vote(&self, hash: &Hash) -> bool {
        self.state.read().votes.contains_key(hash)
    }

    pub fn clear(&self) {
        *self.state.write() = PaymentState::default();
    }

    pub fn stats(&self) -> PaymentStats {
        let state = self.state.read();
        PaymentStats {
            votes: state.votes.len(),
            tallies: state.blocks.len(),
            last_local_vote_height: state.last_local_vote_height,
        }
    }
}

impl PaymentHistory for PaymentVoting {
    fn is_scheduled(&self, payee: &[u8], not_height: u64) -> bool {
        let tip = match self.ctx.chain.tip_height() {
            Some(tip) => tip,
            None => return false,
        };
        let state = self.state.read();
        (tip..=tip + PAYMENT_SCHEDULE_WINDOW)
            .filter(|height| *height != not_height)
            .filter_map(|height| state.blocks.get(&height))
            .any(|block| block.best_payee().map_or(false, |p| p.script == payee))
    }

    fn has_payee_with_votes(&self, height: u64, payee: &[u8], votes: u32) -> bool {
        self.state
            .read()
            .blocks
            .get(&height)
            .map_or(false, |block| block.has_payee_with_votes(payee, votes))
    }
}
