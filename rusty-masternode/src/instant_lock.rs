//! Instant transaction locks.
//!
//! A lock request asks the top-ranked masternodes at the lock height to vote for a
//! transaction. Once enough votes at that height arrive the transaction's inputs are
//! locked to it; two locks claiming the same input cancel each other out.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;

use rusty_shared_types::{ConsensusVote, GossipMessage, Hash, Inv, InvType, MasternodeID, OutPoint, PeerId, Transaction};

use crate::chain::NodeContext;
use crate::config::InstantLockConfig;
use crate::constants::*;
use crate::error::{MasternodeError, MasternodeResult};
use crate::registry::Registry;

/// Votes gathered for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLock {
    pub txid: Hash,
    /// Height the committee is ranked at; unset until the lock request is seen.
    pub block_height: Option<u64>,
    pub votes: Vec<ConsensusVote>,
    pub expiration: u64,
    pub timeout: u64,
}

impl TransactionLock {
    pub fn new(txid: Hash, block_height: Option<u64>, now: u64, config: &InstantLockConfig) -> Self {
        Self {
            txid,
            block_height,
            votes: Vec::new(),
            expiration: now + config.expiration_seconds,
            timeout: now + config.timeout_seconds,
        }
    }

    /// Adds a vote unless the voter already voted on this transaction.
    pub fn add_vote(&mut self, vote: ConsensusVote) -> bool {
        if self.votes.iter().any(|v| v.voter == vote.voter) {
            return false;
        }
        self.votes.push(vote);
        true
    }

    /// Votes cast at the lock height; `None` while the height is unset.
    pub fn count_signatures(&self) -> Option<usize> {
        let height = self.block_height?;
        Some(self.votes.iter().filter(|v| v.block_height == height).count())
    }

    pub fn is_complete(&self, required: usize) -> bool {
        self.count_signatures().map_or(false, |count| count >= required)
    }

    pub fn is_timed_out(&self, now: u64) -> bool {
        now > self.timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Request accepted, no votes yet
    Requested,
    /// Votes arriving, quorum not reached
    Voting,
    Complete,
    /// Refused by the mempool
    Rejected,
    /// Past its expiration, waiting for the sweep
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRequestOutcome {
    Accepted { block_height: u64 },
    Rejected,
}

#[derive(Default)]
struct LockState {
    lock_requests: HashMap<Hash, Transaction>,
    rejected: HashMap<Hash, Transaction>,
    votes: HashMap<Hash, ConsensusVote>,
    locks: HashMap<Hash, TransactionLock>,
    locked_inputs: HashMap<OutPoint, Hash>,
    /// Voter -> deadline of its votes for transactions we have not seen
    unknown_votes: HashMap<MasternodeID, u64>,
}

impl LockState {
    fn average_unknown_vote_deadline(&self) -> u64 {
        if self.unknown_votes.is_empty() {
            return 0;
        }
        let total: u128 = self.unknown_votes.values().map(|d| *d as u128).sum();
        (total / self.unknown_votes.len() as u128) as u64
    }

    /// Expires both locks if an input of `tx` is claimed by another transaction.
    fn detect_conflict(&mut self, tx: &Transaction, now: u64) -> bool {
        let txid = tx.txid();
        let conflicting = tx
            .inputs
            .iter()
            .find_map(|input| match self.locked_inputs.get(&input.previous_output) {
                Some(other) if *other != txid => Some((input.previous_output, *other)),
                _ => None,
            });

        match conflicting {
            Some((outpoint, other)) => {
                warn!(
                    "Conflicting locks on input {}: {} and {}",
                    outpoint,
                    hex::encode(txid),
                    hex::encode(other)
                );
                for id in [txid, other] {
                    if let Some(lock) = self.locks.get_mut(&id) {
                        lock.expiration = now;
                    }
                }
                true
            }
            None => false,
        }
    }

    fn claim_inputs(&mut self, tx: &Transaction) {
        let txid = tx.txid();
        for input in &tx.inputs {
            self.locked_inputs.entry(input.previous_output).or_insert(txid);
        }
    }

    /// Claims the inputs of a complete, conflict-free lock. Returns true when the
    /// transaction had been refused by the mempool and blocks must be reprocessed.
    fn resolve_complete(&mut self, txid: &Hash, required: usize, now: u64) -> bool {
        if !self.locks.get(txid).map_or(false, |lock| lock.is_complete(required)) {
            return false;
        }
        if let Some(tx) = self.lock_requests.get(txid).cloned() {
            if !self.detect_conflict(&tx, now) {
                self.claim_inputs(&tx);
            }
        }
        if let Some(tx) = self.rejected.get(txid).cloned() {
            if !self.detect_conflict(&tx, now) {
                self.claim_inputs(&tx);
                self.lock_requests.insert(*txid, tx);
                return true;
            }
        }
        false
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstantLockStats {
    pub requests: usize,
    pub rejected: usize,
    pub votes: usize,
    pub locks: usize,
    pub locked_inputs: usize,
    /// Voters with recent votes for transactions we have not seen
    pub unknown_voters: usize,
}

/// Owns lock requests, consensus votes and the locked-input index.
pub struct InstantLock {
    ctx: NodeContext,
    registry: Arc<Registry>,
    state: RwLock<LockState>,
}

impl InstantLock {
    pub fn new(ctx: NodeContext, registry: Arc<Registry>) -> Self {
        Self {
            ctx,
            registry,
            state: RwLock::new(LockState::default()),
        }
    }

    fn config(&self) -> &InstantLockConfig {
        &self.ctx.config.instant_lock
    }

    fn required_votes(&self) -> usize {
        self.config().quorum.signatures_required
    }

    /// Checks that a transaction may be locked at all.
    pub fn is_ix_tx_valid(&self, tx: &Transaction) -> MasternodeResult<()> {
        if tx.outputs.is_empty() {
            return Err(MasternodeError::malformed("lock request without outputs", 0));
        }
        if tx.lock_time != 0 {
            return Err(MasternodeError::policy("lock request with a lock time", 0));
        }
        if let Some(output) = tx.outputs.iter().find(|out| out.extract_public_key_hash().is_none()) {
            return Err(MasternodeError::policy(
                format!("non-standard output script {}", hex::encode(&output.script_pubkey)),
                0,
            ));
        }

        let value_out = tx
            .total_output_value()
            .ok_or_else(|| MasternodeError::malformed("output value overflow", 0))?;
        if value_out > self.config().max_value() {
            return Err(MasternodeError::policy(
                format!("value {} above the instant lock limit {}", value_out, self.config().max_value()),
                0,
            ));
        }

        let mut value_in: u64 = 0;
        for input in &tx.inputs {
            let amount = self
                .ctx
                .chain
                .amount_of(&input.previous_output)
                .ok_or_else(|| MasternodeError::NotReady(format!("missing input {}", input.previous_output)))?;
            value_in = value_in
                .checked_add(amount)
                .ok_or_else(|| MasternodeError::malformed("input value overflow", 0))?;
        }
        if value_in < value_out + INSTANTX_MIN_FEE {
            return Err(MasternodeError::policy("lock request does not pay the minimum fee", 0));
        }
        Ok(())
    }

    fn check_tx_age(&self, txid: &Hash) -> MasternodeResult<()> {
        match self.ctx.chain.tx_confirmations(txid) {
            Some(confirmations) if confirmations > self.config().max_tx_age_blocks => Err(MasternodeError::Stale(
                format!("transaction {} mined {} blocks ago", hex::encode(txid), confirmations),
            )),
            _ => Ok(()),
        }
    }

    /// Creates or updates the lock of `tx` and returns its height.
    ///
    /// Every input needs the minimum confirmations; the height is derived from the
    /// youngest one.
    pub fn create_new_lock(&self, tx: &Transaction) -> MasternodeResult<u64> {
        let chain = &self.ctx.chain;
        let tip = chain
            .tip_height()
            .ok_or_else(|| MasternodeError::NotReady("no chain tip".to_string()))?;

        let mut youngest: Option<u64> = None;
        for input in &tx.inputs {
            let confirmations = chain
                .confirmations(&input.previous_output)
                .ok_or_else(|| MasternodeError::NotReady(format!("input {} not found", input.previous_output)))?;
            if confirmations < self.config().min_input_confirmations {
                return Err(MasternodeError::NotReady(format!(
                    "input {} too new ({} confirmations)",
                    input.previous_output, confirmations
                )));
            }
            youngest = Some(youngest.map_or(confirmations, |y| y.min(confirmations)));
        }
        let age = youngest.ok_or_else(|| MasternodeError::malformed("lock request without inputs", 0))?;
        let block_height = tip.saturating_sub(age) + self.config().lock_height_offset;

        let txid = tx.txid();
        let now = self.ctx.now();
        let mut state = self.state.write();
        match state.locks.get_mut(&txid) {
            Some(lock) => lock.block_height = Some(block_height),
            None => {
                state
                    .locks
                    .insert(txid, TransactionLock::new(txid, Some(block_height), now, self.config()));
            }
        }
        debug!("Lock for {} at height {}", hex::encode(txid), block_height);
        Ok(block_height)
    }

    /// Handles a lock request from a peer or a local wallet.
    pub fn process_lock_request(&self, tx: &Transaction) -> MasternodeResult<LockRequestOutcome> {
        let txid = tx.txid();
        {
            let state = self.state.read();
            if state.lock_requests.contains_key(&txid) || state.rejected.contains_key(&txid) {
                return Err(MasternodeError::Duplicate(format!("lock request {}", hex::encode(txid))));
            }
        }

        self.check_tx_age(&txid)?;
        self.is_ix_tx_valid(tx)?;
        let block_height = self.create_new_lock(tx)?;

        if self.ctx.actions.accept_to_mempool(tx) {
            let now = self.ctx.now();
            {
                let mut state = self.state.write();
                state.lock_requests.insert(txid, tx.clone());
                state.resolve_complete(&txid, self.required_votes(), now);
            }
            info!("Accepted lock request {} at height {}", hex::encode(txid), block_height);
            self.ctx.transport.relay(Inv::new(InvType::LockRequest, txid));

            if self.ctx.local.is_some() {
                if let Err(e) = self.cast_vote(&txid, block_height) {
                    debug!("No local vote for {}: {}", hex::encode(txid), e);
                }
            }
            return Ok(LockRequestOutcome::Accepted { block_height });
        }

        let now = self.ctx.now();
        let reprocess = {
            let mut state = self.state.write();
            state.rejected.insert(txid, tx.clone());
            state.claim_inputs(tx);
            let complete = state
                .locks
                .get(&txid)
                .map_or(false, |lock| lock.is_complete(self.required_votes()));
            if complete && !state.detect_conflict(tx, now) {
                state.lock_requests.insert(txid, tx.clone());
                true
            } else {
                false
            }
        };
        info!("Lock request {} refused by the mempool", hex::encode(txid));
        if reprocess {
            self.ctx.actions.reprocess_blocks(self.config().reprocess_depth);
        }
        Ok(LockRequestOutcome::Rejected)
    }

    /// Signs and relays this masternode's vote for `txid`.
    ///
    /// Returns `None` when the local masternode is ranked outside the committee.
    pub fn cast_vote(&self, txid: &Hash, block_height: u64) -> MasternodeResult<Option<ConsensusVote>> {
        let local = self
            .ctx
            .local
            .clone()
            .ok_or_else(|| MasternodeError::Logic("casting a lock vote without a local masternode".to_string()))?;
        let id = local.id();
        let rank = self
            .registry
            .rank_of(&id, block_height, self.config().min_protocol, true)
            .ok_or_else(|| MasternodeError::Logic(format!("{} is not ranked at height {}", id, block_height)))?;
        if !self.config().quorum.is_committee_rank(rank) {
            debug!("Not voting on {}, rank {}", hex::encode(txid), rank);
            return Ok(None);
        }

        let mut vote = ConsensusVote::new(id, *txid, block_height);
        vote.signature = self.ctx.signer.sign(&vote.signing_message(), &local.operator_key)?;
        let hash = vote.hash();
        let now = self.ctx.now();
        let reprocess = self.apply_vote(vote.clone(), now)?;

        self.ctx.transport.relay(Inv::new(InvType::LockVote, hash));
        if reprocess {
            self.ctx.actions.reprocess_blocks(self.config().reprocess_depth);
        }
        Ok(Some(vote))
    }

    /// Validates a consensus vote from the network, folds it into its lock and relays it.
    pub fn process_consensus_vote(&self, vote: &ConsensusVote) -> MasternodeResult<()> {
        let hash = vote.hash();
        if self.state.read().votes.contains_key(&hash) {
            return Err(MasternodeError::Duplicate(format!("lock vote {}", hex::encode(hash))));
        }
        self.check_tx_age(&vote.txid)?;

        let voter = self
            .registry
            .find(&vote.voter)
            .ok_or(MasternodeError::UnknownMasternode(vote.voter))?;
        let rank = self
            .registry
            .rank_of(&vote.voter, vote.block_height, self.config().min_protocol, true)
            .ok_or_else(|| MasternodeError::NotReady(format!("no rank for {} at height {}", vote.voter, vote.block_height)))?;
        if !self.config().quorum.is_committee_rank(rank) {
            return Err(MasternodeError::policy(
                format!("lock vote from {} ranked {}", vote.voter, rank),
                0,
            ));
        }

        if !self
            .ctx
            .signer
            .verify(&voter.identity.operator_public_key, &vote.signature, &vote.signing_message())
        {
            return Err(MasternodeError::InvalidSignature {
                what: format!("lock vote from {}", vote.voter),
                dos: 0,
                signer: Some(vote.voter),
            });
        }

        let now = self.ctx.now();
        let reprocess = self.apply_vote(vote.clone(), now)?;
        self.ctx.transport.relay(Inv::new(InvType::LockVote, hash));
        if reprocess {
            self.ctx.actions.reprocess_blocks(self.config().reprocess_depth);
        }
        Ok(())
    }

    /// Sends `peer` every stored vote that has not expired. Returns the number sent.
    pub fn handle_vote_list_request(&self, peer: &PeerId) -> usize {
        let now = self.ctx.now();
        let votes: Vec<ConsensusVote> = self
            .state
            .read()
            .votes
            .values()
            .filter(|vote| vote.expiration > now)
            .cloned()
            .collect();
        let count = votes.len();
        for vote in votes {
            self.ctx.transport.push_to(peer, GossipMessage::LockVote(vote));
        }
        debug!("Sent {} lock votes to peer {}", count, peer);
        count
    }

    /// Stores a verified vote. Returns whether blocks must be reprocessed.
    fn apply_vote(&self, mut vote: ConsensusVote, now: u64) -> MasternodeResult<bool> {
        let hash = vote.hash();
        let txid = vote.txid;
        let required = self.required_votes();
        let mut state = self.state.write();

        if state.votes.contains_key(&hash) {
            return Err(MasternodeError::Duplicate(format!("lock vote {}", hex::encode(hash))));
        }

        if !state.lock_requests.contains_key(&txid) && !state.rejected.contains_key(&txid) {
            let average = state.average_unknown_vote_deadline();
            if let Some(deadline) = state.unknown_votes.get(&vote.voter) {
                if *deadline > now && deadline.saturating_sub(average) > UNKNOWN_VOTE_WINDOW_SECONDS {
                    return Err(MasternodeError::policy(
                        format!("{} is spamming votes for unknown transactions", vote.voter),
                        0,
                    ));
                }
            }
            state.unknown_votes.insert(vote.voter, now + UNKNOWN_VOTE_WINDOW_SECONDS);
        }

        vote.expiration = now + self.config().expiration_seconds;
        state.votes.insert(hash, vote.clone());

        let lock = state
            .locks
            .entry(txid)
            .or_insert_with(|| TransactionLock::new(txid, None, now, &self.ctx.config.instant_lock));
        lock.add_vote(vote);
        let count = lock.count_signatures();
        if count == Some(required) {
            info!("Transaction lock {} is complete", hex::encode(txid));
        }
        Ok(state.resolve_complete(&txid, required, now))
    }

    /// Expires both locks when `tx` spends an input locked to another transaction.
    pub fn detect_conflict(&self, tx: &Transaction) -> bool {
        let now = self.ctx.now();
        self.state.write().detect_conflict(tx, now)
    }

    /// Removes expired locks with everything attached to them, and expired votes.
    pub fn check_and_remove(&self) -> usize {
        let now = self.ctx.now();
        let mut state = self.state.write();

        let expired: Vec<Hash> = state
            .locks
            .values()
            .filter(|lock| lock.expiration <= now)
            .map(|lock| lock.txid)
            .collect();
        for txid in &expired {
            if let Some(lock) = state.locks.remove(txid) {
                for vote in &lock.votes {
                    state.votes.remove(&vote.hash());
                }
            }
            state.lock_requests.remove(txid);
            state.rejected.remove(txid);
            debug!("Removed expired lock {}", hex::encode(txid));
        }

        let LockState {
            lock_requests,
            rejected,
            votes,
            locks,
            locked_inputs,
            unknown_votes,
        } = &mut *state;
        locked_inputs.retain(|_, txid| locks.contains_key(txid));
        lock_requests.retain(|txid, _| locks.contains_key(txid));
        rejected.retain(|txid, _| locks.contains_key(txid));
        votes.retain(|_, vote| vote.expiration > now);
        unknown_votes.retain(|_, deadline| *deadline > now);

        expired.len()
    }

    // ---------------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------------

    /// Whether an incomplete lock for `txid` has run past its timeout.
    pub fn is_lock_timed_out(&self, txid: &Hash) -> bool {
        let now = self.ctx.now();
        self.state
            .read()
            .locks
            .get(txid)
            .map_or(false, |lock| !lock.is_complete(self.required_votes()) && lock.is_timed_out(now))
    }

    /// Votes at the lock height; `None` for unknown transactions or an unset height.
    pub fn signature_count(&self, txid: &Hash) -> Option<usize> {
        self.state.read().locks.get(txid).and_then(|lock| lock.count_signatures())
    }

    pub fn lock_status(&self, txid: &Hash) -> Option<LockStatus> {
        let now = self.ctx.now();
        let state = self.state.read();
        let lock = state.locks.get(txid);
        if let Some(lock) = lock {
            if lock.expiration <= now {
                return Some(LockStatus::Expired);
            }
            if lock.is_complete(self.required_votes()) {
                return Some(LockStatus::Complete);
            }
        }
        if state.rejected.contains_key(txid) {
            return Some(LockStatus::Rejected);
        }
        match lock {
            Some(lock) if !lock.votes.is_empty() => Some(LockStatus::Voting),
            Some(_) => Some(LockStatus::Requested),
            None => None,
        }
    }

    pub fn tx_lock_requested(&self, txid: &Hash) -> bool {
        let state = self.state.read();
        state.lock_requests.contains_key(txid) || state.rejected.contains_key(txid)
    }

    /// Transaction an input is locked to. Inputs of expired or cancelled locks have no holder.
    pub fn locked_tx_for(&self, outpoint: &OutPoint) -> Option<Hash> {
        let now = self.ctx.now();
        let state = self.state.read();
        let txid = state.locked_inputs.get(outpoint)?;
        match state.locks.get(txid) {
            Some(lock) if lock.expiration <= now => None,
            _ => Some(*txid),
        }
    }

    pub fn already_have(&self, inv: &Inv) -> bool {
        let state = self.state.read();
        match inv.inv_type {
            InvType::LockRequest => state.lock_requests.contains_key(&inv.hash) || state.rejected.contains_key(&inv.hash),
            InvType::LockVote => state.votes.contains_key(&inv.hash),
            _ => false,
        }
    }

    pub fn complete_lock_count(&self) -> usize {
        let required = self.required_votes();
        self.state
            .read()
            .locks
            .values()
            .filter(|lock| lock.is_complete(required))
            .count()
    }

    pub fn lock_request(&self, txid: &Hash) -> Option<Transaction> {
        self.state.read().lock_requests.get(txid).cloned()
    }

    pub fn vote(&self, hash: &Hash) -> Option<ConsensusVote> {
        self.state.read().votes.get(hash).cloned()
    }

    pub fn clear(&self) {
        *self.state.write() = LockState::default();
    }

    pub fn stats(&self) -> InstantLockStats {
        let state = self.state.read();
        InstantLockStats {
            requests: state.lock_requests.len(),
            rejected: state.rejected.len(),
            votes: state.votes.len(),
            locks: state.locks.len(),
            locked_inputs: state.locked_inputs.len(),
            unknown_voters: state.unknown_votes.len(),
        }
    }
}
