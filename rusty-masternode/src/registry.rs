//! Masternode registry: identity records, announce and ping handling, score and rank.
//!
//! The registry exclusively owns the masternode records and the announce/ping dedup
//! caches. Chain lookups are always made before the registry lock is taken, and no
//! method holds the lock while calling into another component or the transport.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::{debug, info, warn};
use parking_lot::RwLock;
use primitive_types::U256;

use rusty_crypto::hash::payee_script;
use rusty_shared_types::{
    hash_serialized, GossipMessage, Hash, Inv, InvType, MasternodeAnnounce, MasternodeEntry,
    MasternodeID, MasternodePing, MasternodeState, OutPoint, PeerId, SyncItem,
};
use rusty_shared_types::masternode::PING_WITNESS_COUNT;

use crate::active_masternode::verify_stake_signover;
use crate::chain::NodeContext;
use crate::config::Network;
use crate::constants::*;
use crate::error::{MasternodeError, MasternodeResult};
use crate::quorum_formation::{calculate_score, rank_by_score, Committee, QuorumConfig, QuorumType, RankedMasternode};

/// Payment tallies as seen by the registry when choosing the next payee.
pub trait PaymentHistory: Send + Sync {
    /// Whether `payee` leads a tally between the tip and a few blocks ahead, ignoring `not_height`.
    fn is_scheduled(&self, payee: &[u8], not_height: u64) -> bool;

    /// Whether `payee` has at least `votes` votes in the tally of `height`.
    fn has_payee_with_votes(&self, height: u64, payee: &[u8], votes: u32) -> bool;
}

/// History with no tallies, for nodes that have not synced any payment votes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPaymentHistory;

impl PaymentHistory for NoPaymentHistory {
    fn is_scheduled(&self, _payee: &[u8], _not_height: u64) -> bool {
        false
    }

    fn has_payee_with_votes(&self, _height: u64, _payee: &[u8], _votes: u32) -> bool {
        false
    }
}

/// Masternode addresses must be routable IPv4; regtest also accepts private and loopback.
pub fn is_valid_net_address(addr: &SocketAddr, network: Network) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => network == Network::Regtest || is_routable_v4(&ip),
        IpAddr::V6(_) => false,
    }
}

fn is_routable_v4(ip: &Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.octets()[0] == 0)
}

pub fn is_rfc1918(addr: &SocketAddr) -> bool {
    matches!(addr.ip(), IpAddr::V4(ip) if ip.is_private())
}

/// Private or loopback address. Announces for these are not relayed.
pub fn address_is_local(addr: &SocketAddr) -> bool {
    is_rfc1918(addr) || addr.ip().is_loopback()
}

/// State a record should be in, given the time and whether its collateral is still unspent.
pub fn evaluate_state(entry: &MasternodeEntry, now: u64, collateral_unspent: bool, expiration: u64, removal: u64) -> MasternodeState {
    if entry.state == MasternodeState::VinSpent {
        return MasternodeState::VinSpent;
    }
    if !entry.is_pinged_within(removal, now) {
        return MasternodeState::Remove;
    }
    if !entry.is_pinged_within(expiration, now) {
        return MasternodeState::Expired;
    }
    if !collateral_unspent {
        return MasternodeState::VinSpent;
    }
    MasternodeState::Enabled
}

#[derive(Default)]
struct RegistryState {
    masternodes: HashMap<MasternodeID, MasternodeEntry>,
    /// Peer -> time it may ask for the full list again
    asked_us_for_list: HashMap<PeerId, u64>,
    /// Peer -> time we may ask it for the full list again
    we_asked_for_list: HashMap<PeerId, u64>,
    /// Masternode -> time we may ask for it again
    we_asked_for_entry: HashMap<MasternodeID, u64>,
    seen_announces: HashMap<Hash, MasternodeAnnounce>,
    seen_pings: HashMap<Hash, MasternodePing>,
}

/// Counters for logging and RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub enabled: usize,
    pub expired: usize,
    pub seen_announces: usize,
    pub seen_pings: usize,
}

/// Owns the set of known masternodes.
pub struct Registry {
    ctx: NodeContext,
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new(ctx: NodeContext) -> Self {
        Self {
            ctx,
            state: RwLock::new(RegistryState::default()),
        }
    }

    // ---------------------------------------------------------------------------------
    // Announces
    // ---------------------------------------------------------------------------------

    /// Adds a new masternode or updates a known one from a signed announce.
    ///
    /// Relays the announce when it changed local state.
    pub fn process_announce(&self, announce: &MasternodeAnnounce) -> MasternodeResult<()> {
        let hash = announce.hash();
        {
            let mut state = self.state.write();
            if state.seen_announces.contains_key(&hash) {
                return Err(MasternodeError::Duplicate(format!("announce {}", hex::encode(hash))));
            }
            state.seen_announces.insert(hash, announce.clone());
        }

        let now = self.ctx.now();
        if let Err(err) = self.validate_announce(announce, now) {
            if matches!(err, MasternodeError::InvalidSignature { .. }) {
                // A forged copy must not shadow the genuine announce with the same hash.
                self.state.write().seen_announces.remove(&hash);
            }
            return Err(err);
        }

        match self.find(&announce.id()) {
            Some(existing) => self.update_from_announce(&existing, announce, hash, now),
            None => self.check_inputs_and_add(announce, hash, now),
        }
    }

    fn validate_announce(&self, announce: &MasternodeAnnounce, now: u64) -> MasternodeResult<()> {
        let identity = &announce.identity;

        if announce.sig_time > now + MAX_CLOCK_DRIFT_SECONDS {
            return Err(MasternodeError::malformed(
                format!("announce for {} signed too far in the future", announce.id()),
                DOS_FUTURE_TIMESTAMP,
            ));
        }

        if identity.protocol_version < self.ctx.config.min_payment_protocol() {
            return Err(MasternodeError::policy(
                format!("outdated protocol {} for {}", identity.protocol_version, announce.id()),
                0,
            ));
        }

        let key_len = self.ctx.signer.public_key_len();
        if identity.collateral_public_key.len() != key_len || identity.operator_public_key.len() != key_len {
            return Err(MasternodeError::malformed("announce key size", DOS_BAD_KEY_SIZE));
        }

        if !announce.last_ping.is_empty() {
            if announce.last_ping.masternode_id != announce.id() {
                return Err(MasternodeError::malformed("embedded ping belongs to another masternode", 0));
            }
            check_ping_time(&announce.last_ping, now)?;
        }

        if !self.ctx.signer.verify(&identity.collateral_public_key, &announce.signature, &announce.signing_message()) {
            return Err(MasternodeError::InvalidSignature {
                what: format!("announce for {}", announce.id()),
                dos: 0,
                signer: None,
            });
        }

        if let Some(signover) = &announce.stake_signover {
            if !verify_stake_signover(self.ctx.signer.as_ref(), identity, signover) {
                return Err(MasternodeError::InvalidSignature {
                    what: format!("stake signover of {}", announce.id()),
                    dos: 0,
                    signer: None,
                });
            }
        }

        self.check_address(&identity.network_address)
    }

    fn check_address(&self, addr: &SocketAddr) -> MasternodeResult<()> {
        let network = self.ctx.config.network;
        if !is_valid_net_address(addr, network) {
            return Err(MasternodeError::malformed(format!("unroutable address {}", addr), 0));
        }
        let default_port = self.ctx.config.registry.default_port;
        if network == Network::Main && addr.port() != default_port {
            return Err(MasternodeError::malformed(
                format!("invalid port {}, only {} is supported on the main network", addr.port(), default_port),
                0,
            ));
        }
        if network != Network::Main && addr.port() == default_port {
            return Err(MasternodeError::malformed(
                format!("port {} is reserved for the main network", default_port),
                0,
            ));
        }
        Ok(())
    }

    fn update_from_announce(
        &self,
        existing: &MasternodeEntry,
        announce: &MasternodeAnnounce,
        hash: Hash,
        now: u64,
    ) -> MasternodeResult<()> {
        if existing.sig_time >= announce.sig_time {
            return Err(MasternodeError::Stale(format!(
                "announce for {} older than the known one",
                announce.id()
            )));
        }
        if !existing.is_enabled() {
            self.forget(&announce.id(), hash);
            info!("Replacing {} masternode {} from a newer announce", existing.state.as_str(), announce.id());
            return self.check_inputs_and_add(announce, hash, now);
        }
        if existing.identity.collateral_public_key != announce.identity.collateral_public_key {
            return Err(MasternodeError::policy(
                format!("announce for {} signed by a different collateral key", announce.id()),
                0,
            ));
        }
        let min_broadcast = self.ctx.config.registry.min_broadcast_seconds;
        if existing.is_announced_within(min_broadcast, now) {
            return Err(MasternodeError::TooEarly(format!("{} announced within {}s", announce.id(), min_broadcast)));
        }

        let collateral_unspent = self.collateral_unspent(&announce.identity.collateral_outpoint);
        let enabled = {
            let mut state = self.state.write();
            let entry = state
                .masternodes
                .get_mut(&announce.id())
                .ok_or(MasternodeError::UnknownMasternode(announce.id()))?;
            if !entry.update_from_announce(announce, now) {
                return Err(MasternodeError::Stale(format!("announce for {} raced a newer one", announce.id())));
            }
            self.apply_check(entry, now, collateral_unspent);
            let enabled = entry.is_enabled();
            if !announce.last_ping.is_empty() {
                state.seen_pings.insert(announce.last_ping.hash(), announce.last_ping.clone());
            }
            enabled
        };

        debug!("Updated masternode {} from announce", announce.id());
        if enabled {
            self.ctx.transport.relay(Inv::new(InvType::MasternodeAnnounce, hash));
        }
        Ok(())
    }

    /// Drops a record with its cached announces and pending asks, keeping the announce `keep`.
    fn forget(&self, id: &MasternodeID, keep: Hash) {
        let mut state = self.state.write();
        state.masternodes.remove(id);
        state
            .seen_announces
            .retain(|seen, announce| *seen == keep || announce.id() != *id);
        state.seen_pings.retain(|_, ping| ping.masternode_id != *id);
        state.we_asked_for_entry.remove(id);
    }

    fn check_inputs_and_add(&self, announce: &MasternodeAnnounce, hash: Hash, now: u64) -> MasternodeResult<()> {
        if announce.last_ping.is_empty() {
            return Err(MasternodeError::malformed(
                format!("announce for {} carries no ping", announce.id()),
                0,
            ));
        }
        let config = &self.ctx.config;
        let identity = &announce.identity;
        let outpoint = identity.collateral_outpoint;
        let min_conf = config.registry.min_confirmations;

        let confirmations = self.ctx.chain.confirmations(&outpoint).ok_or_else(|| {
            MasternodeError::policy(format!("collateral {} not found unspent", outpoint), 0)
        })?;
        if confirmations < min_conf {
            // Forget it so the same announce is processed again once the collateral matures.
            self.state.write().seen_announces.remove(&hash);
            return Err(MasternodeError::NotReady(format!(
                "collateral {} has {} of {} confirmations",
                outpoint, confirmations, min_conf
            )));
        }

        let amount = self.ctx.chain.amount_of(&outpoint);
        let script = self.ctx.chain.script_of(&outpoint);
        if amount != Some(config.collateral_amount) || script.as_deref() != Some(payee_script(&identity.collateral_public_key).as_slice()) {
            return Err(MasternodeError::policy(
                format!("collateral {} is not associated with the announced key", outpoint),
                DOS_COLLATERAL_MISMATCH,
            ));
        }

        // The announce must not predate the block where the collateral became eligible.
        let matured_time = self
            .ctx
            .chain
            .coin_height(&outpoint)
            .and_then(|height| self.ctx.chain.block_time_at(height + min_conf - 1));
        match matured_time {
            Some(time) if announce.sig_time < time => {
                return Err(MasternodeError::Stale(format!(
                    "announce for {} signed before its collateral matured",
                    announce.id()
                )));
            }
            Some(_) => {}
            None => {
                return Err(MasternodeError::NotReady(format!("no maturity block for {}", outpoint)));
            }
        }

        let mut entry = MasternodeEntry::from_announce(announce, now);
        entry.last_checked = now;
        {
            let mut state = self.state.write();
            if state.masternodes.contains_key(&entry.id()) {
                return Err(MasternodeError::Duplicate(format!("masternode {}", entry.id())));
            }
            if !announce.last_ping.is_empty() {
                state.seen_pings.insert(announce.last_ping.hash(), announce.last_ping.clone());
            }
            state.masternodes.insert(entry.id(), entry);
        }

        info!("Added masternode {} at {}", announce.id(), identity.network_address);
        if !address_is_local(&identity.network_address) || config.network == Network::Regtest {
            self.ctx.transport.relay(Inv::new(InvType::MasternodeAnnounce, hash));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------
    // Pings
    // ---------------------------------------------------------------------------------

    /// Records a liveness ping and relays it if the masternode is enabled.
    pub fn process_ping(&self, ping: &MasternodePing) -> MasternodeResult<()> {
        let hash = ping.hash();
        {
            let mut state = self.state.write();
            if state.seen_pings.contains_key(&hash) {
                return Err(MasternodeError::Duplicate(format!("ping {}", hex::encode(hash))));
            }
            state.seen_pings.insert(hash, ping.clone());
        }

        let now = self.ctx.now();
        check_ping_time(ping, now)?;

        let id = ping.masternode_id;
        let entry = self.find(&id).ok_or(MasternodeError::UnknownMasternode(id))?;
        if entry.identity.protocol_version < self.ctx.config.min_payment_protocol() {
            return Err(MasternodeError::policy(format!("outdated protocol for {}", id), 0));
        }

        let min_spacing = self.ctx.config.registry.min_ping_seconds.saturating_sub(60);
        if last_ping_within(&entry, min_spacing, ping.sig_time) {
            return Err(MasternodeError::TooEarly(format!("{} pinged within {}s", id, min_spacing)));
        }

        if !self.ctx.signer.verify(&entry.identity.operator_public_key, &ping.signature, &ping.signing_message()) {
            self.state.write().seen_pings.remove(&hash);
            return Err(MasternodeError::InvalidSignature {
                what: format!("ping from {}", id),
                dos: DOS_BAD_PING_SIGNATURE,
                signer: None,
            });
        }

        self.check_ping_anchor(ping)?;
        let collateral_unspent = self.collateral_unspent(&id.0);

        let enabled = {
            let mut state = self.state.write();
            let entry = state
                .masternodes
                .get_mut(&id)
                .ok_or(MasternodeError::UnknownMasternode(id))?;
            if last_ping_within(entry, min_spacing, ping.sig_time) {
                return Err(MasternodeError::TooEarly(format!("{} pinged within {}s", id, min_spacing)));
            }
            entry.last_ping = Some(ping.clone());
            self.apply_check(entry, now, collateral_unspent);
            let enabled = entry.is_enabled();
            let announce_hash = entry.to_announce().hash();
            if let Some(seen) = state.seen_announces.get_mut(&announce_hash) {
                seen.last_ping = ping.clone();
            }
            enabled
        };

        if enabled {
            debug!("Accepted ping from {}", id);
            self.ctx.transport.relay(Inv::new(InvType::MasternodePing, hash));
        } else {
            debug!("Ping from {} accepted but masternode is not enabled", id);
        }
        Ok(())
    }

    /// Stores a ping signed by this node and relays it. Skips the peer-facing spacing rule.
    pub fn record_local_ping(&self, ping: &MasternodePing) -> MasternodeResult<()> {
        let id = ping.masternode_id;
        let hash = ping.hash();
        {
            let mut state = self.state.write();
            let entry = state
                .masternodes
                .get_mut(&id)
                .ok_or(MasternodeError::UnknownMasternode(id))?;
            entry.last_ping = Some(ping.clone());
            let announce_hash = entry.to_announce().hash();
            if let Some(seen) = state.seen_announces.get_mut(&announce_hash) {
                seen.last_ping = ping.clone();
            }
            state.seen_pings.insert(hash, ping.clone());
        }
        debug!("Relaying local ping for {}", id);
        self.ctx.transport.relay(Inv::new(InvType::MasternodePing, hash));
        Ok(())
    }

    fn check_ping_anchor(&self, ping: &MasternodePing) -> MasternodeResult<()> {
        let chain = &self.ctx.chain;
        let anchor_height = chain
            .block_height_of(&ping.block_hash)
            .ok_or_else(|| MasternodeError::NotReady(format!("unknown anchor block for ping from {}", ping.masternode_id)))?;
        let tip = chain
            .tip_height()
            .ok_or_else(|| MasternodeError::NotReady("no chain tip".to_string()))?;
        if tip.saturating_sub(anchor_height) > PING_MAX_ANCHOR_AGE_BLOCKS {
            return Err(MasternodeError::Stale(format!(
                "ping from {} anchored {} blocks behind the tip",
                ping.masternode_id,
                tip - anchor_height
            )));
        }

        if ping.witness_hashes.len() > PING_WITNESS_COUNT {
            return Err(MasternodeError::malformed("too many ping witnesses", DOS_FUTURE_TIMESTAMP));
        }
        for (depth, witness) in ping.witness_hashes.iter().enumerate() {
            let expected = anchor_height
                .checked_sub(depth as u64 + 1)
                .and_then(|height| chain.block_hash_at(height));
            if expected.as_ref() != Some(witness) {
                return Err(MasternodeError::Stale(format!(
                    "ping from {} witnesses a different chain",
                    ping.masternode_id
                )));
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------
    // State checks and sweeping
    // ---------------------------------------------------------------------------------

    fn collateral_unspent(&self, outpoint: &OutPoint) -> bool {
        self.ctx.chain.confirmations(outpoint).is_some()
    }

    fn apply_check(&self, entry: &mut MasternodeEntry, now: u64, collateral_unspent: bool) {
        let registry = &self.ctx.config.registry;
        entry.last_checked = now;
        let state = evaluate_state(entry, now, collateral_unspent, registry.expiration_seconds, registry.removal_seconds);
        if state != entry.state {
            debug!("Masternode {} {} -> {}", entry.id(), entry.state.as_str(), state.as_str());
            entry.state = state;
        }
    }

    /// Re-evaluates the state of every record, at most once per check interval unless forced.
    pub fn check_all(&self, force: bool) {
        let now = self.ctx.now();
        let check_seconds = self.ctx.config.registry.check_seconds;
        let due: Vec<MasternodeID> = self
            .state
            .read()
            .masternodes
            .values()
            .filter(|entry| force || now.saturating_sub(entry.last_checked) >= check_seconds)
            .map(|entry| entry.id())
            .collect();
        if due.is_empty() {
            return;
        }

        let collateral: Vec<(MasternodeID, bool)> = due
            .into_iter()
            .map(|id| (id, self.collateral_unspent(&id.0)))
            .collect();

        let mut state = self.state.write();
        for (id, unspent) in collateral {
            if let Some(entry) = state.masternodes.get_mut(&id) {
                self.apply_check(entry, now, unspent);
            }
        }
    }

    /// Removes terminal and outdated records and expires every timer and cache entry.
    ///
    /// Returns the number of records removed.
    pub fn check_and_remove(&self, force_expired_removal: bool) -> usize {
        self.check_all(false);

        let now = self.ctx.now();
        let min_protocol = self.ctx.config.min_payment_protocol();
        let cache_horizon = now.saturating_sub(self.ctx.config.registry.removal_seconds * 2);

        let mut state = self.state.write();
        let doomed: Vec<MasternodeID> = state
            .masternodes
            .values()
            .filter(|entry| {
                entry.state.is_terminal()
                    || (force_expired_removal && entry.state == MasternodeState::Expired)
                    || entry.identity.protocol_version < min_protocol
            })
            .map(|entry| entry.id())
            .collect();

        for id in &doomed {
            if let Some(entry) = state.masternodes.remove(id) {
                info!("Removing masternode {} ({})", id, entry.state.as_str());
            }
            state.seen_announces.retain(|_, announce| announce.id() != *id);
            state.we_asked_for_entry.remove(id);
        }

        state.asked_us_for_list.retain(|_, until| *until >= now);
        state.we_asked_for_list.retain(|_, until| *until >= now);
        state.we_asked_for_entry.retain(|_, until| *until >= now);
        state
            .seen_announces
            .retain(|_, announce| announce.last_ping.sig_time.max(announce.sig_time) >= cache_horizon);
        state.seen_pings.retain(|_, ping| ping.sig_time >= cache_horizon);

        doomed.len()
    }

    pub fn clear(&self) {
        *self.state.write() = RegistryState::default();
    }

    // ---------------------------------------------------------------------------------
    // List requests
    // ---------------------------------------------------------------------------------

    /// Answers a list request with the announces of enabled, publicly reachable masternodes.
    ///
    /// Returns the number of announces sent.
    pub fn handle_list_request(&self, peer: &PeerId, filter: Option<OutPoint>) -> MasternodeResult<usize> {
        let now = self.ctx.now();
        if filter.is_none()
            && self.ctx.config.network == Network::Main
            && !self.ctx.transport.peer_is_local(peer)
        {
            let mut state = self.state.write();
            if let Some(until) = state.asked_us_for_list.get(peer) {
                if now < *until {
                    return Err(MasternodeError::policy(
                        format!("peer {} asked for the masternode list again", peer),
                        DOS_LIST_REQUEST_SPAM,
                    ));
                }
            }
            state
                .asked_us_for_list
                .insert(peer.clone(), now + self.ctx.config.registry.list_request_interval_secs);
        }

        let announces: Vec<MasternodeAnnounce> = {
            let mut state = self.state.write();
            let announces: Vec<MasternodeAnnounce> = state
                .masternodes
                .values()
                .filter(|entry| entry.is_enabled() && !is_rfc1918(&entry.identity.network_address))
                .filter(|entry| filter.map_or(true, |wanted| entry.identity.collateral_outpoint == wanted))
                .map(|entry| entry.to_announce())
                .collect();
            for announce in &announces {
                state.seen_announces.entry(announce.hash()).or_insert_with(|| announce.clone());
            }
            announces
        };

        let count = announces.len();
        for announce in announces {
            self.ctx.transport.push_to(peer, GossipMessage::Announce(announce));
        }
        if filter.is_none() {
            self.ctx
                .transport
                .push_to(peer, GossipMessage::SyncStatusCount(SyncItem::List, count as u32));
            debug!("Sent {} masternode announces to peer {}", count, peer);
        }
        Ok(count)
    }

    /// Asks `peer` for a single masternode we know nothing about. Rate limited per masternode.
    pub fn ask_for_masternode(&self, peer: &PeerId, id: &MasternodeID) -> bool {
        let now = self.ctx.now();
        {
            let mut state = self.state.write();
            if let Some(until) = state.we_asked_for_entry.get(id) {
                if now < *until {
                    return false;
                }
            }
            state
                .we_asked_for_entry
                .insert(*id, now + self.ctx.config.registry.min_ping_seconds);
        }
        debug!("Asking peer {} for masternode {}", peer, id);
        self.ctx.transport.push_to(peer, GossipMessage::RequestList(Some(id.0)));
        true
    }

    /// Asks `peer` for the full list. Rate limited per peer on the main network.
    pub fn request_full_list(&self, peer: &PeerId) -> bool {
        let now = self.ctx.now();
        if self.ctx.config.network == Network::Main && !self.ctx.transport.peer_is_local(peer) {
            let mut state = self.state.write();
            if let Some(until) = state.we_asked_for_list.get(peer) {
                if now < *until {
                    debug!("Already asked peer {} for the masternode list", peer);
                    return false;
                }
            }
            state
                .we_asked_for_list
                .insert(peer.clone(), now + self.ctx.config.registry.list_request_interval_secs);
        }
        self.ctx.transport.push_to(peer, GossipMessage::RequestList(None));
        true
    }

    // ---------------------------------------------------------------------------------
    // Score and rank
    // ---------------------------------------------------------------------------------

    fn score_for_block(&self, outpoint: &OutPoint, block_hash: &Hash) -> Option<U256> {
        let chain = &self.ctx.chain;
        let matured_height = chain.coin_height(outpoint)? + self.ctx.config.registry.min_confirmations - 1;
        let anchor = chain.block_hash_at(matured_height)?;
        Some(calculate_score(outpoint, &anchor, block_hash))
    }

    /// Deterministic score of a masternode at `block_height`; `None` without chain data.
    pub fn compute_score(&self, id: &MasternodeID, block_height: u64) -> Option<U256> {
        let block_hash = self.ctx.chain.block_hash_at(block_height)?;
        self.score_for_block(&id.0, &block_hash)
    }

    /// Ranks eligible masternodes at `block_height`, best first.
    ///
    /// The eligible set is snapshotted under the lock before any scoring happens.
    pub fn ranks(&self, block_height: u64, min_protocol: u32, active_only: bool) -> Vec<RankedMasternode> {
        let block_hash = match self.ctx.chain.block_hash_at(block_height) {
            Some(hash) => hash,
            None => return Vec::new(),
        };

        let eligible: Vec<MasternodeID> = self
            .state
            .read()
            .masternodes
            .values()
            .filter(|entry| entry.identity.protocol_version >= min_protocol)
            .filter(|entry| !active_only || entry.is_enabled())
            .map(|entry| entry.id())
            .collect();

        let scored = eligible
            .into_iter()
            .filter_map(|id| self.score_for_block(&id.0, &block_hash).map(|score| (id, score)))
            .collect();
        rank_by_score(scored)
    }

    /// 1-based rank of `id` at `block_height`, `None` when unranked or the block is unknown.
    pub fn rank_of(&self, id: &MasternodeID, block_height: u64, min_protocol: u32, active_only: bool) -> Option<usize> {
        self.ranks(block_height, min_protocol, active_only)
            .into_iter()
            .find(|ranked| ranked.id == *id)
            .map(|ranked| ranked.rank)
    }

    pub fn by_rank(&self, rank: usize, block_height: u64, min_protocol: u32, active_only: bool) -> Option<MasternodeEntry> {
        let id = self
            .ranks(block_height, min_protocol, active_only)
            .into_iter()
            .find(|ranked| ranked.rank == rank)?
            .id;
        self.find(&id)
    }

    /// Voting committee of one protocol at `block_height`.
    pub fn committee(&self, quorum_type: QuorumType, block_height: u64, min_protocol: u32, quorum: &QuorumConfig) -> Committee {
        let ranking = self.ranks(block_height, min_protocol, true);
        Committee::form(quorum_type, block_height, &ranking, quorum)
    }

    /// Highest-scored enabled masternode at `block_height`.
    pub fn current_masternode(&self, block_height: u64, min_protocol: u32) -> Option<MasternodeEntry> {
        let best = self.ranks(block_height, min_protocol, true).into_iter().next()?;
        self.find(&best.id)
    }

    // ---------------------------------------------------------------------------------
    // Payment queue
    // ---------------------------------------------------------------------------------

    fn payment_offset(entry: &MasternodeEntry) -> u64 {
        let hash = hash_serialized(&(entry.id(), entry.sig_time));
        u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) as u64
    }

    /// Time of the last block within the lookback window that paid this masternode.
    pub fn last_paid(&self, entry: &MasternodeEntry, history: &dyn PaymentHistory, lookback: u64) -> u64 {
        let chain = &self.ctx.chain;
        let tip = match chain.tip_height() {
            Some(tip) => tip,
            None => return 0,
        };
        let payee = payee_script(&entry.identity.collateral_public_key);
        let offset = Self::payment_offset(entry) % LAST_PAID_OFFSET_MODULUS;
        for height in (0..=tip).rev().take(lookback as usize) {
            if history.has_payee_with_votes(height, &payee, PAYMENT_PAID_VOTES) {
                return chain.block_time_at(height).unwrap_or(0) + offset;
            }
        }
        0
    }

    /// Seconds since the last payment; unpaid masternodes get a month plus a fixed per-record offset.
    pub fn seconds_since_payment(entry: &MasternodeEntry, now: u64) -> u64 {
        let since = now.saturating_sub(entry.last_paid);
        if entry.last_paid > 0 && since < SECONDS_PER_MONTH {
            return since;
        }
        SECONDS_PER_MONTH + Self::payment_offset(entry)
    }

    /// Refreshes the cached last-paid time of every record from the payment tallies.
    pub fn update_last_paid(&self, history: &dyn PaymentHistory) {
        let lookback = self
            .ctx
            .config
            .lookback_blocks(self.count_enabled(Some(self.ctx.config.min_payment_protocol())));
        let snapshot = self.full_list();
        let paid: Vec<(MasternodeID, u64)> = snapshot
            .iter()
            .map(|entry| (entry.id(), self.last_paid(entry, history, lookback)))
            .collect();
        let mut state = self.state.write();
        for (id, last_paid) in paid {
            if let Some(entry) = state.masternodes.get_mut(&id) {
                entry.last_paid = last_paid;
            }
        }
    }

    /// Picks the masternode that should be paid at `block_height`.
    ///
    /// Returns the chosen record and the number of eligible candidates.
    pub fn next_due_for_payment(
        &self,
        block_height: u64,
        filter_sig_time: bool,
        history: &dyn PaymentHistory,
    ) -> (Option<MasternodeEntry>, usize) {
        let now = self.ctx.now();
        let min_protocol = self.ctx.config.min_payment_protocol();
        let enabled = self.count_enabled(Some(min_protocol));

        let snapshot: Vec<MasternodeEntry> = self
            .state
            .read()
            .masternodes
            .values()
            .filter(|entry| entry.is_enabled() && entry.identity.protocol_version >= min_protocol)
            .cloned()
            .collect();

        let mut candidates: Vec<(u64, MasternodeEntry)> = snapshot
            .into_iter()
            .filter(|entry| !history.is_scheduled(&payee_script(&entry.identity.collateral_public_key), block_height))
            .filter(|entry| !filter_sig_time || entry.sig_time + enabled as u64 * 60 <= now)
            .filter(|entry| {
                self.ctx
                    .chain
                    .confirmations(&entry.identity.collateral_outpoint)
                    .unwrap_or(0)
                    >= enabled as u64
            })
            .map(|entry| (Self::seconds_since_payment(&entry, now), entry))
            .collect();

        if filter_sig_time && candidates.len() < enabled / 3 {
            return self.next_due_for_payment(block_height, false, history);
        }

        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id().cmp(&b.1.id())));

        let count = candidates.len();
        let tenth = (enabled / 10).max(1);
        let score_height = block_height.saturating_sub(self.ctx.config.payments.rank_offset);
        let best = candidates
            .into_iter()
            .take(tenth)
            .filter_map(|(_, entry)| self.compute_score(&entry.id(), score_height).map(|score| (score, entry)))
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.id().cmp(&a.1.id())))
            .map(|(_, entry)| entry);
        (best, count)
    }

    // ---------------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------------

    pub fn find(&self, id: &MasternodeID) -> Option<MasternodeEntry> {
        self.state.read().masternodes.get(id).cloned()
    }

    pub fn find_by_operator_key(&self, operator_public_key: &[u8]) -> Option<MasternodeEntry> {
        self.state
            .read()
            .masternodes
            .values()
            .find(|entry| entry.identity.operator_public_key == operator_public_key)
            .cloned()
    }

    pub fn full_list(&self) -> Vec<MasternodeEntry> {
        let mut list: Vec<MasternodeEntry> = self.state.read().masternodes.values().cloned().collect();
        list.sort_by_key(|entry| entry.id());
        list
    }

    pub fn count(&self) -> usize {
        self.state.read().masternodes.len()
    }

    pub fn count_enabled(&self, min_protocol: Option<u32>) -> usize {
        let min_protocol = min_protocol.unwrap_or(0);
        self.state
            .read()
            .masternodes
            .values()
            .filter(|entry| entry.is_enabled() && entry.identity.protocol_version >= min_protocol)
            .count()
    }

    pub fn seen_announce(&self, hash: &Hash) -> Option<MasternodeAnnounce> {
        self.state.read().seen_announces.get(hash).cloned()
    }

    pub fn seen_ping(&self, hash: &Hash) -> Option<MasternodePing> {
        self.state.read().seen_pings.get(hash).cloned()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            total: state.masternodes.len(),
            enabled: state.masternodes.values().filter(|e| e.is_enabled()).count(),
            expired: state
                .masternodes
                .values()
                .filter(|e| e.state == MasternodeState::Expired)
                .count(),
            seen_announces: state.seen_announces.len(),
            seen_pings: state.seen_pings.len(),
        }
    }
}

/// Only an actual ping counts here, unlike the state check which falls back to the announce time.
fn last_ping_within(entry: &MasternodeEntry, seconds: u64, at: u64) -> bool {
    entry
        .last_ping
        .as_ref()
        .map_or(false, |last| at.saturating_sub(last.sig_time) < seconds)
}

fn check_ping_time(ping: &MasternodePing, now: u64) -> MasternodeResult<()> {
    if ping.sig_time > now + MAX_CLOCK_DRIFT_SECONDS {
        warn!("Ping from {} signed too far in the future", ping.masternode_id);
        return Err(MasternodeError::malformed("ping signed in the future", DOS_FUTURE_TIMESTAMP));
    }
    if ping.sig_time <= now.saturating_sub(MAX_CLOCK_DRIFT_SECONDS) {
        return Err(MasternodeError::malformed("ping signed too long ago", DOS_FUTURE_TIMESTAMP));
    }
    Ok(())
}
