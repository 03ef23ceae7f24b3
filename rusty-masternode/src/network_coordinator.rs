//! Network coordinator for masternode operations
//!
//! Owns the registry, payment voting and instant lock components, routes gossip
//! messages to them and drives their periodic maintenance. This is the only place where
//! handler errors turn into misbehavior reports, identity requests and log lines.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use rusty_shared_types::{GossipMessage, Inv, InvType, PeerId, SyncItem};

use crate::active_masternode::{ActiveMasternode, ActiveMasternodeStatus};
use crate::chain::NodeContext;
use crate::constants::PAYMENT_VOTE_LOOKAHEAD;
use crate::error::{MasternodeError, MasternodeResult};
use crate::instant_lock::InstantLock;
use crate::payments::PaymentVoting;
use crate::registry::Registry;
use crate::sync::SyncTracker;

/// Intervals of the periodic maintenance tasks
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Tick of the maintenance loop (in seconds)
    pub tick_secs: u64,
    /// How often the cache sweeps run (in seconds)
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            tick_secs: 1,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Default)]
struct MaintenanceState {
    last_status_check: u64,
    last_sweep: u64,
}

/// Result of one maintenance tick, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub status: Option<ActiveMasternodeStatus>,
    pub swept: bool,
    pub removed_masternodes: usize,
    pub removed_payment_votes: usize,
    pub removed_locks: usize,
}

/// The masternode layer of a node, assembled from its collaborators.
pub struct MasternodeServices {
    ctx: NodeContext,
    pub registry: Arc<Registry>,
    pub payments: Arc<PaymentVoting>,
    pub instant_lock: Arc<InstantLock>,
    pub sync: Arc<SyncTracker>,
    pub active: Arc<ActiveMasternode>,
    maintenance_config: MaintenanceConfig,
    maintenance: Mutex<MaintenanceState>,
}

impl MasternodeServices {
    pub fn new(ctx: NodeContext) -> Self {
        Self::with_maintenance(ctx, MaintenanceConfig::default())
    }

    pub fn with_maintenance(ctx: NodeContext, maintenance_config: MaintenanceConfig) -> Self {
        let sync = Arc::new(SyncTracker::new());
        let registry = Arc::new(Registry::new(ctx.clone()));
        let payments = Arc::new(PaymentVoting::new(ctx.clone(), registry.clone(), sync.clone()));
        let instant_lock = Arc::new(InstantLock::new(ctx.clone(), registry.clone()));
        let active = Arc::new(ActiveMasternode::new(ctx.clone(), registry.clone(), sync.clone()));
        Self {
            ctx,
            registry,
            payments,
            instant_lock,
            sync,
            active,
            maintenance_config,
            maintenance: Mutex::new(MaintenanceState::default()),
        }
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    /// Handles one decoded gossip message. Returns whether it was accepted.
    pub fn handle_message(&self, peer: &PeerId, message: GossipMessage) -> bool {
        let command = message.command();
        let result: MasternodeResult<()> = match message {
            GossipMessage::Announce(announce) => self.registry.process_announce(&announce),
            GossipMessage::Ping(ping) => self.registry.process_ping(&ping),
            GossipMessage::RequestList(filter) => self.registry.handle_list_request(peer, filter).map(|_| ()),
            GossipMessage::PaymentWinner(vote) => {
                if self.sync.is_blockchain_synced() {
                    self.payments.process_winner_vote(&vote)
                } else {
                    Err(MasternodeError::NotReady("blockchain not synced".to_string()))
                }
            }
            GossipMessage::RequestPaymentSync(count) => self.payments.handle_sync_request(peer, count).map(|_| ()),
            GossipMessage::LockRequest(tx) => self.instant_lock.process_lock_request(&tx).map(|_| ()),
            GossipMessage::LockVote(vote) => self.instant_lock.process_consensus_vote(&vote),
            GossipMessage::RequestLockVotes => {
                self.instant_lock.handle_vote_list_request(peer);
                Ok(())
            }
            GossipMessage::SyncStatusCount(item, count) => {
                debug!("Peer {} reported {} {:?} items", peer, count, item);
                self.sync.record_count(item, count, self.ctx.now());
                Ok(())
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.report(peer, command, &e);
                false
            }
        }
    }

    fn report(&self, peer: &PeerId, command: &str, error: &MasternodeError) {
        let dos = error.dos_score();
        if dos > 0 {
            self.ctx.transport.misbehaving(peer, dos);
        }
        if let Some(id) = error.asks_for() {
            self.registry.ask_for_masternode(peer, &id);
        }
        if error.is_benign() {
            debug!("{} from peer {} ignored: {}", command, peer, error);
        } else {
            warn!("{} from peer {} rejected: {}", command, peer, error);
        }
    }

    /// Whether an announced inventory item is already known locally.
    pub fn already_have(&self, inv: &Inv) -> bool {
        match inv.inv_type {
            InvType::MasternodeAnnounce => self.registry.seen_announce(&inv.hash).is_some(),
            InvType::MasternodePing => self.registry.seen_ping(&inv.hash).is_some(),
            InvType::PaymentWinner => self.payments.has_vote(&inv.hash),
            InvType::LockRequest | InvType::LockVote => self.instant_lock.already_have(inv),
        }
    }

    /// Sends a peer the item behind an inventory announcement. Returns whether it was found.
    pub fn get_data(&self, peer: &PeerId, inv: &Inv) -> bool {
        let message = match inv.inv_type {
            InvType::MasternodeAnnounce => self.registry.seen_announce(&inv.hash).map(GossipMessage::Announce),
            InvType::MasternodePing => self.registry.seen_ping(&inv.hash).map(GossipMessage::Ping),
            InvType::PaymentWinner => self.payments.vote(&inv.hash).map(GossipMessage::PaymentWinner),
            InvType::LockRequest => self.instant_lock.lock_request(&inv.hash).map(GossipMessage::LockRequest),
            InvType::LockVote => self.instant_lock.vote(&inv.hash).map(GossipMessage::LockVote),
        };
        match message {
            Some(message) => {
                self.ctx.transport.push_to(peer, message);
                true
            }
            None => false,
        }
    }

    /// Starts list and payment sync against a newly connected peer.
    pub fn handle_peer_connected(&self, peer: &PeerId) {
        if !self.sync.is_synced(SyncItem::List) {
            self.registry.request_full_list(peer);
        } else if !self.sync.is_synced(SyncItem::Winners) {
            self.payments.request_sync(peer);
        }
    }

    /// Reacts to a new best block: votes on a future payee and refreshes payment times.
    pub fn on_new_tip(&self, height: u64) {
        if !self.sync.is_synced(SyncItem::List) {
            debug!("Masternode list not synced, skipping block {}", height);
            return;
        }
        match self.payments.process_block(height + PAYMENT_VOTE_LOOKAHEAD) {
            Ok(true) => debug!("Payment vote cast for height {}", height + PAYMENT_VOTE_LOOKAHEAD),
            Ok(false) => {}
            Err(e) => debug!("No payment vote for height {}: {}", height + PAYMENT_VOTE_LOOKAHEAD, e),
        }
        self.registry.update_last_paid(self.payments.as_ref());
    }

    /// One pass of the maintenance loop at the current clock time.
    pub fn run_maintenance_tick(&self) -> MaintenanceReport {
        let now = self.ctx.now();
        let mut report = MaintenanceReport::default();

        self.sync.check_timeouts(now);
        self.registry.check_all(false);

        let (status_due, sweep_due) = {
            let mut state = self.maintenance.lock();
            let status_due = now.saturating_sub(state.last_status_check) >= self.ctx.config.registry.ping_seconds;
            let sweep_due = now.saturating_sub(state.last_sweep) >= self.maintenance_config.sweep_interval_secs;
            if status_due {
                state.last_status_check = now;
            }
            if sweep_due {
                state.last_sweep = now;
            }
            (status_due, sweep_due)
        };

        if status_due && self.ctx.local.is_some() {
            report.status = Some(self.active.manage_status());
        }

        if sweep_due {
            report.swept = true;
            report.removed_masternodes = self.registry.check_and_remove(false);
            report.removed_payment_votes = self.payments.check_and_remove();
            report.removed_locks = self.instant_lock.check_and_remove();
            let stats = self.registry.stats();
            debug!(
                "Masternode maintenance: {} masternodes ({} enabled), {} complete locks",
                stats.total,
                stats.enabled,
                self.instant_lock.complete_lock_count()
            );
        }

        report
    }

    /// Runs the maintenance loop on the tokio runtime until the handle is aborted.
    pub fn spawn_maintenance(self: Arc<Self>) -> JoinHandle<()> {
        let tick = Duration::from_secs(self.maintenance_config.tick_secs.max(1));
        info!("Starting masternode maintenance every {:?}", tick);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                ticker.tick().await;
                self.run_maintenance_tick();
            }
        })
    }

    /// Drops every record, vote and lock.
    pub fn clear(&self) {
        self.registry.clear();
        self.payments.clear();
        self.instant_lock.clear();
        self.sync.reset();
    }
}
