//! The masternode run by this node, if any.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;

use rusty_crypto::hash::public_key_hash;
use rusty_crypto::{CryptoResult, RustyKeyPair};
use rusty_shared_types::masternode::PING_WITNESS_COUNT;
use rusty_shared_types::{MasternodeAnnounce, MasternodeID, MasternodeIdentity, MasternodePing, OutPoint};

use crate::chain::NodeContext;
use crate::constants::{PING_ANCHOR_DEPTH, PROTOCOL_VERSION};
use crate::error::{MasternodeError, MasternodeResult};
use crate::registry::{is_valid_net_address, Registry};
use crate::sync::SyncTracker;

/// Collateral and keys of the local masternode.
#[derive(Debug)]
pub struct LocalMasternode {
    pub outpoint: OutPoint,
    pub network_address: SocketAddr,
    /// Owns the collateral output and signs announces
    pub collateral_key: RustyKeyPair,
    /// Signs pings and votes
    pub operator_key: RustyKeyPair,
    pub protocol_version: u32,
}

impl LocalMasternode {
    pub fn new(outpoint: OutPoint, network_address: SocketAddr, collateral_key: RustyKeyPair, operator_key: RustyKeyPair) -> Self {
        Self {
            outpoint,
            network_address,
            collateral_key,
            operator_key,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    pub fn id(&self) -> MasternodeID {
        MasternodeID(self.outpoint)
    }

    pub fn identity(&self) -> MasternodeIdentity {
        MasternodeIdentity {
            collateral_outpoint: self.outpoint,
            network_address: self.network_address,
            collateral_public_key: self.collateral_key.public_key_bytes(),
            operator_public_key: self.operator_key.public_key_bytes(),
            protocol_version: self.protocol_version,
        }
    }

    /// Collateral key signature over the operator key hash.
    pub fn stake_signover(&self) -> Vec<u8> {
        let operator_hash = public_key_hash(&self.operator_key.public_key_bytes());
        self.collateral_key.sign(&operator_hash).to_bytes().to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveMasternodeStatus {
    Initial,
    SyncInProcess,
    /// Collateral lacks confirmations
    InputTooNew,
    NotCapable(String),
    Started,
}

/// Starts the local masternode and keeps it pinging.
pub struct ActiveMasternode {
    ctx: NodeContext,
    registry: Arc<Registry>,
    sync: Arc<SyncTracker>,
    status: RwLock<ActiveMasternodeStatus>,
}

impl ActiveMasternode {
    pub fn new(ctx: NodeContext, registry: Arc<Registry>, sync: Arc<SyncTracker>) -> Self {
        Self {
            ctx,
            registry,
            sync,
            status: RwLock::new(ActiveMasternodeStatus::Initial),
        }
    }

    pub fn status(&self) -> ActiveMasternodeStatus {
        self.status.read().clone()
    }

    fn set_status(&self, status: ActiveMasternodeStatus) -> ActiveMasternodeStatus {
        let mut current = self.status.write();
        if *current != status {
            debug!("Active masternode status {:?} -> {:?}", *current, status);
            *current = status.clone();
        }
        status
    }

    /// Advances the status machine; announces the masternode when it is not yet known.
    pub fn manage_status(&self) -> ActiveMasternodeStatus {
        let local = match &self.ctx.local {
            Some(local) => local.clone(),
            None => return self.set_status(ActiveMasternodeStatus::NotCapable("not configured as a masternode".to_string())),
        };

        if !self.sync.is_blockchain_synced() {
            return self.set_status(ActiveMasternodeStatus::SyncInProcess);
        }
        if self.status() == ActiveMasternodeStatus::SyncInProcess {
            self.set_status(ActiveMasternodeStatus::Initial);
        }

        if self.status() == ActiveMasternodeStatus::Started {
            if let Err(e) = self.send_ping() {
                debug!("Local ping not sent: {}", e);
            }
            return ActiveMasternodeStatus::Started;
        }

        if let Some(entry) = self.registry.find(&local.id()) {
            if entry.is_enabled() && entry.identity.operator_public_key == local.operator_key.public_key_bytes() {
                info!("Masternode {} started remotely", local.id());
                return self.set_status(ActiveMasternodeStatus::Started);
            }
        }

        if !is_valid_net_address(&local.network_address, self.ctx.config.network) {
            return self.set_status(ActiveMasternodeStatus::NotCapable(format!(
                "invalid address {}",
                local.network_address
            )));
        }

        let confirmations = self.ctx.chain.confirmations(&local.outpoint).unwrap_or(0);
        if confirmations < self.ctx.config.registry.min_confirmations {
            return self.set_status(ActiveMasternodeStatus::InputTooNew);
        }
        if self.ctx.chain.amount_of(&local.outpoint) != Some(self.ctx.config.collateral_amount) {
            return self.set_status(ActiveMasternodeStatus::NotCapable(format!(
                "{} is not a collateral output",
                local.outpoint
            )));
        }

        let announce = match self.build_announce(&local) {
            Ok(announce) => announce,
            Err(e) => return self.set_status(ActiveMasternodeStatus::NotCapable(e.to_string())),
        };
        match self.registry.process_announce(&announce) {
            Ok(()) => {
                info!("Masternode {} started", local.id());
                self.set_status(ActiveMasternodeStatus::Started)
            }
            Err(e) => {
                warn!("Could not start masternode {}: {}", local.id(), e);
                self.set_status(ActiveMasternodeStatus::NotCapable(e.to_string()))
            }
        }
    }

    /// Builds a signed ping anchored a few blocks behind the tip, with witness hashes.
    pub fn build_ping(&self, local: &LocalMasternode) -> MasternodeResult<MasternodePing> {
        let chain = &self.ctx.chain;
        let tip = chain
            .tip_height()
            .ok_or_else(|| MasternodeError::NotReady("no chain tip".to_string()))?;
        let anchor_height = tip.saturating_sub(PING_ANCHOR_DEPTH);
        let block_hash = chain
            .block_hash_at(anchor_height)
            .ok_or_else(|| MasternodeError::NotReady(format!("no block at height {}", anchor_height)))?;
        let witness_hashes = (1..=PING_WITNESS_COUNT as u64)
            .map_while(|depth| anchor_height.checked_sub(depth))
            .map(|height| chain.block_hash_at(height))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| MasternodeError::NotReady("missing witness block".to_string()))?;

        let mut ping = MasternodePing {
            masternode_id: local.id(),
            block_hash,
            sig_time: self.ctx.now(),
            signature: Vec::new(),
            witness_hashes,
        };
        ping.signature = self.ctx.signer.sign(&ping.signing_message(), &local.operator_key)?;
        Ok(ping)
    }

    /// Announce for the local masternode, signed by the collateral key.
    pub fn build_announce(&self, local: &LocalMasternode) -> MasternodeResult<MasternodeAnnounce> {
        let mut announce = MasternodeAnnounce {
            identity: local.identity(),
            signature: Vec::new(),
            sig_time: self.ctx.now(),
            last_ping: self.build_ping(local)?,
            stake_signover: Some(local.stake_signover()),
        };
        announce.signature = self.ctx.signer.sign(&announce.signing_message(), &local.collateral_key)?;
        Ok(announce)
    }

    /// Signs and relays a fresh ping unless one was sent within the ping interval.
    pub fn send_ping(&self) -> MasternodeResult<MasternodePing> {
        if self.status() != ActiveMasternodeStatus::Started {
            return Err(MasternodeError::NotReady("masternode not started".to_string()));
        }
        let local = self
            .ctx
            .local
            .clone()
            .ok_or_else(|| MasternodeError::Logic("pinging without a local masternode".to_string()))?;
        let entry = self
            .registry
            .find(&local.id())
            .ok_or(MasternodeError::UnknownMasternode(local.id()))?;

        let ping_seconds = self.ctx.config.registry.ping_seconds;
        if entry.is_pinged_within(ping_seconds, self.ctx.now()) {
            return Err(MasternodeError::TooEarly(format!("pinged within {}s", ping_seconds)));
        }

        let ping = self.build_ping(&local)?;
        self.registry.record_local_ping(&ping)?;
        Ok(ping)
    }
}

/// Verifies a stake signover produced by [`LocalMasternode::stake_signover`].
pub fn verify_stake_signover(
    signer: &dyn rusty_crypto::SignatureService,
    identity: &MasternodeIdentity,
    signover: &[u8],
) -> bool {
    let operator_hash = public_key_hash(&identity.operator_public_key);
    signer.verify(&identity.collateral_public_key, signover, &operator_hash)
}

/// Loads a local masternode from raw 32-byte secrets.
pub fn local_from_secrets(
    outpoint: OutPoint,
    network_address: SocketAddr,
    collateral_secret: &[u8],
    operator_secret: &[u8],
) -> CryptoResult<LocalMasternode> {
    Ok(LocalMasternode::new(
        outpoint,
        network_address,
        RustyKeyPair::from_secret_bytes(collateral_secret)?,
        RustyKeyPair::from_secret_bytes(operator_secret)?,
    ))
}
