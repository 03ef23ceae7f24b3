#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use rusty_crypto::hash::payee_script;
use rusty_crypto::{Ed25519SignatureService, RustyKeyPair, SignatureService};
use rusty_masternode::chain::NodeContext;
use rusty_masternode::memory::{MemoryActions, MemoryChain, RecordingTransport};
use rusty_masternode::{LocalMasternode, ManualClock, MasternodeConfig, MasternodeServices, Network};
use rusty_shared_types::masternode::PING_WITNESS_COUNT;
use rusty_shared_types::{
    ConsensusVote, Hash, MasternodeAnnounce, MasternodeID, MasternodeIdentity, MasternodePing, OutPoint,
    PaymentWinnerVote, Transaction, TxInput, TxOutput, COIN,
};

pub const GENESIS_TIME: u64 = 1_600_000_000;
pub const BLOCK_SPACING: u64 = 60;
pub const TIP_HEIGHT: u64 = 200;
pub const COLLATERAL_HEIGHT: u64 = 10;

pub fn dummy_hash(seed: u8) -> Hash {
    [seed; 32]
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Keys and collateral of one simulated masternode.
pub struct TestMasternode {
    pub outpoint: OutPoint,
    pub address: SocketAddr,
    pub collateral: RustyKeyPair,
    pub operator: RustyKeyPair,
}

impl TestMasternode {
    pub fn id(&self) -> MasternodeID {
        MasternodeID(self.outpoint)
    }

    pub fn identity(&self) -> MasternodeIdentity {
        MasternodeIdentity {
            collateral_outpoint: self.outpoint,
            network_address: self.address,
            collateral_public_key: self.collateral.public_key_bytes(),
            operator_public_key: self.operator.public_key_bytes(),
            protocol_version: rusty_masternode::constants::PROTOCOL_VERSION,
        }
    }
}

/// A chain, collaborators and a set of masternodes with mature collateral.
pub struct TestNetwork {
    pub chain: Arc<MemoryChain>,
    pub actions: Arc<MemoryActions>,
    pub transport: Arc<RecordingTransport>,
    pub clock: Arc<ManualClock>,
    pub config: Arc<MasternodeConfig>,
    pub signer: Arc<Ed25519SignatureService>,
    pub masternodes: Vec<TestMasternode>,
}

impl TestNetwork {
    pub fn new(count: usize) -> Self {
        let mut config = MasternodeConfig::for_network(Network::Regtest);
        config.reference_nodes.clear();
        Self::with_config(count, config)
    }

    pub fn with_config(count: usize, config: MasternodeConfig) -> Self {
        let chain = Arc::new(MemoryChain::new());
        for height in 0..=TIP_HEIGHT {
            chain.push_block(block_time(height));
        }

        let masternodes: Vec<TestMasternode> = (0..count)
            .map(|i| {
                let collateral = RustyKeyPair::from_secret_bytes(&collateral_secret(i)).expect("collateral key");
                let outpoint = OutPoint::new(dummy_hash(i as u8 + 1), i as u32);
                chain.add_coin(
                    outpoint,
                    config.collateral_amount,
                    payee_script(&collateral.public_key_bytes()),
                    COLLATERAL_HEIGHT,
                );
                TestMasternode {
                    outpoint,
                    address: SocketAddr::from(([127, 0, 0, 1], 19_340 + i as u16)),
                    collateral,
                    operator: RustyKeyPair::from_secret_bytes(&operator_secret(i)).expect("operator key"),
                }
            })
            .collect();

        TestNetwork {
            chain,
            actions: Arc::new(MemoryActions::new()),
            transport: Arc::new(RecordingTransport::new()),
            clock: Arc::new(ManualClock::new(block_time(TIP_HEIGHT) + 30)),
            config: Arc::new(config),
            signer: Arc::new(Ed25519SignatureService),
            masternodes,
        }
    }

    pub fn context(&self, local: Option<LocalMasternode>) -> NodeContext {
        NodeContext {
            config: self.config.clone(),
            chain: self.chain.clone(),
            actions: self.actions.clone(),
            signer: self.signer.clone(),
            transport: self.transport.clone(),
            clock: self.clock.clone(),
            local: local.map(Arc::new),
        }
    }

    pub fn services(&self) -> MasternodeServices {
        MasternodeServices::new(self.context(None))
    }

    /// Services with every test masternode announced and the list marked synced.
    pub fn populated_services(&self) -> MasternodeServices {
        self.populated_services_with(None)
    }

    pub fn populated_services_with(&self, local: Option<LocalMasternode>) -> MasternodeServices {
        let services = MasternodeServices::new(self.context(local));
        for mn in &self.masternodes {
            services
                .registry
                .process_announce(&self.announce(mn, self.now()))
                .expect("announce accepted");
        }
        services.sync.set_blockchain_synced(true);
        services.sync.mark_synced(rusty_shared_types::SyncItem::List);
        self.transport.clear();
        services
    }

    pub fn now(&self) -> u64 {
        use rusty_masternode::Clock;
        self.clock.now()
    }

    pub fn tip(&self) -> u64 {
        use rusty_masternode::ChainView;
        self.chain.tip_height().expect("chain has blocks")
    }

    /// Signed v2 ping anchored 12 blocks behind the tip.
    pub fn ping(&self, mn: &TestMasternode, sig_time: u64) -> MasternodePing {
        use rusty_masternode::ChainView;
        let anchor = self.tip() - 12;
        let mut ping = MasternodePing {
            masternode_id: mn.id(),
            block_hash: self.chain.block_hash_at(anchor).expect("anchor block"),
            sig_time,
            signature: Vec::new(),
            witness_hashes: (1..=PING_WITNESS_COUNT as u64)
                .map(|depth| self.chain.block_hash_at(anchor - depth).expect("witness block"))
                .collect(),
        };
        ping.signature = self.signer.sign(&ping.signing_message(), &mn.operator).expect("sign ping");
        ping
    }

    pub fn announce(&self, mn: &TestMasternode, sig_time: u64) -> MasternodeAnnounce {
        let mut announce = MasternodeAnnounce {
            identity: mn.identity(),
            signature: Vec::new(),
            sig_time,
            last_ping: self.ping(mn, sig_time),
            stake_signover: None,
        };
        announce.signature = self
            .signer
            .sign(&announce.signing_message(), &mn.collateral)
            .expect("sign announce");
        announce
    }

    pub fn payment_vote(&self, voter: &TestMasternode, block_height: u64, payee: Vec<u8>) -> PaymentWinnerVote {
        let mut vote = PaymentWinnerVote::new(voter.id(), block_height, payee);
        vote.signature = self.signer.sign(&vote.signing_message(), &voter.operator).expect("sign vote");
        vote
    }

    pub fn lock_vote(&self, voter: &TestMasternode, txid: Hash, block_height: u64) -> ConsensusVote {
        let mut vote = ConsensusVote::new(voter.id(), txid, block_height);
        vote.signature = self.signer.sign(&vote.signing_message(), &voter.operator).expect("sign vote");
        vote
    }

    /// Local masternode configuration for the test masternode at `index`.
    pub fn local(&self, index: usize) -> LocalMasternode {
        let mn = &self.masternodes[index];
        rusty_masternode::active_masternode::local_from_secrets(
            mn.outpoint,
            mn.address,
            &collateral_secret(index),
            &operator_secret(index),
        )
        .expect("valid secrets")
    }

    pub fn index_of(&self, id: &MasternodeID) -> usize {
        self.masternodes.iter().position(|mn| mn.id() == *id).expect("known test masternode")
    }

    pub fn masternode(&self, id: &MasternodeID) -> &TestMasternode {
        self.masternodes.iter().find(|mn| mn.id() == *id).expect("known test masternode")
    }

    /// Funds a spendable coin at `height` and returns a lockable transaction spending it.
    pub fn lockable_tx(&self, seed: u8, height: u64) -> Transaction {
        let input = OutPoint::new(dummy_hash(200u8.wrapping_add(seed)), 0);
        let owner = RustyKeyPair::generate();
        self.chain.add_coin(input, 10 * COIN, payee_script(&owner.public_key_bytes()), height);
        spending_tx(&[input], 9 * COIN, seed)
    }
}

pub fn collateral_secret(index: usize) -> [u8; 32] {
    [index as u8 * 2 + 1; 32]
}

pub fn operator_secret(index: usize) -> [u8; 32] {
    [index as u8 * 2 + 2; 32]
}

pub fn block_time(height: u64) -> u64 {
    GENESIS_TIME + height * BLOCK_SPACING
}

/// Transaction spending `inputs` into one standard output.
pub fn spending_tx(inputs: &[OutPoint], value: u64, seed: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: inputs.iter().map(|outpoint| TxInput::spending(*outpoint)).collect(),
        outputs: vec![TxOutput::new(value, payee_script(&[seed; 32]))],
        lock_time: 0,
    }
}
