//! Configuration for the masternode registry and quorum protocols.

use serde::{Deserialize, Serialize};

use rusty_shared_types::{MasternodeID, OutPoint, COIN};

use crate::constants::*;
use crate::error::{MasternodeError, MasternodeResult};
use crate::quorum_formation::QuorumConfig;

/// Network the node runs on. Affects the port rule, list-request throttling and the
/// default reference nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    Main,
    Test,
    Regtest,
}

const MAINNET_REFERENCE_NODE: &str =
    "099c01bea63abd1692f60806bb646fa1d288e2d049281225f17e499024084e28-0";
const TESTNET_REFERENCE_NODE: &str =
    "fbc16ae5229d6d99181802fd76a4feee5e7640164dcebc7f8feb04a7bea026f8-0";
const REGTEST_REFERENCE_NODE: &str =
    "e466f5d8beb4c2d22a314310dc58e0ea89505c95409754d0d68fb874952608cc-1";

impl Network {
    pub fn default_reference_nodes(&self) -> Vec<OutPoint> {
        let raw = match self {
            Network::Main => MAINNET_REFERENCE_NODE,
            Network::Test => TESTNET_REFERENCE_NODE,
            Network::Regtest => REGTEST_REFERENCE_NODE,
        };
        raw.parse().ok().into_iter().collect()
    }
}

/// Registry timing and admission parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Confirmations required on a collateral output
    pub min_confirmations: u64,
    /// Minimum seconds between pings, and between asks for one entry
    pub min_ping_seconds: u64,
    /// Minimum seconds between accepted announces of one masternode
    pub min_broadcast_seconds: u64,
    /// Ping interval of the local masternode
    pub ping_seconds: u64,
    /// Seconds without a ping before a masternode expires
    pub expiration_seconds: u64,
    /// Seconds without a ping before a masternode is removed
    pub removal_seconds: u64,
    /// Throttle for per-record state checks
    pub check_seconds: u64,
    /// How often one peer may request the full list (main network)
    pub list_request_interval_secs: u64,
    /// Main network port
    pub default_port: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_confirmations: MASTERNODE_MIN_CONFIRMATIONS,
            min_ping_seconds: MASTERNODE_MIN_MNP_SECONDS,
            min_broadcast_seconds: MASTERNODE_MIN_MNB_SECONDS,
            ping_seconds: MASTERNODE_PING_SECONDS,
            expiration_seconds: MASTERNODE_EXPIRATION_SECONDS,
            removal_seconds: MASTERNODE_REMOVAL_SECONDS,
            check_seconds: MASTERNODE_CHECK_SECONDS,
            list_request_interval_secs: MASTERNODES_DSEG_SECONDS,
            default_port: MAINNET_DEFAULT_PORT,
        }
    }
}

/// Payment voting parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Committee size and vote quorum
    pub quorum: QuorumConfig,
    /// Voters are ranked this many blocks before the voted height
    pub rank_offset: u64,
    /// Votes may target at most this many blocks past the tip
    pub future_window: u64,
    /// Multiplier applied to the enabled count for every lookback window
    pub payment_lookback_factor: f64,
    /// Lower bound on the retained tally window
    pub min_retained_blocks: u64,
    /// Vote weight of reference nodes
    pub reference_node_weight: u32,
    /// Minimum protocol when new-protocol enforcement is on
    pub min_protocol_current: u32,
    /// Minimum protocol otherwise
    pub min_protocol_previous: u32,
    /// Select `min_protocol_current`
    pub enforce_current_protocol: bool,
    /// Reject blocks that do not pay the elected payee
    pub enforce_payments: bool,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            quorum: QuorumConfig {
                committee_size: MNPAYMENTS_SIGNATURES_TOTAL,
                signatures_required: MNPAYMENTS_SIGNATURES_REQUIRED as usize,
            },
            rank_offset: PAYMENT_RANK_OFFSET,
            future_window: PAYMENT_FUTURE_WINDOW,
            payment_lookback_factor: 1.25,
            min_retained_blocks: PAYMENT_MIN_RETAINED_BLOCKS,
            reference_node_weight: REFERENCE_NODE_VOTE_WEIGHT,
            min_protocol_current: MIN_MASTERNODE_PAYMENT_PROTO_VERSION_CURR,
            min_protocol_previous: MIN_MASTERNODE_PAYMENT_PROTO_VERSION_PREV,
            enforce_current_protocol: true,
            enforce_payments: true,
        }
    }
}

/// Instant lock parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantLockConfig {
    /// Committee size and vote quorum
    pub quorum: QuorumConfig,
    /// Minimum protocol of voting masternodes
    pub min_protocol: u32,
    /// Confirmations required on every input
    pub min_input_confirmations: u64,
    /// Blocks added to the youngest input's depth to get the lock height
    pub lock_height_offset: u64,
    /// Transactions mined deeper than this are ignored
    pub max_tx_age_blocks: u64,
    /// Lifetime of locks and votes in seconds
    pub expiration_seconds: u64,
    /// Seconds after which an incomplete lock counts as timed out
    pub timeout_seconds: u64,
    /// Blocks to reprocess after lock resolution
    pub reprocess_depth: u64,
    /// Largest total output value that may be locked, in whole coins
    pub max_value_coins: u64,
}

impl Default for InstantLockConfig {
    fn default() -> Self {
        Self {
            quorum: QuorumConfig {
                committee_size: INSTANTX_SIGNATURES_TOTAL,
                signatures_required: INSTANTX_SIGNATURES_REQUIRED,
            },
            min_protocol: MIN_INSTANTX_PROTO_VERSION,
            min_input_confirmations: INSTANTX_MIN_INPUT_CONFIRMATIONS,
            lock_height_offset: INSTANTX_LOCK_HEIGHT_OFFSET,
            max_tx_age_blocks: INSTANTX_ACCEPTED_BLOCK_COUNT,
            expiration_seconds: INSTANTX_EXPIRATION_SECONDS,
            timeout_seconds: INSTANTX_TIMEOUT_SECONDS,
            reprocess_depth: INSTANTX_REPROCESS_DEPTH,
            max_value_coins: INSTANTX_DEFAULT_MAX_VALUE_COINS,
        }
    }
}

impl InstantLockConfig {
    pub fn max_value(&self) -> u64 {
        self.max_value_coins.saturating_mul(COIN)
    }
}

/// Top-level configuration for the masternode layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasternodeConfig {
    pub network: Network,
    pub registry: RegistryConfig,
    pub payments: PaymentConfig,
    pub instant_lock: InstantLockConfig,
    /// Bootstrap identities whose payment votes carry extra weight
    pub reference_nodes: Vec<OutPoint>,
    /// Exact value of a collateral output
    pub collateral_amount: u64,
    /// Gap between blocks after which a block may skip the masternode payment
    pub chain_stall_duration_secs: u64,
    /// From this height the payment must sit at the fixed coinbase slot
    pub pos_start_height: Option<u64>,
}

impl Default for MasternodeConfig {
    fn default() -> Self {
        Self::for_network(Network::Main)
    }
}

impl MasternodeConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            registry: RegistryConfig::default(),
            payments: PaymentConfig::default(),
            instant_lock: InstantLockConfig::default(),
            reference_nodes: network.default_reference_nodes(),
            collateral_amount: MASTERNODE_COLLATERAL_AMOUNT,
            chain_stall_duration_secs: 60 * 60,
            pos_start_height: None,
        }
    }

    /// Loads a configuration from JSON.
    pub fn from_json(json: &str) -> MasternodeResult<Self> {
        let config: MasternodeConfig =
            serde_json::from_str(json).map_err(|e| MasternodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MasternodeResult<()> {
        for (name, quorum) in [("payments", &self.payments.quorum), ("instant_lock", &self.instant_lock.quorum)] {
            if quorum.signatures_required == 0 || quorum.signatures_required > quorum.committee_size {
                return Err(MasternodeError::Config(format!(
                    "{} quorum {} out of range for committee of {}",
                    name, quorum.signatures_required, quorum.committee_size
                )));
            }
        }
        if self.registry.expiration_seconds >= self.registry.removal_seconds {
            return Err(MasternodeError::Config(
                "expiration window must be shorter than the removal window".to_string(),
            ));
        }
        if !(self.payments.payment_lookback_factor >= 1.0) {
            return Err(MasternodeError::Config("payment_lookback_factor must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn is_reference_node(&self, id: &MasternodeID) -> bool {
        self.reference_nodes.contains(&id.0)
    }

    /// Minimum protocol a masternode needs to be paid or to vote on payments.
    pub fn min_payment_protocol(&self) -> u32 {
        if self.payments.enforce_current_protocol {
            self.payments.min_protocol_current
        } else {
            self.payments.min_protocol_previous
        }
    }

    /// Enabled count scaled by the lookback factor.
    pub fn lookback_blocks(&self, enabled: usize) -> u64 {
        (enabled as f64 * self.payments.payment_lookback_factor) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_default_reference_nodes_parse() {
        for network in [Network::Main, Network::Test, Network::Regtest] {
            assert_eq!(network.default_reference_nodes().len(), 1);
        }
        let regtest = Network::Regtest.default_reference_nodes();
        assert_eq!(regtest[0].vout, 1);

        let main = Network::Main.default_reference_nodes();
        assert_eq!(
            main[0],
            OutPoint::new(hex!("099c01bea63abd1692f60806bb646fa1d288e2d049281225f17e499024084e28"), 0)
        );
        assert!(MasternodeConfig::for_network(Network::Main).is_reference_node(&MasternodeID(main[0])));
    }

    #[test]
    fn test_config_from_json() {
        let mut config = MasternodeConfig::for_network(Network::Test);
        config.instant_lock.max_value_coins = 50;
        let json = serde_json::to_string(&config).unwrap();
        let loaded = MasternodeConfig::from_json(&json).unwrap();
        assert_eq!(loaded.network, Network::Test);
        assert_eq!(loaded.instant_lock.max_value(), 50 * COIN);
    }

    #[test]
    fn test_invalid_quorum_is_rejected() {
        let mut config = MasternodeConfig::default();
        config.payments.quorum.signatures_required = 11;
        assert!(matches!(config.validate(), Err(MasternodeError::Config(_))));
    }

    #[test]
    fn test_lookback_blocks() {
        let config = MasternodeConfig::default();
        assert_eq!(config.lookback_blocks(100), 125);
        assert_eq!(config.lookback_blocks(0), 0);
    }
}
