//! Masternode quorum layer: registry, payment voting and instant transaction locks.
//!
//! Components are owned objects assembled by [`MasternodeServices::new`] around a
//! [`NodeContext`] that carries the chain, transport and signing collaborators.

pub mod active_masternode; // Local masternode status and pings
pub mod chain; // Collaborator traits
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod instant_lock; // Instant transaction locks
pub mod memory; // In-memory collaborators
pub mod network_coordinator; // Gossip dispatch and maintenance
pub mod payments; // Masternode payment voting
pub mod quorum_formation; // Deterministic scoring and committees
pub mod registry; // Masternode list
pub mod sync;

pub use active_masternode::{ActiveMasternode, ActiveMasternodeStatus, LocalMasternode};
pub use chain::{ChainActions, ChainView, NodeContext, Transport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{InstantLockConfig, MasternodeConfig, Network, PaymentConfig, RegistryConfig};
pub use error::{MasternodeError, MasternodeResult};
pub use instant_lock::{InstantLock, LockRequestOutcome, LockStatus, TransactionLock};
pub use network_coordinator::{MaintenanceConfig, MaintenanceReport, MasternodeServices};
pub use payments::{BlockPayees, PayeeTally, PaymentVoting};
pub use quorum_formation::{Committee, QuorumConfig, QuorumType, RankedMasternode};
pub use registry::{NoPaymentHistory, PaymentHistory, Registry};
pub use sync::SyncTracker;
