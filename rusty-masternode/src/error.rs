//! Error types for the masternode layer.

use rusty_crypto::CryptoError;
use rusty_shared_types::{MasternodeID, TypesError};
use thiserror::Error;

/// Why a message or request was not accepted.
///
/// Handlers return these to the gossip dispatcher, which turns them into misbehavior
/// scores, identity requests and log lines. Nothing above the dispatcher sees them.
#[derive(Error, Debug)]
pub enum MasternodeError {
    /// Wrong-sized fields, impossible timestamps, bad addresses
    #[error("Malformed message: {reason}")]
    Malformed { reason: String, dos: u32 },

    /// Signature did not verify
    #[error("Invalid signature on {what}")]
    InvalidSignature {
        what: String,
        dos: u32,
        /// Signer whose record should be refreshed from the peer
        signer: Option<MasternodeID>,
    },

    /// The signer is not in the local registry
    #[error("Unknown masternode {0}")]
    UnknownMasternode(MasternodeID),

    /// Older than what we already have
    #[error("Stale: {0}")]
    Stale(String),

    /// Already seen
    #[error("Duplicate {0}")]
    Duplicate(String),

    /// Outside the committee, double vote, value above cap
    #[error("Policy violation: {reason}")]
    PolicyViolation { reason: String, dos: u32 },

    /// Two locks claim the same input
    #[error("Conflicting lock: {0}")]
    Conflict(String),

    /// Missing chain data or not yet eligible; may succeed later
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Rate limited
    #[error("Too early: {0}")]
    TooEarly(String),

    /// Caller broke a contract
    #[error("Logic error: {0}")]
    Logic(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Encoding error: {0}")]
    Types(#[from] TypesError),
}

impl MasternodeError {
    pub fn malformed(reason: impl Into<String>, dos: u32) -> Self {
        MasternodeError::Malformed { reason: reason.into(), dos }
    }

    pub fn policy(reason: impl Into<String>, dos: u32) -> Self {
        MasternodeError::PolicyViolation { reason: reason.into(), dos }
    }

    /// Misbehavior score to charge the peer that sent the offending message.
    pub fn dos_score(&self) -> u32 {
        match self {
            MasternodeError::Malformed { dos, .. }
            | MasternodeError::InvalidSignature { dos, .. }
            | MasternodeError::PolicyViolation { dos, .. } => *dos,
            _ => 0,
        }
    }

    /// Masternode to request from the peer, if the failure may be a local sync gap.
    pub fn asks_for(&self) -> Option<MasternodeID> {
        match self {
            MasternodeError::UnknownMasternode(id) => Some(*id),
            MasternodeError::InvalidSignature { signer, .. } => *signer,
            _ => None,
        }
    }

    /// Errors that are routine for gossip and only worth a debug line.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            MasternodeError::Duplicate(_)
                | MasternodeError::Stale(_)
                | MasternodeError::NotReady(_)
                | MasternodeError::TooEarly(_)
        )
    }
}

/// Result type for masternode operations
pub type MasternodeResult<T> = std::result::Result<T, MasternodeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_shared_types::OutPoint;

    #[test]
    fn test_dos_scores() {
        assert_eq!(MasternodeError::malformed("key size", 100).dos_score(), 100);
        assert_eq!(MasternodeError::policy("rank", 20).dos_score(), 20);
        assert_eq!(MasternodeError::Duplicate("vote".into()).dos_score(), 0);
        assert_eq!(MasternodeError::Conflict("input".into()).dos_score(), 0);
    }

    #[test]
    fn test_asks_for_unknown_signer() {
        let id = MasternodeID(OutPoint::new([1u8; 32], 0));
        assert_eq!(MasternodeError::UnknownMasternode(id).asks_for(), Some(id));
        let bad_sig = MasternodeError::InvalidSignature { what: "vote".into(), dos: 0, signer: Some(id) };
        assert_eq!(bad_sig.asks_for(), Some(id));
        assert_eq!(MasternodeError::Stale("old".into()).asks_for(), None);
    }
}
