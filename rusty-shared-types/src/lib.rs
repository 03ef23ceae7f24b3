use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash as StdHash;
use thiserror::Error;

pub type Hash = [u8; 32];
pub type PubKeyHash = [u8; 20];

pub mod masternode;
pub mod p2p;

pub use masternode::{
    ConsensusVote, MasternodeAnnounce, MasternodeEntry, MasternodeID, MasternodeIdentity,
    MasternodePing, MasternodeState, PaymentWinnerVote,
};
pub use p2p::{GossipMessage, Inv, InvType, PeerId, SyncItem};

/// One coin in base units.
pub const COIN: u64 = 100_000_000;

/// Errors raised while encoding or decoding shared types.
#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<bincode::Error> for TypesError {
    fn from(e: bincode::Error) -> Self {
        TypesError::Serialization(e.to_string())
    }
}

/// Hashes the canonical bincode encoding of `value` with BLAKE3.
///
/// Every identity and dedup hash in the masternode protocols goes through here so that
/// independent nodes derive the same value from the same fields.
pub fn hash_serialized<T: Serialize + ?Sized>(value: &T) -> Hash {
    let bytes = bincode::serialize(value).unwrap_or_default();
    blake3::hash(&bytes).into()
}

/// Represents a reference to a specific transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, StdHash, Serialize, Deserialize)]
pub struct OutPoint {
    /// The transaction ID (hash) of the transaction containing the output.
    pub txid: [u8; 32],
    /// The index of the output within that transaction.
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: [u8; 32], vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// Short `txid-vout` form used in logs and signed vote messages.
    pub fn to_short_string(&self) -> String {
        format!("{}-{}", hex::encode(self.txid), self.vout)
    }

    pub fn encode_to_vec(&self) -> Result<Vec<u8>, TypesError> {
        Ok(bincode::serialize(self)?)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_short_string())
    }
}

impl std::str::FromStr for OutPoint {
    type Err = TypesError;

    /// Parses the `txid-vout` short form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid_hex, vout) = s
            .split_once('-')
            .ok_or_else(|| TypesError::Deserialization(format!("missing vout in {}", s)))?;
        let bytes = hex::decode(txid_hex).map_err(|e| TypesError::Deserialization(e.to_string()))?;
        let txid: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TypesError::Deserialization("txid must be 32 bytes".to_string()))?;
        let vout = vout
            .parse::<u32>()
            .map_err(|e| TypesError::Deserialization(e.to_string()))?;
        Ok(OutPoint { txid, vout })
    }
}

/// Represents a transaction input, referencing a previous transaction's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// The `OutPoint` referencing the output being spent.
    pub previous_output: OutPoint,
    /// The script signature, providing proof of ownership.
    #[serde(with = "serde_bytes")]
    pub script_sig: Vec<u8>,
    /// A sequence number, typically used for replace-by-fee or relative lock-times.
    pub sequence: u32,
}

impl TxInput {
    pub fn spending(previous_output: OutPoint) -> Self {
        TxInput { previous_output, script_sig: Vec::new(), sequence: u32::MAX }
    }
}

/// Represents a transaction output, specifying a value and a locking script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// The value of the output in base units.
    pub value: u64,
    /// The locking script (scriptPubKey) that defines the conditions for spending this output.
    #[serde(with = "serde_bytes")]
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    /// Creates a new `TxOutput`.
    ///
    /// # Arguments
    /// * `value` - The value of the output in base units
    /// * `script_pubkey` - The locking script that defines spending conditions
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        TxOutput { value, script_pubkey }
    }

    /// Extracts the public key hash from a P2PKH script, if applicable.
    pub fn extract_public_key_hash(&self) -> Option<PubKeyHash> {
        // P2PKH script: OP_DUP OP_HASH160 <20-byte-hash> OP_EQUALVERIFY OP_CHECKSIG
        // The public key hash is bytes 3 to 22
        if self.script_pubkey.len() == 25
            && self.script_pubkey[0] == 0x76 // OP_DUP
            && self.script_pubkey[1] == 0xA9 // OP_HASH160
            && self.script_pubkey[2] == 0x14 // PUSHDATA(20)
            && self.script_pubkey[23] == 0x88 // OP_EQUALVERIFY
            && self.script_pubkey[24] == 0xAC // OP_CHECKSIG
        {
            let mut public_key_hash = [0u8; 20];
            public_key_hash.copy_from_slice(&self.script_pubkey[3..23]);
            Some(public_key_hash)
        } else {
            None
        }
    }
}

/// Builds the P2PKH locking script for a public key hash.
pub fn p2pkh_script(public_key_hash: &PubKeyHash) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xA9, 0x14]);
    script.extend_from_slice(public_key_hash);
    script.extend_from_slice(&[0x88, 0xAC]);
    script
}

/// A transaction as seen by the masternode layer.
///
/// Validity of the transaction itself belongs to the chain; the quorum protocols only
/// look at its inputs, outputs and lock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The version of the transaction format.
    pub version: u32,
    /// A list of transaction inputs.
    pub inputs: Vec<TxInput>,
    /// A list of transaction outputs.
    pub outputs: Vec<TxOutput>,
    /// Earliest time or block height at which the transaction may be mined.
    pub lock_time: u32,
}

impl Transaction {
    pub fn txid(&self) -> Hash {
        hash_serialized(self)
    }

    pub fn get_inputs(&self) -> &[TxInput] {
        &self.inputs
    }

    pub fn get_outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    /// Sum of all output values, `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outpoint_short_string_parses_back() {
        let outpoint = OutPoint::new([0xab; 32], 7);
        let text = outpoint.to_short_string();
        assert!(text.ends_with("-7"));
        assert_eq!(text.parse::<OutPoint>().unwrap(), outpoint);
        assert!("nonsense".parse::<OutPoint>().is_err());
    }

    #[test]
    fn test_p2pkh_script_extracts_hash() {
        let pkh = [9u8; 20];
        let output = TxOutput::new(10, p2pkh_script(&pkh));
        assert_eq!(output.extract_public_key_hash(), Some(pkh));
        assert_eq!(TxOutput::new(10, vec![0x6a]).extract_public_key_hash(), None);
    }

    #[test]
    fn test_total_output_value_overflow() {
        let tx = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![TxOutput::new(u64::MAX, vec![]), TxOutput::new(1, vec![])],
            lock_time: 0,
        };
        assert_eq!(tx.total_output_value(), None);
    }

    #[test]
    fn test_txid_changes_with_lock_time() {
        let mut tx = Transaction { version: 1, inputs: vec![], outputs: vec![], lock_time: 0 };
        let before = tx.txid();
        tx.lock_time = 1;
        assert_ne!(before, tx.txid());
    }
}
