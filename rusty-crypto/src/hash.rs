//! Hashing helpers for Rusty Coin.

use blake3::Hasher as Blake3Hasher;
use rusty_shared_types::{Hash, PubKeyHash};
use sha2::Digest;

/// Calculate SHA256 hash of input data
pub fn calculate_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// BLAKE3 over the concatenation of `parts`.
pub fn blake3_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Blake3Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// 20-byte key hash used in P2PKH scripts: SHA256 of the BLAKE3 of the key, truncated.
pub fn public_key_hash(public_key: &[u8]) -> PubKeyHash {
    let digest = calculate_sha256(blake3::hash(public_key).as_bytes());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    out
}

/// P2PKH locking script paying `public_key`.
pub fn payee_script(public_key: &[u8]) -> Vec<u8> {
    rusty_shared_types::p2pkh_script(&public_key_hash(public_key))
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use super::*;

    #[test]
    fn test_calculate_sha256() {
        // Empty input
        let hash = calculate_sha256(&[]);
        assert_eq!(
            hash,
            hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );

        // Short input
        let hash = calculate_sha256(b"hello");
        assert_eq!(
            hash,
            hex!("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn test_blake3_concat_matches_single_update() {
        assert_eq!(blake3_concat(&[b"ab", b"cd"]), <[u8; 32]>::from(blake3::hash(b"abcd")));
    }

    #[test]
    fn test_payee_script_is_p2pkh() {
        let key = [4u8; 32];
        let script = payee_script(&key);
        let output = rusty_shared_types::TxOutput::new(1, script);
        assert_eq!(output.extract_public_key_hash(), Some(public_key_hash(&key)));
    }
}
