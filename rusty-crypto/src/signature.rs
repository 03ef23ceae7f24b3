// rusty-crypto/src/signature.rs

use ed25519_dalek::{PublicKey, Signature, Verifier};
use log::debug;

use crate::error::{CryptoError, CryptoResult};
use crate::keypair::RustyKeyPair;

pub fn sign_message(keypair: &RustyKeyPair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

pub fn verify_signature(public_key: &PublicKey, message: &[u8], signature: &Signature) -> Result<(), ed25519_dalek::SignatureError> {
    public_key.verify(message, signature)
}

/// Sign/verify service used by the masternode protocols.
///
/// The protocols never build signatures themselves; they hand messages and keys to an
/// implementation of this trait.
pub trait SignatureService: Send + Sync {
    /// Signs `message` with `key`, returning the encoded signature.
    fn sign(&self, message: &[u8], key: &RustyKeyPair) -> CryptoResult<Vec<u8>>;

    /// Checks an encoded signature. Malformed keys or signatures verify as false.
    fn verify(&self, public_key: &[u8], signature: &[u8], message: &[u8]) -> bool;

    /// Expected length of an encoded public key.
    fn public_key_len(&self) -> usize;
}

/// Ed25519 implementation of [`SignatureService`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519SignatureService;

impl SignatureService for Ed25519SignatureService {
    fn sign(&self, message: &[u8], key: &RustyKeyPair) -> CryptoResult<Vec<u8>> {
        let signature = sign_message(key, message);
        // Never hand out a signature that does not verify against our own key.
        verify_signature(&key.public_key(), message, &signature)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn verify(&self, public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
        let public_key = match PublicKey::from_bytes(public_key) {
            Ok(key) => key,
            Err(e) => {
                debug!("Rejecting signature, bad public key: {}", e);
                return false;
            }
        };
        let signature = match Signature::try_from(signature) {
            Ok(sig) => sig,
            Err(e) => {
                debug!("Rejecting signature, bad encoding: {}", e);
                return false;
            }
        };
        verify_signature(&public_key, message, &signature).is_ok()
    }

    fn public_key_len(&self) -> usize {
        ed25519_dalek::PUBLIC_KEY_LENGTH
    }
}
