//! Keypair generation and management for Rusty Coin.

use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};
use rand::rngs::OsRng;

use crate::error::{CryptoError, CryptoResult};

/// Represents a cryptographic key pair (public and secret key).
pub struct RustyKeyPair {
    keypair: Keypair,
}

impl RustyKeyPair {
    /// Generates a new random key pair.
    pub fn generate() -> Self {
        let mut csprng = OsRng {};
        let keypair = Keypair::generate(&mut csprng);
        RustyKeyPair { keypair }
    }

    /// Rebuilds a key pair from its 32-byte secret.
    pub fn from_secret_bytes(secret: &[u8]) -> CryptoResult<Self> {
        let secret = SecretKey::from_bytes(secret).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = PublicKey::from(&secret);
        Ok(RustyKeyPair { keypair: Keypair { secret, public } })
    }

    /// Returns the public key of this key pair.
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.keypair.public.to_bytes().to_vec()
    }

    /// Signs the given message with the secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }

    /// Verifies the given signature against the message and public key.
    pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> Result<(), ed25519_dalek::SignatureError> {
        public_key.verify(message, signature)
    }
}

impl std::fmt::Debug for RustyKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RustyKeyPair({})", hex::encode(self.keypair.public.as_bytes()))
    }
}
