//! Cryptographic primitives for Rusty Coin

pub mod error;
pub mod hash;
pub mod keypair;
pub mod signature;

pub use error::{CryptoError, CryptoResult};
pub use keypair::RustyKeyPair;
pub use signature::{Ed25519SignatureService, SignatureService};
