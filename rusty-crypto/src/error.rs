//! Error types for the crypto crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key bytes could not be parsed
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Signature bytes could not be parsed
    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    /// Signing failed
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;
