//! Cryptographic primitives consumed by the link layer.
//!
//! Two pieces: the RSA host/peer keys that anchor identity and wrap
//! session keys during the handshake, and the per-direction symmetric
//! session cipher used for everything after it.

mod rsa;
mod session;

pub use rsa::{PeerPublicKey, RsaKeyPair};
pub use session::{SessionKey, SESSION_KEY_SIZE};

use thiserror::Error;

/// Errors from key handling and cipher operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid public key bytes: {0}")]
    InvalidPublicKey(String),

    #[error("invalid session key: expected {expected} bytes, got {got}")]
    InvalidSessionKey { expected: usize, got: usize },

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("ciphertext length {0} is not block-aligned")]
    Misaligned(usize),

    #[error("key file {path}: {source}")]
    KeyFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("key file parse: {0}")]
    KeyParse(String),
}
