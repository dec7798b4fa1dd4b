//! RSA host keypair and peer public keys.
//!
//! The host keypair is generated once and persisted as PKCS#8 PEM next
//! to the node's configuration. Peers are known by the DER encoding of
//! their public key; that byte string is the identity anchor everything
//! else (fingerprint, overlay address) derives from.
//!
//! Session keys are wrapped with PKCS#1 v1.5; the session key material
//! must never cross the wire in the clear.

use super::CryptoError;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::Path;
use tracing::{debug, info};

/// Host RSA keypair with private-key operations.
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl RsaKeyPair {
    /// Generate a fresh keypair.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::from_private(private)
    }

    fn from_private(private: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public_der = private
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| CryptoError::KeyParse(e.to_string()))?
            .as_bytes()
            .to_vec();
        Ok(Self { private, public_der })
    }

    /// Read a keypair from a PKCS#8 PEM file.
    pub fn read_from_file(path: &Path) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(path).map_err(|e| CryptoError::KeyFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let private = RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| CryptoError::KeyParse(e.to_string()))?;
        debug!(path = %path.display(), "loaded host keypair");
        Self::from_private(private)
    }

    /// Write the keypair to a PKCS#8 PEM file.
    pub fn write_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        let pem = self
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyParse(e.to_string()))?;
        std::fs::write(path, pem.as_bytes()).map_err(|e| CryptoError::KeyFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the keypair from `path`, generating and persisting a new one
    /// if the file does not exist yet.
    pub fn load_or_generate(path: &Path, bits: usize) -> Result<Self, CryptoError> {
        if path.exists() {
            Self::read_from_file(path)
        } else {
            info!(bits, path = %path.display(), "generating host RSA keypair");
            let pair = Self::generate(bits)?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| CryptoError::KeyFile {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
            }
            pair.write_to_file(path)?;
            Ok(pair)
        }
    }

    /// DER encoding of the public half; this is what goes on the wire
    /// and what overlay identities are derived from.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Decrypt a PKCS#1 v1.5 ciphertext with the private key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public_der_len", &self.public_der.len())
            .finish_non_exhaustive()
    }
}

/// A peer's public key, installed from wire bytes.
#[derive(Clone)]
pub struct PeerPublicKey {
    key: RsaPublicKey,
    der: Vec<u8>,
}

impl PeerPublicKey {
    /// Install a public key from its DER encoding. Rejecting malformed
    /// bytes here is the line of defense for the whole handshake.
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_pkcs1_der(der)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self {
            key,
            der: der.to_vec(),
        })
    }

    /// The DER encoding this key was installed from.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Encrypt a short message (a session key) under this key with
    /// PKCS#1 v1.5.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut rng = rand::thread_rng();
        self.key
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))
    }
}

impl PartialEq for PeerPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for PeerPublicKey {}

impl std::fmt::Debug for PeerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerPublicKey")
            .field("der_len", &self.der.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Small keys keep test keygen fast; the wrap payload is only 16 bytes.
    const TEST_BITS: usize = 512;

    #[test]
    fn test_public_key_roundtrip() {
        let pair = RsaKeyPair::generate(TEST_BITS).unwrap();
        let peer = PeerPublicKey::from_der(pair.public_der()).unwrap();
        assert_eq!(peer.der(), pair.public_der());
    }

    #[test]
    fn test_wrap_unwrap() {
        let pair = RsaKeyPair::generate(TEST_BITS).unwrap();
        let peer = PeerPublicKey::from_der(pair.public_der()).unwrap();

        let secret = [0x42u8; 16];
        let wrapped = peer.encrypt(&secret).unwrap();
        assert_ne!(&wrapped[..], &secret[..]);

        let unwrapped = pair.decrypt(&wrapped).unwrap();
        assert_eq!(unwrapped, secret);
    }

    #[test]
    fn test_decrypt_garbage_fails() {
        let pair = RsaKeyPair::generate(TEST_BITS).unwrap();
        assert!(pair.decrypt(&[0xFFu8; 64]).is_err());
    }

    #[test]
    fn test_invalid_public_key_rejected() {
        assert!(PeerPublicKey::from_der(&[]).is_err());
        assert!(PeerPublicKey::from_der(b"not a key").is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("host_key.pem");

        let pair = RsaKeyPair::load_or_generate(&path, TEST_BITS).unwrap();
        let reloaded = RsaKeyPair::load_or_generate(&path, TEST_BITS).unwrap();
        assert_eq!(pair.public_der(), reloaded.public_der());
    }
}
