//! Symmetric session cipher.
//!
//! Each negotiated channel uses two independent Blowfish keys, one per
//! direction. The cipher works on 8-byte blocks; plaintexts are padded
//! with zeroes up to the block boundary, and the inner frame's length
//! field is what recovers the exact payload on the other side.

use super::CryptoError;
use blowfish::Blowfish;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use rand::RngCore;

/// Session key length in bytes.
pub const SESSION_KEY_SIZE: usize = 16;

/// Cipher block size in bytes.
const BLOCK: usize = 8;

/// One direction of a negotiated session.
#[derive(Clone)]
pub struct SessionKey {
    bytes: [u8; SESSION_KEY_SIZE],
    cipher: Blowfish,
}

impl SessionKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(&bytes).expect("fixed-size key material is always valid")
    }

    /// Install a key received from a peer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SESSION_KEY_SIZE {
            return Err(CryptoError::InvalidSessionKey {
                expected: SESSION_KEY_SIZE,
                got: bytes.len(),
            });
        }
        let mut fixed = [0u8; SESSION_KEY_SIZE];
        fixed.copy_from_slice(bytes);
        let cipher = Blowfish::new_from_slice(&fixed)
            .expect("16 bytes is within the cipher's accepted key range");
        Ok(Self { bytes: fixed, cipher })
    }

    /// Raw key material, for RSA-wrapping during the handshake.
    pub fn key_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encrypt an arbitrary-length byte string. The result is padded
    /// with zeroes to the next block boundary.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let padded_len = plaintext.len().div_ceil(BLOCK) * BLOCK;
        let mut buf = vec![0u8; padded_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        for chunk in buf.chunks_exact_mut(BLOCK) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
        }
        buf
    }

    /// Decrypt a block-aligned ciphertext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() % BLOCK != 0 {
            return Err(CryptoError::Misaligned(ciphertext.len()));
        }
        let mut buf = ciphertext.to_vec();
        for chunk in buf.chunks_exact_mut(BLOCK) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        }
        Ok(buf)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_distinct() {
        let a = SessionKey::generate();
        let b = SessionKey::generate();
        assert_ne!(a.key_bytes(), b.key_bytes());
    }

    #[test]
    fn test_key_bytes_roundtrip() {
        let key = SessionKey::generate();
        let restored = SessionKey::from_bytes(key.key_bytes()).unwrap();
        assert_eq!(key.key_bytes(), restored.key_bytes());
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        assert!(SessionKey::from_bytes(&[0u8; 15]).is_err());
        assert!(SessionKey::from_bytes(&[0u8; 17]).is_err());
        assert!(SessionKey::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_padding_to_block_boundary() {
        let key = SessionKey::generate();

        let ct = key.encrypt(&[0xAB; 10]);
        assert_eq!(ct.len(), 16);

        let pt = key.decrypt(&ct).unwrap();
        assert_eq!(&pt[..10], &[0xAB; 10]);
        // alignment bytes decrypt back to the zero padding
        assert_eq!(&pt[10..], &[0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_exact_block_needs_no_padding() {
        let key = SessionKey::generate();
        let ct = key.encrypt(&[0x11; 24]);
        assert_eq!(ct.len(), 24);
        assert_eq!(key.decrypt(&ct).unwrap(), vec![0x11; 24]);
    }

    #[test]
    fn test_misaligned_ciphertext_rejected() {
        let key = SessionKey::generate();
        assert!(key.decrypt(&[0u8; 13]).is_err());
    }

    #[test]
    fn test_directional_keys_differ() {
        let mine = SessionKey::generate();
        let his = SessionKey::generate();
        let ct = mine.encrypt(b"link frame");
        let garbled = his.decrypt(&ct).unwrap();
        assert_ne!(&garbled[..10], b"link frame");
    }
}
