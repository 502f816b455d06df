//! ChaCha20-Poly1305 symmetric cipher.
//!
//! Frames are `nonce(12) || ciphertext || tag(16)`. Keys shorter than 32
//! bytes are rejected; longer keys are truncated to the first 32 bytes.

use chacha20poly1305::aead::{Aead, AeadCore, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};

use super::{CryptoError, Symmetric};

/// Minimum accepted key length in bytes. Anything below 256 bits is insecure.
pub const MIN_KEY_SIZE: usize = 32;

/// Nonce length prepended to every frame.
const NONCE_SIZE: usize = 12;

/// ChaCha20-Poly1305 implementation of [`Symmetric`].
#[derive(Clone, Copy, Default)]
pub struct ChaChaPolySymmetric;

impl ChaChaPolySymmetric {
    fn cipher(key: &[u8]) -> Result<ChaCha20Poly1305, CryptoError> {
        if key.len() < MIN_KEY_SIZE {
            return Err(CryptoError::WeakKey {
                got: key.len(),
                need: MIN_KEY_SIZE,
            });
        }
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key[..MIN_KEY_SIZE])))
    }
}

impl Symmetric for ChaChaPolySymmetric {
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Self::cipher(key)?;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut frame = Vec::with_capacity(NONCE_SIZE + sealed.len());
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&sealed);
        Ok(frame)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(CryptoError::Decrypt);
        }
        let cipher = Self::cipher(key)?;
        let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::Decrypt)
    }
}
