//! Cryptographic Primitives
//!
//! Trait seams for the three primitives the transport consumes:
//!
//! - [`Asymmetric`]: public-key decryption of `CLIENT_HELLO` bodies
//! - [`Symmetric`]: authenticated encryption of every other record body
//! - [`MacScheme`]: keyed MACs for cookies and session identifiers
//!
//! Production implementations are RSA-OAEP (SHA-256), ChaCha20-Poly1305 and
//! HMAC-SHA-256. The transport only ever sees the traits, so tests can swap
//! in cheaper stand-ins.

pub mod asym;
pub mod mac;
pub mod sym;

pub use asym::RsaAsymmetric;
pub use mac::{HmacSha256, MAC_SIZE};
pub use sym::{ChaChaPolySymmetric, MIN_KEY_SIZE};

use thiserror::Error;

/// Errors surfaced by the crypto primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key generation failed; fatal at startup.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// Decryption or authentication failed.
    #[error("decryption failed")]
    Decrypt,

    /// Provided key material is below the minimum accepted size.
    #[error("insecure key size: {got} bytes, need at least {need}")]
    WeakKey {
        /// Length of the provided key.
        got: usize,
        /// Minimum accepted length.
        need: usize,
    },
}

/// Public-key decryption of handshake records.
pub trait Asymmetric: Send + Sync {
    /// Decrypt a ciphertext produced against [`Asymmetric::public_key`].
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Encoded public key clients encrypt their hello against.
    fn public_key(&self) -> Vec<u8>;
}

/// Authenticated symmetric encryption of record bodies.
///
/// Implementations MUST be authenticating: a tampered ciphertext or a wrong
/// key fails decryption instead of yielding garbage.
pub trait Symmetric: Send + Sync {
    /// Encrypt `plaintext` under `key`.
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt and authenticate `ciphertext` under `key`.
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Keyed MAC for cookies and session identifiers.
pub trait MacScheme: Send + Sync {
    /// MAC over the concatenation of `parts` under `key`.
    fn sum(&self, key: &[u8], parts: &[&[u8]]) -> Vec<u8>;

    /// Constant-time tag comparison.
    fn equal(&self, a: &[u8], b: &[u8]) -> bool;
}
