//! RSA-OAEP asymmetric cipher.
//!
//! The server generates one 2048-bit keypair at startup and keeps it for the
//! process lifetime. Clients encrypt their `CLIENT_HELLO` against the DER
//! public key; nothing else flows through the asymmetric path.

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use super::{Asymmetric, CryptoError};

/// RSA modulus size in bits.
const KEY_BITS: usize = 2048;

/// RSA-OAEP (SHA-256) implementation of [`Asymmetric`].
pub struct RsaAsymmetric {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl RsaAsymmetric {
    /// Generate a fresh keypair. Fails only if the OS entropy source does.
    pub fn generate() -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_der = private
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?
            .as_bytes()
            .to_vec();
        Ok(Self {
            private,
            public_der,
        })
    }
}

impl Asymmetric for RsaAsymmetric {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }

    fn public_key(&self) -> Vec<u8> {
        self.public_der.clone()
    }
}

/// Encrypt a payload against a PKCS#1 DER public key.
///
/// The server never calls this; it exists for client tooling and tests.
pub fn encrypt_for(public_der: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = RsaPublicKey::from_pkcs1_der(public_der).map_err(|_| CryptoError::Encrypt)?;
    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|_| CryptoError::Encrypt)
}
