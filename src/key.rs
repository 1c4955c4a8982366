use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, Key as AesKey, KeyInit, Nonce};
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AeadError;

/// Key size in bytes (AES-128).
pub const KEY_SIZE: usize = 16;

/// AES-GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// A symmetric key, erased from memory when dropped.
///
/// Every key encrypts at most one message, so the nonce is fixed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Key(pub [u8; KEY_SIZE]);

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

impl Key {
    /// Draws a uniformly random key.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut key = [0u8; KEY_SIZE];
        rng.fill(&mut key);
        Key(key)
    }

    /// Derives a key from the concatenation of `parts` with SHA-256.
    pub fn derive(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let digest = hasher.finalize();

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest[..KEY_SIZE]);
        Key(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> Aes128Gcm {
        Aes128Gcm::new(AesKey::<Aes128Gcm>::from_slice(&self.0))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Ciphertext, AeadError> {
        let nonce = Nonce::from_slice(&[0u8; 12]);
        self.cipher()
            .encrypt(nonce, plaintext)
            .map(Ciphertext)
            .map_err(|_| AeadError)
    }

    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Vec<u8>, AeadError> {
        let nonce = Nonce::from_slice(&[0u8; 12]);
        self.cipher()
            .decrypt(nonce, ciphertext.0.as_slice())
            .map_err(|_| AeadError)
    }
}

/// An authenticated ciphertext.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(pub Vec<u8>);

impl Ciphertext {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
