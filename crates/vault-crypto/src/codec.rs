use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};

use crate::error::CryptoError;
use crate::keys::KEY_LEN;

pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Symmetric codec for data at rest.
///
/// Sealed layout: `nonce (12) || ciphertext || tag (16)`. The codec holds only
/// the expanded key, so one instance can be cloned into blocking tasks and
/// shared across threads without locking.
#[derive(Clone)]
pub struct Codec {
    cipher: Aes256Gcm,
}

impl Codec {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt arbitrary bytes under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt bytes produced by [`Codec::encrypt`] under the same key.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decryption("ciphertext too short"));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decryption("authentication failed"))
    }

    pub fn encrypt_text(&self, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Decrypt and require valid UTF-8; anything else counts as corruption.
    pub fn decrypt_text(&self, sealed: &[u8]) -> Result<String, CryptoError> {
        let bytes = self.decrypt(sealed)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::Decryption("plaintext is not UTF-8"))
    }

    /// Encrypt then decrypt a known value. Used at startup so a misconfigured
    /// key fails the process instead of the first request.
    pub fn self_check(&self) -> Result<(), CryptoError> {
        const SAMPLE: &str = "vault codec self-check";
        let sealed = self.encrypt_text(SAMPLE)?;
        if self.decrypt_text(&sealed)? != SAMPLE {
            return Err(CryptoError::Decryption("self-check mismatch"));
        }
        Ok(())
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Codec(AES-256-GCM, key redacted)")
    }
}
