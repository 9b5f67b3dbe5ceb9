use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;

/// Passphrase behind the development fallback key. Never valid in production.
pub const DEV_PASSPHRASE: &str = "vault-messenger-default-key-2024";

/// Generate a random 256-bit key for AES-256-GCM.
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encode a key to base64 for configuration files.
pub fn key_to_base64(key: &[u8; KEY_LEN]) -> String {
    BASE64.encode(key)
}

/// Decode a base64 key.
pub fn key_from_base64(encoded: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| CryptoError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, b.len())))
}

/// SHA-256 of a passphrase. Only used for the development fallback key.
pub fn derive_key(passphrase: &str) -> [u8; KEY_LEN] {
    Sha256::digest(passphrase.as_bytes()).into()
}

/// The documented non-production default key.
pub fn dev_key() -> [u8; KEY_LEN] {
    derive_key(DEV_PASSPHRASE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip() {
        let key = generate_key();
        assert_eq!(key_from_base64(&key_to_base64(&key)).unwrap(), key);
    }

    #[test]
    fn wrong_length_rejected() {
        let short = BASE64.encode([7u8; 16]);
        assert!(matches!(key_from_base64(&short), Err(CryptoError::InvalidKey(_))));
        assert!(key_from_base64("not base64!!").is_err());
    }

    #[test]
    fn dev_key_is_stable() {
        assert_eq!(dev_key(), derive_key(DEV_PASSPHRASE));
        assert_ne!(dev_key(), derive_key("something else"));
    }
}
