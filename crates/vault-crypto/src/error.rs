use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encryption,

    /// Malformed, truncated or foreign-key ciphertext.
    #[error("decryption failed: {0}")]
    Decryption(&'static str),
}
