use thiserror::Error;
use vault_crypto::CryptoError;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Too few, duplicate or otherwise unacceptable participants.
    #[error("invalid membership: {0}")]
    InvalidMembership(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Stored ciphertext could not be opened with the configured key.
    #[error("codec failure: {0}")]
    Decryption(#[from] CryptoError),

    /// Malformed message type, content or request field.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,
}
