/// Vault Crypto Library
///
/// Server-side encryption at rest: one process-wide AES-256-GCM key seals
/// message bodies before they reach the database and uploaded file bytes
/// before they reach disk. Every sealed value carries its own random nonce.
pub mod codec;
pub mod error;
pub mod keys;

pub use codec::Codec;
pub use error::CryptoError;
