use thiserror::Error;
use uuid::Uuid;
use vault_types::UserId;

/// Why a single push did not reach a socket. Fan-out is best-effort, so
/// these are logged and counted, never returned to the sender.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("user {0} has no live connection")]
    ConnectionUnavailable(UserId),

    #[error("connection {0} did not accept the event in time")]
    Stalled(Uuid),

    #[error("connection {0} is closed")]
    Closed(Uuid),
}
