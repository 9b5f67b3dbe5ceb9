use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard, RwLock, mpsc};
use uuid::Uuid;

use vault_types::UserId;
use vault_types::events::GatewayEvent;

use crate::error::DeliveryError;

/// Events are shared between every recipient of one fan-out.
pub type Outbound = Arc<GatewayEvent>;

/// Lifecycle of one real-time connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket upgraded, waiting for the identity handshake
    Connecting,
    Authenticated,
    /// Registered and receiving events
    Open,
    Closed,
}

/// The outbound half of one live socket, as seen by the registry.
///
/// Cloning is cheap; every clone pushes into the same bounded queue, which
/// the socket's send loop drains.
#[derive(Debug, Clone)]
pub struct Connection {
    id: Uuid,
    tx: mpsc::Sender<Outbound>,
    close: Arc<Notify>,
}

impl Connection {
    /// A new connection handle and the receiver its send loop drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Self {
            id: Uuid::new_v4(),
            tx,
            close: Arc::new(Notify::new()),
        };
        (conn, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event for this socket, giving up after `timeout` so one
    /// stalled client cannot hold up a fan-out.
    pub async fn send(&self, event: Outbound, timeout: Duration) -> Result<(), DeliveryError> {
        match self.tx.send_timeout(event, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::Stalled(self.id)),
            Err(SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed(self.id)),
        }
    }

    /// Ask the owning socket to shut down. Used on supersession.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

/// Live connections, at most one per user.
#[derive(Clone, Default)]
pub struct Registry {
    connections: Arc<RwLock<HashMap<UserId, Connection>>>,
    /// Serializes register/unregister with the presence write that follows
    presence_locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold this while changing a user's registration and writing their
    /// presence, so a stale close cannot land between a newer connection's
    /// register and its online write.
    pub async fn lock_user(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.presence_locks.lock().await;
            Arc::clone(locks.entry(user_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Make `conn` the user's connection. Returns the connection it replaced,
    /// which the caller is expected to close.
    pub async fn register(&self, user_id: UserId, conn: Connection) -> Option<Connection> {
        self.connections.write().await.insert(user_id, conn)
    }

    /// Remove the user's entry, but only if it is still `conn_id`. Returns
    /// false when a newer connection has taken over.
    pub async fn unregister(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.id == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn connection_of(&self, user_id: UserId) -> Option<Connection> {
        self.connections.read().await.get(&user_id).cloned()
    }

    /// Look up several users under one read lock.
    pub async fn connections_of(&self, user_ids: &[UserId]) -> Vec<(UserId, Option<Connection>)> {
        let connections = self.connections.read().await;
        user_ids
            .iter()
            .map(|&id| (id, connections.get(&id).cloned()))
            .collect()
    }

    pub async fn online_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
