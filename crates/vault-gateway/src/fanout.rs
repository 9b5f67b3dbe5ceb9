use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, error, trace, warn};

use vault_db::{ChatError, Database};
use vault_types::events::GatewayEvent;
use vault_types::{RoomId, UserId};

use crate::error::DeliveryError;
use crate::registry::Registry;

/// Outcome counts for one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Recipients with no live connection
    pub offline: usize,
    /// Recipients whose connection was stalled or already closing
    pub failed: usize,
}

/// Membership-scoped push of gateway events to live connections.
#[derive(Clone)]
pub struct Fanout {
    registry: Registry,
    db: Arc<Database>,
    send_timeout: Duration,
}

impl Fanout {
    pub fn new(registry: Registry, db: Arc<Database>, send_timeout: Duration) -> Self {
        Self {
            registry,
            db,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Deliver `event` to every current participant of the room that has a
    /// live connection. Membership is read at call time.
    pub async fn publish(&self, chat_room_id: RoomId, event: GatewayEvent) -> DeliveryReport {
        let lookup = self.blocking(move |db| db.participants_of(chat_room_id)).await;
        let Some(participants) = lookup else {
            warn!("Skipping {} fan-out for room {}", event.kind(), chat_room_id);
            return DeliveryReport::default();
        };
        self.publish_to(&participants, event).await
    }

    /// Deliver `event` to an explicit set of users. Used when the membership
    /// rows are gone (room deletion) or the audience is not a room (presence).
    pub async fn publish_to(&self, user_ids: &[UserId], event: GatewayEvent) -> DeliveryReport {
        let event = Arc::new(event);
        let mut report = DeliveryReport::default();
        let mut pending = Vec::new();

        for (user_id, conn) in self.registry.connections_of(user_ids).await {
            match conn {
                Some(conn) => {
                    let event = Arc::clone(&event);
                    let timeout = self.send_timeout;
                    pending.push(async move { (user_id, conn.send(event, timeout).await) });
                }
                None => {
                    report.offline += 1;
                    trace!("{}: {}", event.kind(), DeliveryError::ConnectionUnavailable(user_id));
                }
            }
        }

        // Sends run concurrently; a stalled socket costs at most one timeout.
        for (user_id, result) in join_all(pending).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Dropped {} for user {}: {}", event.kind(), user_id, e);
                }
            }
        }

        match event.chat_room_id() {
            Some(room_id) => debug!(
                "{} fan-out to room {}: {} delivered, {} offline, {} failed",
                event.kind(),
                room_id,
                report.delivered,
                report.offline,
                report.failed
            ),
            None => debug!(
                "{} fan-out: {} delivered, {} offline, {} failed",
                event.kind(),
                report.delivered,
                report.offline,
                report.failed
            ),
        }
        report
    }

    /// Tell everyone who shares a room with `user_id` that they came online
    /// or went offline.
    pub async fn broadcast_presence(&self, user_id: UserId, online: bool) -> DeliveryReport {
        let Some(audience) = self.blocking(move |db| db.co_participants(user_id)).await else {
            warn!("Skipping presence update for {}", user_id);
            return DeliveryReport::default();
        };
        self.publish_to(&audience, GatewayEvent::PresenceUpdate { user_id, online })
            .await
    }

    /// Run a store lookup on the blocking pool. Failures are logged here;
    /// callers only learn that the lookup produced nothing.
    async fn blocking<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&Database) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        match tokio::task::spawn_blocking(move || f(&db)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("Fan-out lookup failed: {}", e);
                None
            }
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                None
            }
        }
    }
}
