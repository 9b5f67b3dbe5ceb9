use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vault_types::UserId;
use vault_types::events::{GatewayCommand, GatewayEvent};

use crate::fanout::Fanout;
use crate::registry::{Connection, ConnectionState};

/// Ping cadence. Two unanswered pings in a row drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    /// How long a fresh socket may stay unauthenticated
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Outbound queue depth per connection
    pub queue_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            queue_capacity: 256,
        }
    }
}

/// Drives one WebSocket from upgrade to close.
pub async fn handle_connection(socket: WebSocket, fanout: Fanout, config: GatewayConfig) {
    let (mut sender, mut receiver) = socket.split();
    let mut state = ConnectionState::Connecting;

    // Step 1: identity handshake within the grace period
    let user_id = match wait_for_auth(&mut receiver, config.auth_timeout).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client did not authenticate within {:?}, closing", config.auth_timeout);
            let _ = sender.close().await;
            return;
        }
    };

    let db = Arc::clone(fanout.db());
    let known = tokio::task::spawn_blocking(move || db.user_exists(user_id)).await;
    if !matches!(known, Ok(Ok(true))) {
        warn!("Handshake for unknown user {}, closing", user_id);
        let rejection = GatewayEvent::Error { message: format!("unknown user {}", user_id) };
        let _ = send_event(&mut sender, &rejection).await;
        let _ = sender.close().await;
        return;
    }
    transition(&mut state, ConnectionState::Authenticated, user_id);

    // Step 2: register, superseding any older connection for this user
    let (conn, mut rx) = Connection::channel(config.queue_capacity);
    let conn_id = conn.id();
    open(&fanout, user_id, conn.clone(), &mut state).await;

    let ready = GatewayEvent::Ready { user_id, connection_id: conn_id };
    if send_event(&mut sender, &ready).await.is_err() {
        close(&fanout, user_id, conn_id, &mut state).await;
        return;
    }
    info!(
        "User {} connected to gateway ({}), {} online",
        user_id,
        conn_id,
        fanout.registry().online_count().await
    );

    // Set by the recv task on every pong, cleared on every ping
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events to the client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = conn.closed() => {
                    debug!("Connection {} superseded", conn.id());
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The channel is push-only after the handshake; inbound frames only
    // matter for liveness.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Text(text) => {
                    debug!("User {} sent an unexpected frame: {}", user_id, truncated(&text));
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    close(&fanout, user_id, conn_id, &mut state).await;
}

async fn wait_for_auth(receiver: &mut SplitStream<WebSocket>, grace: Duration) -> Option<UserId> {
    let handshake = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Auth { user_id }) => return Some(user_id),
                    Err(e) => warn!("Bad handshake frame: {} -- raw: {}", e, truncated(&text)),
                }
            }
        }
        None
    };

    tokio::time::timeout(grace, handshake).await.ok().flatten()
}

/// Authenticated → Open. Registration and the online write happen under the
/// user's lock so they cannot interleave with an older connection's close.
async fn open(fanout: &Fanout, user_id: UserId, conn: Connection, state: &mut ConnectionState) {
    let _presence = fanout.registry().lock_user(user_id).await;
    if let Some(old) = fanout.registry().register(user_id, conn).await {
        info!("User {} reconnected; closing superseded connection {}", user_id, old.id());
        old.close();
    }
    transition(state, ConnectionState::Open, user_id);
    set_presence(fanout, user_id, true).await;
}

/// Open → Closed. Presence only goes offline if no newer connection has
/// registered for the same user in the meantime.
async fn close(fanout: &Fanout, user_id: UserId, conn_id: Uuid, state: &mut ConnectionState) {
    {
        let _presence = fanout.registry().lock_user(user_id).await;
        if fanout.registry().unregister(user_id, conn_id).await {
            set_presence(fanout, user_id, false).await;
        } else {
            debug!("Connection {} for user {} was superseded; presence unchanged", conn_id, user_id);
        }
    }
    transition(state, ConnectionState::Closed, user_id);
    info!(
        "User {} disconnected from gateway ({}), {} online",
        user_id,
        conn_id,
        fanout.registry().online_count().await
    );
}

async fn set_presence(fanout: &Fanout, user_id: UserId, online: bool) {
    let db = Arc::clone(fanout.db());
    match tokio::task::spawn_blocking(move || db.set_presence(user_id, online)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to store presence for {}: {}", user_id, e),
        Err(e) => warn!("Presence task for {} failed: {}", user_id, e),
    }
    fanout.broadcast_presence(user_id, online).await;
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize {} event: {}", event.kind(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

fn transition(state: &mut ConnectionState, next: ConnectionState, user_id: UserId) {
    debug!("Connection for user {}: {:?} -> {:?}", user_id, state, next);
    *state = next;
}

fn truncated(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use vault_crypto::Codec;
    use vault_crypto::keys::generate_key;
    use vault_db::Database;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stale_close_never_clobbers_a_reconnect() {
        let db = Database::open_in_memory(Codec::new(&generate_key())).unwrap();
        let alice = db.create_user("alice", "Alice").unwrap().id;
        let bob = db.create_user("bob", "Bob").unwrap().id;
        db.create_room(None, false, alice, &[alice, bob]).unwrap();
        let fanout = Fanout::new(Registry::new(), Arc::new(db), Duration::from_millis(50));

        let (watcher, mut watcher_rx) = Connection::channel(1024);
        fanout.registry().register(bob, watcher).await;

        for _ in 0..50 {
            let (first, _first_rx) = Connection::channel(8);
            let first_id = first.id();
            open(&fanout, alice, first, &mut ConnectionState::Authenticated).await;

            // The old socket's close races the reconnect.
            let (second, _second_rx) = Connection::channel(8);
            let second_id = second.id();
            let closing = {
                let fanout = fanout.clone();
                tokio::spawn(async move {
                    close(&fanout, alice, first_id, &mut ConnectionState::Open).await
                })
            };
            let opening = {
                let fanout = fanout.clone();
                tokio::spawn(async move {
                    open(&fanout, alice, second, &mut ConnectionState::Authenticated).await
                })
            };
            closing.await.unwrap();
            opening.await.unwrap();

            let current = fanout.registry().connection_of(alice).await.map(|c| c.id());
            assert_eq!(current, Some(second_id));
            assert!(fanout.db().get_user(alice).unwrap().is_online);

            let mut last_seen_online = None;
            while let Ok(event) = watcher_rx.try_recv() {
                if let GatewayEvent::PresenceUpdate { online, .. } = &*event {
                    last_seen_online = Some(*online);
                }
            }
            assert_eq!(last_seen_online, Some(true));

            close(&fanout, alice, second_id, &mut ConnectionState::Open).await;
            assert!(!fanout.db().get_user(alice).unwrap().is_online);
        }
    }
}
