use crate::registry::SubscriberRegistry;
use db::ConnectionPool;
use log::{debug, info, warn};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

const MAX_DATAGRAM_SIZE: usize = 8 * 1024;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ControlMessage {
    #[serde(rename = "SUBSCRIBE")]
    Subscribe { user_id: i32 },
    #[serde(rename = "UNSUBSCRIBE")]
    Unsubscribe { user_id: i32 },
    #[serde(rename = "PING")]
    Ping { user_id: i32 },
}

/// Reads subscriber control datagrams and dispatches `SUBSCRIBE`,
/// `UNSUBSCRIBE`, and `PING`. Runs until `cancel` fires.
pub async fn run_intake_loop(
    socket: Arc<UdpSocket>,
    registry: Arc<SubscriberRegistry>,
    pool: ConnectionPool,
    reconnect_sync_spacing: Duration,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, addr) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("UDP intake loop cancelled");
                return;
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok(pair) => pair,
                Err(err) => {
                    warn!("error reading from UDP socket: {err}");
                    continue;
                }
            },
        };

        let message: ControlMessage = match serde_json::from_slice(&buf[..len]) {
            Ok(message) => message,
            Err(err) => {
                debug!("discarding malformed control datagram from {addr}: {err}");
                continue;
            }
        };

        match message {
            ControlMessage::Subscribe { user_id } => {
                registry.add(user_id, addr);
                reply(&socket, addr, "SUBSCRIBE_OK").await;
                spawn_reconnect_sync(
                    socket.clone(),
                    pool.clone(),
                    user_id,
                    addr,
                    reconnect_sync_spacing,
                );
            }
            ControlMessage::Unsubscribe { user_id } => {
                registry.remove(user_id);
                reply(&socket, addr, "UNSUBSCRIBE_OK").await;
            }
            ControlMessage::Ping { user_id } => {
                registry.touch(user_id);
                reply(&socket, addr, "PONG").await;
            }
        }
    }
}

async fn reply(socket: &UdpSocket, addr: SocketAddr, kind: &str) {
    let body = serde_json::json!({ "type": kind });
    if let Ok(bytes) = serde_json::to_vec(&body)
        && let Err(err) = socket.send_to(&bytes, addr).await
    {
        warn!("failed to reply {kind} to {addr}: {err}");
    }
}

/// The reconnect-sync path: on `SUBSCRIBE`, replay every unread Stored
/// Notification for this user as a datagram, spaced out so a user who
/// has accumulated many notifications doesn't get them all at once.
/// Live delivery marks a Stored Notification read; this replay path does
/// not (see the gateway's `emit` for the counterpart behavior).
fn spawn_reconnect_sync(
    socket: Arc<UdpSocket>,
    pool: ConnectionPool,
    user_id: i32,
    addr: SocketAddr,
    spacing: Duration,
) {
    tokio::spawn(async move {
        let notifications = {
            let mut conn = match pool.get() {
                Ok(conn) => conn,
                Err(err) => {
                    warn!("reconnect-sync: could not acquire a connection for user {user_id}: {err}");
                    return;
                }
            };
            match db::db::notifications::unread_for_user(&mut conn, user_id) {
                Ok(notifications) => notifications,
                Err(err) => {
                    warn!("reconnect-sync: could not load unread notifications for user {user_id}: {err}");
                    return;
                }
            }
        };

        for notification in notifications {
            let payload = serde_json::json!({
                "type": notification.notification_type,
                "manga_id": notification.catalog_id,
                "title": notification.title,
                "message": notification.message,
                "timestamp": notification.created_at,
            });
            if let Ok(bytes) = serde_json::to_vec(&payload)
                && let Err(err) = socket.send_to(&bytes, addr).await
            {
                warn!("reconnect-sync: failed to send to user {user_id} at {addr}: {err}");
                break;
            }
            tokio::time::sleep(spacing).await;
        }
    });
}

/// Runs `registry.cleanup()` on a fixed interval until `cancel` fires.
pub async fn run_cleanup_loop(registry: Arc<SubscriberRegistry>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => registry.cleanup(),
        }
    }
}
