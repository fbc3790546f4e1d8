//! Connection hub: one live outbound channel per user, plus per-match
//! membership for targeted fan-out
//!
//! Outbound queues are bounded so a slow client can never back-pressure
//! the orchestrator; a full queue drops the message with a warning. The
//! reader/writer tasks for a socket live with the transport (`http`),
//! the hub only owns the sending side.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{MatchError, Result};
use crate::protocol::Envelope;

/// Bounded outbound queue per connection
pub const SEND_QUEUE_CAPACITY: usize = 256;

struct Registration {
    conn_id: Uuid,
    tx: mpsc::Sender<Envelope>,
    /// Fired when a newer connection for the same user supersedes this
    /// one; the transport must stop reading on its socket
    close: oneshot::Sender<()>,
}

/// Handle returned by `register`. The transport presents `conn_id` on
/// unregister and must tear down its socket when `closed` resolves.
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub closed: oneshot::Receiver<()>,
}

struct HubInner {
    connections: HashMap<Uuid, Registration>,
    matches: HashMap<Uuid, Vec<Uuid>>,
}

/// Maps user identity to a live outbound channel and match membership
pub struct Hub {
    inner: RwLock<HubInner>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HubInner {
                connections: HashMap::new(),
                matches: HashMap::new(),
            }),
        }
    }

    /// Install a connection for a user, closing any older one: the
    /// superseded registration's close signal fires (its reader must
    /// stop acting on the socket) and its outbound sender is dropped
    /// (its writer task drains out). This guarantees at-most-one live
    /// connection per user, so later events cannot race against a
    /// stale client. The returned handle carries the connection id the
    /// transport must present on unregister, so a stale connection
    /// tearing down cannot evict its replacement.
    pub async fn register(&self, user_id: Uuid, tx: mpsc::Sender<Envelope>) -> ConnectionHandle {
        let conn_id = Uuid::new_v4();
        let (close_tx, close_rx) = oneshot::channel();
        let mut inner = self.inner.write().await;
        if let Some(old) = inner.connections.insert(
            user_id,
            Registration {
                conn_id,
                tx,
                close: close_tx,
            },
        ) {
            info!(user_id = %user_id, "closing superseded connection");
            let _ = old.close.send(());
        }
        info!(user_id = %user_id, "connection registered");
        ConnectionHandle {
            conn_id,
            closed: close_rx,
        }
    }

    /// Remove the connection and every match membership for the user.
    /// No-op when the registration has already been replaced.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        match inner.connections.get(&user_id) {
            Some(reg) if reg.conn_id == conn_id => {
                inner.connections.remove(&user_id);
            }
            _ => return,
        }
        for members in inner.matches.values_mut() {
            members.retain(|uid| *uid != user_id);
        }
        info!(user_id = %user_id, "connection unregistered");
    }

    /// Idempotent membership add
    pub async fn join_match(&self, match_id: Uuid, user_id: Uuid) {
        let mut inner = self.inner.write().await;
        let members = inner.matches.entry(match_id).or_default();
        if !members.contains(&user_id) {
            members.push(user_id);
        }
    }

    /// Idempotent membership removal
    pub async fn leave_match(&self, match_id: Uuid, user_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.matches.get_mut(&match_id) {
            members.retain(|uid| *uid != user_id);
        }
    }

    pub async fn match_members(&self, match_id: Uuid) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner.matches.get(&match_id).cloned().unwrap_or_default()
    }

    /// Enqueue a message on the user's outbound queue; never blocks
    pub async fn send_to_user(&self, user_id: Uuid, msg: Envelope) -> Result<()> {
        let inner = self.inner.read().await;
        let reg = inner.connections.get(&user_id).ok_or_else(|| {
            MatchError::ConnectionNotFound(format!("no connection for user {}", user_id))
        })?;

        match reg.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(user_id = %user_id, kind = %dropped.kind, "send queue full, dropping message");
                Err(MatchError::SendQueueFull(format!(
                    "send queue full for user {}",
                    user_id
                )))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(MatchError::ConnectionNotFound(
                format!("connection closed for user {}", user_id),
            )),
        }
    }

    /// Best-effort fan-out to match participants; every recipient is
    /// attempted, the first error is returned.
    pub async fn broadcast_to_match(&self, match_id: Uuid, msg: Envelope) -> Result<()> {
        let members = self.match_members(match_id).await;
        let mut first_err = None;
        for user_id in members {
            if let Err(e) = self.send_to_user(user_id, msg.clone()).await {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fan-out to every connected user
    pub async fn broadcast_all(&self, msg: Envelope) -> Result<()> {
        let targets: Vec<Uuid> = {
            let inner = self.inner.read().await;
            inner.connections.keys().copied().collect()
        };
        let mut first_err = None;
        for user_id in targets {
            if let Err(e) = self.send_to_user(user_id, msg.clone()).await {
                warn!(user_id = %user_id, error = %e, "broadcast send failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn connected_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.connections.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PingPayload, TYPE_PING};

    fn ping() -> Envelope {
        Envelope::new(TYPE_PING, &PingPayload { timestamp: 0 }).unwrap()
    }

    #[tokio::test]
    async fn test_send_to_registered_user() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        hub.register(user, tx).await;

        hub.send_to_user(user, ping()).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, TYPE_PING);
    }

    #[tokio::test]
    async fn test_send_to_unknown_user_fails() {
        let hub = Hub::new();
        let err = hub.send_to_user(Uuid::new_v4(), ping()).await.unwrap_err();
        assert_eq!(err.code(), "connection_not_found");
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(2);
        hub.register(user, tx).await;

        hub.send_to_user(user, ping()).await.unwrap();
        hub.send_to_user(user, ping()).await.unwrap();
        let err = hub.send_to_user(user, ping()).await.unwrap_err();
        assert_eq!(err.code(), "send_queue_full");
    }

    #[tokio::test]
    async fn test_register_replaces_older_connection() {
        let hub = Hub::new();
        let user = Uuid::new_v4();

        let (old_tx, mut old_rx) = mpsc::channel(4);
        let old = hub.register(user, old_tx).await;

        let (new_tx, mut new_rx) = mpsc::channel(4);
        let _new = hub.register(user, new_tx).await;

        // The superseded connection is explicitly told to tear down
        // its transport, not just cut off from outbound sends
        old.closed.await.expect("close signal fires on replacement");

        // And its outbound channel is gone
        assert!(old_rx.try_recv().is_err());

        hub.send_to_user(user, ping()).await.unwrap();
        assert!(new_rx.recv().await.is_some());

        // A stale teardown must not evict the replacement
        hub.unregister(user, old.conn_id).await;
        assert!(hub.send_to_user(user, ping()).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_signal_pending_while_connection_is_live() {
        let hub = Hub::new();
        let user = Uuid::new_v4();

        let (tx, _rx) = mpsc::channel(4);
        let mut handle = hub.register(user, tx).await;

        // No replacement: the signal must not resolve
        assert!(matches!(
            handle.closed.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_membership_and_broadcast() {
        let hub = Hub::new();
        let match_id = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (atx, mut arx) = mpsc::channel(4);
        let (btx, mut brx) = mpsc::channel(4);
        hub.register(alice, atx).await;
        hub.register(bob, btx).await;

        hub.join_match(match_id, alice).await;
        hub.join_match(match_id, alice).await; // idempotent
        hub.join_match(match_id, bob).await;
        assert_eq!(hub.match_members(match_id).await.len(), 2);

        hub.broadcast_to_match(match_id, ping()).await.unwrap();
        assert!(arx.recv().await.is_some());
        assert!(brx.recv().await.is_some());

        hub.leave_match(match_id, bob).await;
        assert_eq!(hub.match_members(match_id).await, vec![alice]);
    }

    #[tokio::test]
    async fn test_broadcast_attempts_all_despite_errors() {
        let hub = Hub::new();
        let match_id = Uuid::new_v4();
        let gone = Uuid::new_v4();
        let alive = Uuid::new_v4();

        let (tx, mut rx) = mpsc::channel(4);
        hub.register(alive, tx).await;

        // `gone` is a member with no connection
        hub.join_match(match_id, gone).await;
        hub.join_match(match_id, alive).await;

        let err = hub.broadcast_to_match(match_id, ping()).await.unwrap_err();
        assert_eq!(err.code(), "connection_not_found");
        // The live member still received the message
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unregister_clears_membership() {
        let hub = Hub::new();
        let match_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(4);
        let handle = hub.register(user, tx).await;
        hub.join_match(match_id, user).await;

        hub.unregister(user, handle.conn_id).await;
        assert!(hub.match_members(match_id).await.is_empty());
        assert_eq!(hub.connected_count().await, 0);
    }
}
