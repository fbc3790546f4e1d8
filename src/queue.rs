//! Random 1v1 matchmaking queue
//!
//! Waiting players are indexed by an opaque queue token; removing the
//! token is the only way out of the queue. Enqueue attempts an
//! immediate pairing against the earliest compatible waiter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::current_timestamp;
use crate::error::{MatchError, Result};

/// A queued player waiting to be paired
#[derive(Debug, Clone)]
pub struct WaitingPlayer {
    pub user_id: Uuid,
    pub username: String,
    pub is_guest: bool,
    /// Recorded so richer compatibility can be added without protocol
    /// change; not consulted for pairing today
    pub preferred_category: Option<String>,
    pub preferred_difficulty: Option<String>,
    pub bot_ok: bool,
    pub queued_at: u64,
    pub queue_token: Uuid,
    pub(crate) seq: u64,
}

/// Request to enter the queue
#[derive(Debug, Clone)]
pub struct MatchmakingRequest {
    pub user_id: Uuid,
    pub username: String,
    pub is_guest: bool,
    pub preferred_category: Option<String>,
    pub preferred_difficulty: Option<String>,
    pub bot_ok: bool,
}

/// A matched pair of players
#[derive(Debug, Clone)]
pub struct MatchPair {
    pub first: WaitingPlayer,
    pub second: WaitingPlayer,
}

/// Matchmaking queue for random 1v1 games
pub struct MatchmakingQueue {
    waiting: Mutex<HashMap<Uuid, WaitingPlayer>>,
    bot_wait: Duration,
    seq: AtomicU64,
}

impl MatchmakingQueue {
    pub fn new(bot_wait: Duration) -> Self {
        Self {
            waiting: Mutex::new(HashMap::new()),
            bot_wait,
            seq: AtomicU64::new(0),
        }
    }

    /// Add a player and attempt immediate matchmaking. Returns the
    /// fresh queue token and, when a compatible peer was waiting, the
    /// pair (with the peer removed from the table).
    pub async fn enqueue(&self, req: MatchmakingRequest) -> (Uuid, Option<MatchPair>) {
        let mut waiting = self.waiting.lock().await;

        let queue_token = Uuid::new_v4();
        let player = WaitingPlayer {
            user_id: req.user_id,
            username: req.username,
            is_guest: req.is_guest,
            preferred_category: req.preferred_category,
            preferred_difficulty: req.preferred_difficulty,
            bot_ok: req.bot_ok,
            queued_at: current_timestamp(),
            queue_token,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };

        // Earliest compatible waiter wins, skipping the caller's own
        // user id (a double join must not self-pair)
        let peer_token = waiting
            .values()
            .filter(|other| other.user_id != player.user_id && compatible(&player, other))
            .min_by_key(|other| other.seq)
            .map(|other| other.queue_token);

        if let Some(token) = peer_token {
            let peer = waiting.remove(&token).expect("peer selected from table");
            info!(
                user_id = %player.user_id,
                peer_id = %peer.user_id,
                "players paired"
            );
            return (
                queue_token,
                Some(MatchPair {
                    first: player,
                    second: peer,
                }),
            );
        }

        info!(queue_token = %queue_token, user_id = %player.user_id, "player enqueued");
        waiting.insert(queue_token, player);
        (queue_token, None)
    }

    /// Remove a waiting player by token
    pub async fn dequeue(&self, queue_token: Uuid) -> Result<()> {
        let mut waiting = self.waiting.lock().await;
        if waiting.remove(&queue_token).is_none() {
            return Err(MatchError::QueueTokenNotFound(format!(
                "queue token {} not found",
                queue_token
            )));
        }
        info!(queue_token = %queue_token, "player dequeued");
        Ok(())
    }

    /// Observed queue position: 0 = front, -1 = missing. Advisory; the
    /// caller may be paired between observation and read.
    pub async fn position(&self, queue_token: Uuid) -> i64 {
        let waiting = self.waiting.lock().await;
        let Some(me) = waiting.get(&queue_token) else {
            return -1;
        };
        waiting.values().filter(|p| p.seq < me.seq).count() as i64
    }

    /// Whether the player has waited past the bot threshold and opted
    /// in. The bot path itself is reserved.
    pub async fn should_offer_bot(&self, queue_token: Uuid) -> bool {
        let waiting = self.waiting.lock().await;
        let Some(player) = waiting.get(&queue_token) else {
            return false;
        };
        if !player.bot_ok {
            return false;
        }
        let waited_ms = current_timestamp().saturating_sub(player.queued_at);
        waited_ms >= self.bot_wait.as_millis() as u64
    }

    pub async fn len(&self) -> usize {
        self.waiting.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.waiting.lock().await.is_empty()
    }
}

/// Compatibility is "any two distinct users" in this version; the
/// preference fields exist so filtering can tighten later.
fn compatible(_a: &WaitingPlayer, _b: &WaitingPlayer) -> bool {
    true
}
